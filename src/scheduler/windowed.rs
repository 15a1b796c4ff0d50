use chrono::NaiveDateTime;
use good_lp::{
    Expression, ProblemVariables, Solution, SolverModel, Variable, constraint, default_solver,
    variable,
};
use itertools::Itertools;
use log::{info, trace, warn};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use super::{Scheduler, after, prepare_orders, unclocked_team};
use crate::config::SchedulerConfig;
use crate::data::{Algorithm, Minutes, Order, ScheduleOutcome, ScheduledBatch};
use crate::error::ChunkError;
use crate::knowledge::KnowledgeBase;
use crate::site::Site;

/// Minutes from horizon start at which each machine may start its next batch.
pub type ReadyTimes = HashMap<String, Minutes>;

/// One solved interval, in minutes from horizon start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedInterval {
    /// Index into the chunk the interval was solved for.
    pub index: usize,
    pub start: Minutes,
    pub end: Minutes,
}

/// Solves bounded chunks of each site's orders as a no-overlap MIP that
/// minimizes makespan, carrying machine ready times from chunk to chunk.
#[derive(Debug, Clone)]
pub struct WindowedScheduler {
    config: SchedulerConfig,
}

impl WindowedScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub fn duration_for(&self, quantity: u64) -> Minutes {
        let minutes =
            quantity as f64 / self.config.units_per_minute * self.config.duration_multiplier;
        (minutes.ceil() as Minutes).max(1)
    }

    /// Schedules one site's chunks in order, advancing `ready` after each.
    /// Minutes count from `horizon_start`.
    ///
    /// Returns the batches and the number of orders whose chunk failed.
    pub fn schedule_site(
        &self,
        site: Site,
        orders: &[Order],
        knowledge: &KnowledgeBase,
        ready: &mut ReadyTimes,
        horizon_start: NaiveDateTime,
    ) -> (Vec<ScheduledBatch>, usize) {
        let mut batches = Vec::new();
        let mut unscheduled = 0;

        for (n, chunk) in orders.chunks(self.config.chunk_size).enumerate() {
            let solve_started = Instant::now();
            let solved = self.solve_chunk(chunk, ready).and_then(|intervals| {
                intervals
                    .into_iter()
                    .map(|interval| {
                        let order = &chunk[interval.index];
                        self.to_batch(order, interval, horizon_start, knowledge)
                            .map(|batch| (interval, batch))
                    })
                    .collect::<Result<Vec<_>, _>>()
            });
            match solved {
                Ok(placed) => {
                    info!(
                        "{} chunk {}: {} orders solved in {:.2?}",
                        site,
                        n,
                        placed.len(),
                        solve_started.elapsed()
                    );
                    for (interval, batch) in placed {
                        let machine_ready = ready.entry(batch.machine.clone()).or_insert(0);
                        *machine_ready = (*machine_ready).max(interval.end);
                        batches.push(batch);
                    }
                }
                Err(e) => {
                    warn!(
                        "{} chunk {}: {} orders left unscheduled: {}",
                        site,
                        n,
                        chunk.len(),
                        e
                    );
                    unscheduled += chunk.len();
                }
            }
        }

        (batches, unscheduled)
    }

    fn to_batch(
        &self,
        order: &Order,
        interval: PlannedInterval,
        horizon_start: NaiveDateTime,
        knowledge: &KnowledgeBase,
    ) -> Result<ScheduledBatch, ChunkError> {
        let (Some(start_time), Some(end_time)) = (
            after(horizon_start, interval.start),
            after(horizon_start, interval.end),
        ) else {
            return Err(ChunkError::Infeasible);
        };
        let canonical = self.config.machine_codes.resolve(&order.machine);
        let (team, status) = unclocked_team(order, canonical, knowledge, start_time);
        Ok(ScheduledBatch {
            order_id: order.order_id.clone(),
            source_order_id: order.order_id.clone(),
            machine: order.machine.clone(),
            product: order.product.clone(),
            quantity: order.quantity,
            start_time,
            end_time,
            duration_minutes: interval.end - interval.start,
            assigned_team: team,
            shift_label: self.config.shift_calendar.label_for(start_time).to_string(),
            site: order.site(),
            status,
            changeover_applied: false,
        })
    }

    /// Solves one chunk with HiGHS. Intervals come back grouped by machine in
    /// start order.
    pub fn solve_chunk(
        &self,
        chunk: &[Order],
        ready: &ReadyTimes,
    ) -> Result<Vec<PlannedInterval>, ChunkError> {
        if chunk.is_empty() {
            return Ok(Vec::new());
        }
        let horizon = self.config.horizon_minutes;
        let durations: Vec<Minutes> = chunk.iter().map(|o| self.duration_for(o.quantity)).collect();
        let lower: Vec<Minutes> = chunk
            .iter()
            .map(|o| ready.get(&o.machine).copied().unwrap_or(0))
            .collect();
        if lower.iter().any(|lb| *lb > horizon) {
            return Err(ChunkError::Infeasible);
        }
        // every end lies below horizon plus all durations; that is also big-M
        let span = durations
            .iter()
            .try_fold(horizon, |acc, d| acc.checked_add(*d))
            .filter(|span| *span <= MAX_CHUNK_SPAN);
        let Some(span) = span else {
            return Err(ChunkError::Infeasible);
        };

        let machines = machine_groups(chunk);

        let mut problem = ProblemVariables::new();
        let starts: Vec<Variable> = lower
            .iter()
            .map(|lb| {
                problem.add(
                    variable()
                        .integer()
                        .min(*lb as f64)
                        .max(horizon as f64),
                )
            })
            .collect();
        let makespan = problem.add(variable().min(0.0));

        // y = 1 when the first order of the pair runs before the second
        let big_m = span as f64;
        let mut orderings = Vec::new();
        for group in machines.values() {
            for (&i, &j) in group.iter().tuple_combinations() {
                orderings.push((i, j, problem.add(variable().binary())));
            }
        }
        trace!(
            "Chunk model: {} start variables, {} ordering variables on {} machines",
            starts.len(),
            orderings.len(),
            machines.len()
        );

        let mut model = problem
            .minimise(Expression::from(makespan))
            .using(default_solver)
            .set_option("threads", 1) // single thread keeps chunks reproducible
            .set_option("random_seed", 1234)
            .set_option("time_limit", self.config.solver_time_budget_secs)
            .set_option("log_to_console", "false");

        for (i, start) in starts.iter().enumerate() {
            let start = *start;
            let duration = durations[i] as f64;
            model.add_constraint(constraint!(makespan >= start + duration));
        }
        for (i, j, before) in &orderings {
            let (si, sj, before) = (starts[*i], starts[*j], *before);
            let (di, dj) = (durations[*i] as f64, durations[*j] as f64);
            model.add_constraint(constraint!(si + di <= sj + big_m - big_m * before));
            model.add_constraint(constraint!(sj + dj <= si + big_m * before));
        }

        let solution = model.solve()?;
        let values: Vec<f64> = starts.iter().map(|var| solution.value(*var)).collect();
        settle(chunk, &values, &lower, &durations, horizon)
    }
}

/// Longest stretch a chunk may cover, in minutes: a century.
const MAX_CHUNK_SPAN: Minutes = 100 * 365 * 24 * 60;

/// Chunk indices per machine code.
fn machine_groups(chunk: &[Order]) -> BTreeMap<&str, Vec<usize>> {
    chunk
        .iter()
        .enumerate()
        .map(|(i, o)| (o.machine.as_str(), i))
        .into_group_map()
        .into_iter()
        .collect()
}

/// Checks raw start values from the solver and turns them into intervals.
///
/// Starts must be integral, within `[lower, horizon]`, and must not overlap
/// on a machine. Accepted starts are left-shifted: each machine keeps the
/// solver's sequence but drops idle gaps.
fn settle(
    chunk: &[Order],
    values: &[f64],
    lower: &[Minutes],
    durations: &[Minutes],
    horizon: Minutes,
) -> Result<Vec<PlannedInterval>, ChunkError> {
    let mut solved = Vec::with_capacity(chunk.len());
    for (i, value) in values.iter().copied().enumerate() {
        let start = value.round();
        if !value.is_finite() || (value - start).abs() > 1e-6 {
            return Err(ChunkError::RejectedSolution(format!(
                "start of order {} is not integral ({})",
                chunk[i].order_id, value
            )));
        }
        let start = start as Minutes;
        if start < lower[i] || start > horizon {
            return Err(ChunkError::RejectedSolution(format!(
                "start of order {} ({}) is outside [{}, {}]",
                chunk[i].order_id, start, lower[i], horizon
            )));
        }
        solved.push(start);
    }

    let mut intervals = Vec::with_capacity(chunk.len());
    for group in machine_groups(chunk).values() {
        let sequence: Vec<usize> = group.iter().copied().sorted_by_key(|i| solved[*i]).collect();
        for pair in sequence.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if solved[a] + durations[a] > solved[b] {
                return Err(ChunkError::RejectedSolution(format!(
                    "orders {} and {} overlap on {}",
                    chunk[a].order_id, chunk[b].order_id, chunk[a].machine
                )));
            }
        }

        let mut cursor = lower[sequence[0]];
        for i in sequence {
            let start = cursor.max(lower[i]);
            cursor = start + durations[i];
            intervals.push(PlannedInterval {
                index: i,
                start,
                end: cursor,
            });
        }
    }

    Ok(intervals)
}

impl Scheduler for WindowedScheduler {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Windowed
    }

    fn schedule(&self, orders: &[Order], knowledge: &KnowledgeBase) -> ScheduleOutcome {
        let start_time = Instant::now();
        let (orders, mut outcome) =
            prepare_orders(orders, &self.config).into_outcome(Algorithm::Windowed);

        let by_site: BTreeMap<Site, Vec<Order>> = orders
            .into_iter()
            .map(|o| (o.site(), o))
            .into_group_map()
            .into_iter()
            .collect();

        let horizon_start = self.config.horizon_start();
        for (site, site_orders) in &by_site {
            let mut ready = ReadyTimes::new();
            let (batches, unscheduled) =
                self.schedule_site(*site, site_orders, knowledge, &mut ready, horizon_start);
            outcome.batches.extend(batches);
            outcome.unscheduled += unscheduled;
        }

        info!(
            "Windowed schedule built in {:.2?}: {} batches, {} unscheduled, {} excluded, {} skipped",
            start_time.elapsed(),
            outcome.batches.len(),
            outcome.unscheduled,
            outcome.excluded_forbidden,
            outcome.skipped_invalid
        );
        outcome
    }
}
