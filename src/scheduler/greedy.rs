use chrono::NaiveDateTime;
use itertools::Itertools;
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use super::{PreparedOrders, Scheduler, after, prepare_orders, relief_team, unranked_team};
use crate::config::SchedulerConfig;
use crate::data::{
    Algorithm, BatchStatus, Minutes, Order, ScheduleOutcome, ScheduledBatch, TeamName,
};
use crate::knowledge::{KnowledgeBase, RankedTeam};
use crate::site::Site;

/// When a machine is free next and what it ran last.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineClock {
    pub next_available: NaiveDateTime,
    pub last_product: Option<String>,
}

/// Machine and worker clocks for one site's pass.
///
/// Clocks only move forward. Sites never share a state.
#[derive(Debug, Clone, Default)]
pub struct DispatchState {
    pub machines: HashMap<String, MachineClock>,
    pub workers: HashMap<TeamName, NaiveDateTime>,
}

struct Assignment {
    team: TeamName,
    seconds_per_unit: f64,
    status: BatchStatus,
}

/// Single-pass dispatcher: per-machine and per-team clocks, changeovers,
/// worker conflict avoidance and batch splitting.
#[derive(Debug, Clone)]
pub struct GreedyDispatcher {
    config: SchedulerConfig,
}

impl GreedyDispatcher {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Schedules orders of a single site against `state`, in the given order,
    /// with machines first free at `horizon`.
    ///
    /// Returns the batches and the number of orders that could not be placed.
    pub fn dispatch_site(
        &self,
        orders: &[Order],
        knowledge: &KnowledgeBase,
        state: &mut DispatchState,
        horizon: NaiveDateTime,
    ) -> (Vec<ScheduledBatch>, usize) {
        let mut batches = Vec::new();
        let mut unscheduled = 0;
        for order in orders {
            match self.dispatch_order(order, knowledge, state, horizon) {
                Some(order_batches) => batches.extend(order_batches),
                None => unscheduled += 1,
            }
        }
        (batches, unscheduled)
    }

    /// Places one order, splitting it as needed. `state` is only advanced when
    /// the whole order fits; `None` leaves it untouched.
    fn dispatch_order(
        &self,
        order: &Order,
        knowledge: &KnowledgeBase,
        state: &mut DispatchState,
        horizon: NaiveDateTime,
    ) -> Option<Vec<ScheduledBatch>> {
        let config = &self.config;
        let canonical = config.machine_codes.resolve(&order.machine);
        let candidates = knowledge.ranked_teams(canonical, &order.product);

        let (mut start, changeover) = match state.machines.get(&order.machine) {
            Some(clock) => (
                clock.next_available,
                clock
                    .last_product
                    .as_ref()
                    .is_some_and(|last| *last != order.product),
            ),
            None => (horizon, false),
        };
        if changeover {
            start = self.advance(order, start, config.changeover_minutes)?;
        }

        let mut workers = state.workers.clone();
        let first = self.assign(order, canonical, candidates, knowledge, &workers, start);
        let planned_parts = order.quantity.div_ceil(self.units_within_cap(first.seconds_per_unit));
        if planned_parts > config.max_batches_per_order {
            warn!(
                "Order {} ({} units) needs {} batches, more than the limit of {}; not scheduled",
                order.order_id, order.quantity, planned_parts, config.max_batches_per_order
            );
            return None;
        }
        if planned_parts > 1 {
            debug!(
                "Splitting order {} ({} units) into {} batches",
                order.order_id, order.quantity, planned_parts
            );
        }

        let mut pending = Some(first);
        let mut remaining = order.quantity;
        let mut batches: Vec<ScheduledBatch> = Vec::new();
        while remaining > 0 {
            if batches.len() as u64 >= config.max_batches_per_order {
                warn!(
                    "Order {} outgrew the limit of {} batches; not scheduled",
                    order.order_id, config.max_batches_per_order
                );
                return None;
            }
            let assignment = match pending.take() {
                Some(a) => a,
                None => self.assign(order, canonical, candidates, knowledge, &workers, start),
            };
            // a slower team than planned may fit fewer units; the count then grows
            let parts_left = planned_parts.saturating_sub(batches.len() as u64).max(1);
            let share = remaining
                .div_ceil(parts_left)
                .min(self.units_within_cap(assignment.seconds_per_unit));

            let first_part = batches.is_empty();
            let duration = self.duration_minutes(share, assignment.seconds_per_unit);
            let end = self.advance(order, start, duration)?;

            if assignment.status == BatchStatus::Relief {
                debug!(
                    "Order {} on {}: no ranked team free at {}, using {}",
                    order.order_id, order.machine, start, assignment.team
                );
            }
            if assignment.status == BatchStatus::Scheduled {
                let rested = self.advance(order, end, config.fatigue_buffer_minutes)?;
                workers.insert(assignment.team.clone(), rested);
            }

            batches.push(ScheduledBatch {
                order_id: order.order_id.clone(),
                source_order_id: order.order_id.clone(),
                machine: order.machine.clone(),
                product: order.product.clone(),
                quantity: share,
                start_time: start,
                end_time: end,
                duration_minutes: duration,
                assigned_team: assignment.team,
                shift_label: config.shift_calendar.label_for(start).to_string(),
                site: order.site(),
                status: assignment.status,
                changeover_applied: changeover && first_part,
            });

            remaining -= share;
            start = end;
        }

        if batches.len() > 1 {
            for (i, batch) in batches.iter_mut().enumerate() {
                batch.order_id = format!("{}-{}", order.order_id, i + 1);
            }
        }

        state.workers = workers;
        state.machines.insert(
            order.machine.clone(),
            MachineClock {
                next_available: start,
                last_product: Some(order.product.clone()),
            },
        );

        Some(batches)
    }

    fn advance(
        &self,
        order: &Order,
        time: NaiveDateTime,
        minutes: Minutes,
    ) -> Option<NaiveDateTime> {
        let later = after(time, minutes);
        if later.is_none() {
            warn!(
                "Order {} on {} runs past the end of the calendar; not scheduled",
                order.order_id, order.machine
            );
        }
        later
    }

    fn assign(
        &self,
        order: &Order,
        canonical: &str,
        candidates: &[RankedTeam],
        knowledge: &KnowledgeBase,
        workers: &HashMap<TeamName, NaiveDateTime>,
        start: NaiveDateTime,
    ) -> Assignment {
        let site = order.site();
        if candidates.is_empty() {
            let seconds_per_unit = knowledge
                .unit_speed(canonical, site)
                .unwrap_or(self.config.default_seconds_per_unit);
            let (team, status) = unranked_team(order, canonical, knowledge, start);
            return Assignment {
                team,
                seconds_per_unit,
                status,
            };
        }

        let free = candidates.iter().find(|c| {
            workers
                .get(&c.team)
                .is_none_or(|available| *available <= start)
        });
        match free {
            Some(candidate) => Assignment {
                team: candidate.team.clone(),
                seconds_per_unit: candidate.seconds_per_unit,
                status: BatchStatus::Scheduled,
            },
            None => Assignment {
                team: relief_team(site),
                seconds_per_unit: self
                    .config
                    .relief_seconds_per_unit
                    .max(candidates[0].seconds_per_unit),
                status: BatchStatus::Relief,
            },
        }
    }

    fn raw_minutes(&self, quantity: u64, seconds_per_unit: f64) -> f64 {
        quantity as f64 * seconds_per_unit * self.config.duration_multiplier / 60.0
    }

    fn duration_minutes(&self, quantity: u64, seconds_per_unit: f64) -> Minutes {
        (self.raw_minutes(quantity, seconds_per_unit).floor() as Minutes)
            .max(self.config.min_batch_minutes)
    }

    /// Largest unit count whose run at this speed stays within the batch cap.
    fn units_within_cap(&self, seconds_per_unit: f64) -> u64 {
        let per_unit = self.raw_minutes(1, seconds_per_unit);
        if !(per_unit > 0.0) {
            return u64::MAX;
        }
        ((self.config.max_batch_minutes as f64 / per_unit).floor() as u64).max(1)
    }
}

impl Scheduler for GreedyDispatcher {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Greedy
    }

    fn schedule(&self, orders: &[Order], knowledge: &KnowledgeBase) -> ScheduleOutcome {
        let start_time = Instant::now();
        let prepared: PreparedOrders = prepare_orders(orders, &self.config);
        let (orders, mut outcome) = prepared.into_outcome(Algorithm::Greedy);

        // stable sort keeps same-product runs contiguous per machine
        let by_site: BTreeMap<Site, Vec<Order>> = orders
            .into_iter()
            .sorted_by(|a, b| {
                (a.site(), &a.machine, &a.product).cmp(&(b.site(), &b.machine, &b.product))
            })
            .map(|o| (o.site(), o))
            .into_group_map()
            .into_iter()
            .collect();

        let horizon = self.config.horizon_start();
        for (site, site_orders) in &by_site {
            let mut state = DispatchState::default();
            let (batches, unscheduled) =
                self.dispatch_site(site_orders, knowledge, &mut state, horizon);
            info!(
                "Dispatched {} orders at {} into {} batches on {} machines",
                site_orders.len(),
                site,
                batches.len(),
                state.machines.len()
            );
            outcome.batches.extend(batches);
            outcome.unscheduled += unscheduled;
        }

        info!(
            "Greedy schedule built in {:.2?}: {} batches, {} unscheduled, {} excluded, {} skipped",
            start_time.elapsed(),
            outcome.batches.len(),
            outcome.unscheduled,
            outcome.excluded_forbidden,
            outcome.skipped_invalid
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::HistoricalRecord;
    use chrono::NaiveDate;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap()
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            horizon_start: Some(t0()),
            ..SchedulerConfig::default()
        }
    }

    fn minutes(m: i64) -> chrono::Duration {
        chrono::Duration::minutes(m)
    }

    #[test]
    fn single_order_with_empty_knowledge_uses_default_speed() {
        let dispatcher = GreedyDispatcher::new(config());
        let outcome = dispatcher.schedule(
            &[Order::new("O1", "A", 1000, "M1")],
            &KnowledgeBase::default(),
        );

        assert_eq!(outcome.batches.len(), 1);
        let batch = &outcome.batches[0];
        assert_eq!(batch.duration_minutes, 416);
        assert_eq!(batch.start_time, t0());
        assert_eq!(batch.end_time, t0() + minutes(416));
        assert_eq!(batch.status, BatchStatus::Relief);
        assert_eq!(batch.assigned_team, "Relief Team (Unknown Site)");
        assert_eq!(batch.shift_label, "Morning");
        assert!(!batch.changeover_applied);
    }

    #[test]
    fn product_switch_adds_changeover() {
        let dispatcher = GreedyDispatcher::new(config());
        let outcome = dispatcher.schedule(
            &[
                Order::new("O1", "A", 100, "M1"),
                Order::new("O2", "B", 100, "M1"),
            ],
            &KnowledgeBase::default(),
        );

        let (first, second) = (&outcome.batches[0], &outcome.batches[1]);
        assert_eq!(second.start_time, first.end_time + minutes(45));
        assert!(second.changeover_applied);
    }

    #[test]
    fn same_product_runs_back_to_back() {
        let dispatcher = GreedyDispatcher::new(config());
        let outcome = dispatcher.schedule(
            &[
                Order::new("O1", "A", 100, "M1"),
                Order::new("O2", "B", 100, "M1"),
                Order::new("O3", "A", 100, "M1"),
            ],
            &KnowledgeBase::default(),
        );

        let ids: Vec<&str> = outcome.batches.iter().map(|b| b.order_id.as_str()).collect();
        assert_eq!(ids, vec!["O1", "O3", "O2"]);
        assert_eq!(outcome.batches[1].start_time, outcome.batches[0].end_time);
        assert!(!outcome.batches[1].changeover_applied);
    }

    #[test]
    fn busy_fastest_team_yields_to_next_fastest() {
        let kb = KnowledgeBase::train(&[
            HistoricalRecord::new("M1", "A", "TeamX", 20.0),
            HistoricalRecord::new("M1", "A", "TeamY", 30.0),
        ]);
        let dispatcher = GreedyDispatcher::new(config());

        let mut state = DispatchState::default();
        state.workers.insert("TeamX".to_string(), t0() + minutes(10));
        let (batches, _) = dispatcher.dispatch_site(
            &[Order::new("O1", "A", 100, "M1")],
            &kb,
            &mut state,
            t0() + minutes(5),
        );

        assert_eq!(batches[0].assigned_team, "TeamY");
        assert_eq!(batches[0].status, BatchStatus::Scheduled);
        assert_eq!(batches[0].duration_minutes, 50);
        assert_eq!(
            state.workers["TeamY"],
            batches[0].end_time + minutes(8 * 60)
        );
    }

    #[test]
    fn all_teams_busy_falls_back_to_relief_without_clock() {
        let kb = KnowledgeBase::train(&[HistoricalRecord::new("M1", "A", "TeamX", 20.0)]);
        let dispatcher = GreedyDispatcher::new(config());
        let mut state = DispatchState::default();
        state.workers.insert("TeamX".to_string(), t0() + minutes(60));

        let (batches, _) = dispatcher.dispatch_site(
            &[Order::new("O1", "A", 100, "M1").with_site(Site::Ugie)],
            &kb,
            &mut state,
            t0(),
        );

        assert_eq!(batches[0].assigned_team, "Relief Team (Ugie)");
        assert_eq!(batches[0].status, BatchStatus::Relief);
        // relief runs at 30 s/unit
        assert_eq!(batches[0].duration_minutes, 50);
        assert_eq!(state.workers.len(), 1);
        assert!(!state.workers.contains_key("Relief Team (Ugie)"));
    }

    #[test]
    fn long_order_is_split_into_equal_capped_batches() {
        let dispatcher = GreedyDispatcher::new(config());
        // 5000 units at 25 s/unit is 2083 minutes
        let outcome = dispatcher.schedule(
            &[Order::new("O1", "A", 5000, "M1")],
            &KnowledgeBase::default(),
        );

        let batches = &outcome.batches;
        assert_eq!(batches.len(), 3);
        let ids: Vec<&str> = batches.iter().map(|b| b.order_id.as_str()).collect();
        assert_eq!(ids, vec!["O1-1", "O1-2", "O1-3"]);
        assert_eq!(batches.iter().map(|b| b.quantity).sum::<u64>(), 5000);
        assert_eq!(
            batches.iter().map(|b| b.quantity).collect::<Vec<_>>(),
            vec![1667, 1667, 1666]
        );
        for pair in batches.windows(2) {
            assert_eq!(pair[1].start_time, pair[0].end_time);
        }
        assert!(batches.iter().all(|b| b.duration_minutes <= 960));
        assert!(batches.iter().all(|b| b.source_order_id == "O1"));
    }

    #[test]
    fn split_batches_rerun_team_assignment() {
        let kb = KnowledgeBase::train(&[
            HistoricalRecord::new("M1", "A", "TeamX", 20.0),
            HistoricalRecord::new("M1", "A", "TeamY", 24.0),
        ]);
        let dispatcher = GreedyDispatcher::new(config());
        // 4000 units at 20 s/unit overrun the 960 minute cap: two batches
        let outcome = dispatcher.schedule(&[Order::new("O1", "A", 4000, "M1")], &kb);

        let teams: Vec<&str> = outcome
            .batches
            .iter()
            .map(|b| b.assigned_team.as_str())
            .collect();
        assert_eq!(teams[0], "TeamX");
        assert_eq!(teams[1], "TeamY");
        assert_eq!(outcome.batches.iter().map(|b| b.quantity).sum::<u64>(), 4000);
        assert!(outcome.batches.iter().all(|b| b.duration_minutes <= 960));
    }

    #[test]
    fn slower_relief_team_grows_the_split() {
        let kb = KnowledgeBase::train(&[HistoricalRecord::new("M1", "A", "TeamX", 20.0)]);
        let dispatcher = GreedyDispatcher::new(config());
        // planned as two batches at 20 s/unit; the second goes to relief at 30 s/unit
        let outcome = dispatcher.schedule(&[Order::new("O1", "A", 5000, "M1")], &kb);

        let batches = &outcome.batches;
        let statuses: Vec<BatchStatus> = batches.iter().map(|b| b.status).collect();
        assert_eq!(
            statuses,
            vec![BatchStatus::Scheduled, BatchStatus::Relief, BatchStatus::Scheduled]
        );
        assert_eq!(
            batches.iter().map(|b| b.quantity).collect::<Vec<_>>(),
            vec![2500, 1920, 580]
        );
        // TeamX has rested by the time the relief batch finishes
        assert_eq!(batches[2].assigned_team, "TeamX");
        assert!(batches.iter().all(|b| b.duration_minutes <= 960));
        assert_eq!(batches[2].order_id, "O1-3");
    }

    #[test]
    fn short_runs_are_padded_to_minimum() {
        let dispatcher = GreedyDispatcher::new(config());
        let outcome =
            dispatcher.schedule(&[Order::new("O1", "A", 3, "M1")], &KnowledgeBase::default());
        assert_eq!(outcome.batches[0].duration_minutes, 15);
    }

    #[test]
    fn duration_multiplier_applies_to_every_batch() {
        let mut config = config();
        config.duration_multiplier = 1.1;
        let dispatcher = GreedyDispatcher::new(config);
        let outcome = dispatcher.schedule(
            &[Order::new("O1", "A", 1000, "M1")],
            &KnowledgeBase::default(),
        );
        // 1000 * 25 * 1.1 / 60 = 458.3
        assert_eq!(outcome.batches[0].duration_minutes, 458);
    }

    #[test]
    fn resolved_machine_code_finds_history() {
        let kb = KnowledgeBase::train(&[HistoricalRecord::new("Filler 1", "A", "TeamX", 12.0)]);
        let mut config = config();
        config.machine_codes = crate::resolver::MachineResolver::new([("BXB-F01", "Filler 1")]);
        let dispatcher = GreedyDispatcher::new(config);

        let outcome = dispatcher.schedule(&[Order::new("O1", "A", 100, "BXB-F01")], &kb);
        let batch = &outcome.batches[0];
        assert_eq!(batch.assigned_team, "TeamX");
        assert_eq!(batch.machine, "BXB-F01");
        assert_eq!(batch.site, Site::Boksburg);
        assert_eq!(batch.duration_minutes, 20);
    }

    #[test]
    fn unranked_order_keeps_its_own_team() {
        let kb = KnowledgeBase::train(&[HistoricalRecord {
            operator_team: None,
            ..HistoricalRecord::new("M1", "A", "", 42.0)
        }]);
        let dispatcher = GreedyDispatcher::new(config());
        let outcome = dispatcher.schedule(
            &[Order::new("O1", "A", 100, "M1").with_team("Night Crew")],
            &kb,
        );
        let batch = &outcome.batches[0];
        assert_eq!(batch.assigned_team, "Night Crew");
        assert_eq!(batch.status, BatchStatus::Preassigned);
        // machine speed from history: 100 * 42 / 60
        assert_eq!(batch.duration_minutes, 70);
    }

    #[test]
    fn sites_do_not_share_clocks() {
        let dispatcher = GreedyDispatcher::new(config());
        let outcome = dispatcher.schedule(
            &[
                Order::new("O1", "A", 100, "M1").with_site(Site::Boksburg),
                Order::new("O2", "B", 100, "M1").with_site(Site::Ugie),
            ],
            &KnowledgeBase::default(),
        );
        assert!(outcome.batches.iter().all(|b| b.start_time == t0()));
    }

    #[test]
    fn dispatch_starts_at_the_given_horizon() {
        let dispatcher = GreedyDispatcher::new(config());
        let later = t0() + minutes(120);
        let (batches, unscheduled) = dispatcher.dispatch_site(
            &[Order::new("O1", "A", 100, "M1")],
            &KnowledgeBase::default(),
            &mut DispatchState::default(),
            later,
        );
        assert_eq!(unscheduled, 0);
        assert_eq!(batches[0].start_time, later);
    }

    #[test]
    fn oversized_order_is_left_unscheduled() {
        let dispatcher = GreedyDispatcher::new(config());
        let outcome = dispatcher.schedule(
            &[
                Order::new("O1", "A", 1_000_000_000_000, "M1"),
                Order::new("O2", "A", 100, "M1"),
            ],
            &KnowledgeBase::default(),
        );

        assert_eq!(outcome.unscheduled, 1);
        assert_eq!(outcome.batches.len(), 1);
        assert_eq!(outcome.batches[0].order_id, "O2");
        // the rejected order leaves the machine clock untouched
        assert_eq!(outcome.batches[0].start_time, t0());
    }

    #[test]
    fn batch_limit_counts_grown_splits() {
        let kb = KnowledgeBase::train(&[HistoricalRecord::new("M1", "A", "TeamX", 20.0)]);
        let mut config = config();
        config.max_batches_per_order = 2;
        let dispatcher = GreedyDispatcher::new(config);
        // planned as two batches, the relief batch forces a third
        let outcome = dispatcher.schedule(&[Order::new("O1", "A", 5000, "M1")], &kb);

        assert_eq!(outcome.unscheduled, 1);
        assert!(outcome.batches.is_empty());
    }

    #[test]
    fn order_past_calendar_end_leaves_state_untouched() {
        let dispatcher = GreedyDispatcher::new(config());
        let kb = KnowledgeBase::train(&[HistoricalRecord::new("M1", "A", "TeamX", 20.0)]);
        let mut state = DispatchState::default();
        let late = NaiveDateTime::MAX - minutes(30);

        let (batches, unscheduled) =
            dispatcher.dispatch_site(&[Order::new("O1", "A", 100, "M1")], &kb, &mut state, late);

        assert!(batches.is_empty());
        assert_eq!(unscheduled, 1);
        assert!(state.machines.is_empty());
        assert!(state.workers.is_empty());
    }

    #[test]
    fn rostered_team_covers_unranked_machine() {
        let kb = KnowledgeBase::train(&[HistoricalRecord::new("M1", "A", "Crew A", 0.0)]);
        let dispatcher = GreedyDispatcher::new(config());
        let outcome = dispatcher.schedule(&[Order::new("O1", "A", 100, "M1")], &kb);

        let batch = &outcome.batches[0];
        assert_eq!(batch.assigned_team, "Crew A");
        assert_eq!(batch.status, BatchStatus::Rostered);
        // no usable cycle time, so the engine default applies
        assert_eq!(batch.duration_minutes, 41);
    }
}
