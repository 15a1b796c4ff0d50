//! The scheduling capability and the order preparation both variants share.

mod greedy;
mod windowed;

pub use greedy::{DispatchState, GreedyDispatcher, MachineClock};
pub use windowed::{PlannedInterval, ReadyTimes, WindowedScheduler};

use chrono::{Duration, NaiveDateTime, Timelike};
use log::debug;

use crate::config::SchedulerConfig;
use crate::data::{Algorithm, BatchStatus, Minutes, Order, ScheduleOutcome, TeamName};
use crate::knowledge::KnowledgeBase;
use crate::site::{self, Site};

/// Turns a normalized order list into a time-stamped schedule.
pub trait Scheduler: Send + Sync {
    fn algorithm(&self) -> Algorithm;

    fn schedule(&self, orders: &[Order], knowledge: &KnowledgeBase) -> ScheduleOutcome;
}

/// Builds the variant selected by `config.algorithm`.
pub fn scheduler_for(config: &SchedulerConfig) -> Box<dyn Scheduler> {
    match config.algorithm {
        Algorithm::Greedy => Box::new(GreedyDispatcher::new(config.clone())),
        Algorithm::Windowed => Box::new(WindowedScheduler::new(config.clone())),
    }
}

/// Orders that survived preparation plus the counts of those that did not.
#[derive(Debug, Clone, Default)]
pub struct PreparedOrders {
    pub orders: Vec<Order>,
    pub skipped_invalid: usize,
    pub excluded_forbidden: usize,
}

impl PreparedOrders {
    pub(crate) fn into_outcome(self, algorithm: Algorithm) -> (Vec<Order>, ScheduleOutcome) {
        let mut outcome = ScheduleOutcome::empty(algorithm);
        outcome.skipped_invalid = self.skipped_invalid;
        outcome.excluded_forbidden = self.excluded_forbidden;
        (self.orders, outcome)
    }
}

/// Drops defective and forbidden orders and fills in missing sites.
///
/// The input is never mutated; surviving orders are cloned.
pub fn prepare_orders(orders: &[Order], config: &SchedulerConfig) -> PreparedOrders {
    let mut prepared = PreparedOrders::default();

    for order in orders {
        if order.quantity == 0 || order.machine.trim().is_empty() {
            debug!("Skipping order {}: no quantity or machine", order.order_id);
            prepared.skipped_invalid += 1;
            continue;
        }

        let mut order = order.clone();
        if order.product.trim().is_empty() {
            order.product = "Unknown".to_string();
        }

        if config.is_forbidden(&order.product, &order.machine) {
            debug!(
                "Excluding order {}: {} is forbidden on {}",
                order.order_id, order.product, order.machine
            );
            prepared.excluded_forbidden += 1;
            continue;
        }

        // an upstream label we could not read is classified like a missing one
        if order.site.is_none_or(|s| s == Site::Unknown) {
            order.site = Some(site::classify(
                &config.site_rules,
                &order.machine,
                order.source_file.as_deref(),
            ));
        }
        prepared.orders.push(order);
    }

    prepared
}

pub(crate) fn relief_team(site: Site) -> TeamName {
    format!("Relief Team ({})", site)
}

/// The order's own team, unless it is blank or an ingestion placeholder.
pub(crate) fn own_team(order: &Order) -> Option<&str> {
    order
        .assigned_team
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case("unassigned"))
}

/// Team for an order whose machine has no ranked teams: the order's own team,
/// then a team from the machine's roster, then relief.
///
/// The roster rotates by the hour the batch starts.
pub(crate) fn unranked_team(
    order: &Order,
    canonical_machine: &str,
    knowledge: &KnowledgeBase,
    start: NaiveDateTime,
) -> (TeamName, BatchStatus) {
    if let Some(team) = own_team(order) {
        return (team.to_string(), BatchStatus::Preassigned);
    }
    let roster = knowledge.roster(canonical_machine);
    if !roster.is_empty() {
        let team = &roster[start.hour() as usize % roster.len()];
        return (team.clone(), BatchStatus::Rostered);
    }
    (relief_team(order.site()), BatchStatus::Relief)
}

/// Team for a batch when no worker clock is consulted: fastest ranked team,
/// then the unranked chain.
pub(crate) fn unclocked_team(
    order: &Order,
    canonical_machine: &str,
    knowledge: &KnowledgeBase,
    start: NaiveDateTime,
) -> (TeamName, BatchStatus) {
    match knowledge.ranked_teams(canonical_machine, &order.product).first() {
        Some(best) => (best.team.clone(), BatchStatus::Scheduled),
        None => unranked_team(order, canonical_machine, knowledge, start),
    }
}

/// `time + minutes`, or `None` past the calendar's range.
pub(crate) fn after(time: NaiveDateTime, minutes: Minutes) -> Option<NaiveDateTime> {
    time.checked_add_signed(Duration::try_minutes(minutes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForbiddenPair;

    #[test]
    fn preparation_counts_defects_and_exclusions() {
        let mut config = SchedulerConfig::default();
        config.forbidden_pairs = vec![ForbiddenPair::new("acid", "BXB-F01")];
        let orders = vec![
            Order::new("O1", "Juice", 10, "BXB-F01"),
            Order::new("O2", "Juice", 0, "BXB-F01"),
            Order::new("O3", "Juice", 5, " "),
            Order::new("O4", "Citric Acid", 5, "BXB-F01"),
            Order::new("O5", "", 5, "PRF-2"),
            Order::new("O6", "Juice", 5, "LINE-1").with_source_file("UGIE_week12.xlsx"),
        ];

        let prepared = prepare_orders(&orders, &config);
        assert_eq!(prepared.skipped_invalid, 2);
        assert_eq!(prepared.excluded_forbidden, 1);
        let ids: Vec<&str> = prepared.orders.iter().map(|o| o.order_id.as_str()).collect();
        assert_eq!(ids, vec!["O1", "O5", "O6"]);
        assert_eq!(prepared.orders[0].site, Some(Site::Boksburg));
        assert_eq!(prepared.orders[1].site, Some(Site::PietRetief));
        assert_eq!(prepared.orders[1].product, "Unknown");
        assert_eq!(prepared.orders[2].site, Some(Site::Ugie));
        assert_eq!(orders[4].product, "");
    }

    #[test]
    fn explicit_site_is_kept() {
        let config = SchedulerConfig::default();
        let orders = vec![Order::new("O1", "A", 1, "BXB-1").with_site(Site::Ugie)];
        let prepared = prepare_orders(&orders, &config);
        assert_eq!(prepared.orders[0].site, Some(Site::Ugie));
    }

    #[test]
    fn unreadable_site_label_is_reclassified() {
        let config = SchedulerConfig::default();
        let orders = vec![
            Order::new("O1", "A", 1, "MKD-3").with_site(Site::Unknown),
            Order::new("O2", "A", 1, "LINE-1").with_site(Site::Unknown),
        ];
        let prepared = prepare_orders(&orders, &config);
        assert_eq!(prepared.orders[0].site, Some(Site::Mkhondo));
        assert_eq!(prepared.orders[1].site, Some(Site::Unknown));
    }

    #[test]
    fn upstream_site_labels_survive_preparation() {
        let config = SchedulerConfig::default();
        let order: Order = serde_json::from_value(serde_json::json!({
            "orderId": "O1", "product": "A", "quantity": 5, "machine": "LINE-1",
            "site": "Piet Retief"
        }))
        .unwrap();
        let prepared = prepare_orders(&[order], &config);
        assert_eq!(prepared.orders[0].site, Some(Site::PietRetief));
    }

    #[test]
    fn unranked_orders_fall_back_to_roster_by_hour() {
        let kb = KnowledgeBase::train(&[
            crate::data::HistoricalRecord::new("M1", "A", "Crew A", 0.0),
            crate::data::HistoricalRecord::new("M1", "A", "Crew B", 0.0),
        ]);
        let day = chrono::NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let six = day.and_hms_opt(6, 0, 0).unwrap();
        let seven = day.and_hms_opt(7, 30, 0).unwrap();
        let order = Order::new("O1", "A", 1, "M1");

        assert_eq!(
            unclocked_team(&order, "M1", &kb, six),
            ("Crew A".to_string(), BatchStatus::Rostered)
        );
        assert_eq!(unclocked_team(&order, "M1", &kb, seven).0, "Crew B");
        // the order's own team wins over the roster
        let own = order.clone().with_team("Night Crew");
        assert_eq!(unclocked_team(&own, "M1", &kb, six).1, BatchStatus::Preassigned);
        assert_eq!(unclocked_team(&order, "M2", &kb, six).1, BatchStatus::Relief);
    }

    #[test]
    fn time_arithmetic_stops_at_calendar_end() {
        let t = chrono::NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap();
        assert_eq!(after(t, 30), Some(t + Duration::minutes(30)));
        assert_eq!(after(t, Minutes::MAX), None);
        assert_eq!(after(NaiveDateTime::MAX, 1), None);
    }

    #[test]
    fn placeholder_team_is_not_an_own_team() {
        let order = Order::new("O1", "A", 1, "M1").with_team("Unassigned");
        assert_eq!(own_team(&order), None);
        let order = Order::new("O1", "A", 1, "M1").with_team(" Line Crew ");
        assert_eq!(own_team(&order), Some("Line Crew"));
    }

    #[test]
    fn selects_variant_from_config() {
        let config = SchedulerConfig::default();
        assert_eq!(scheduler_for(&config).algorithm(), Algorithm::Greedy);
        let config = config.with_algorithm(Algorithm::Windowed);
        assert_eq!(scheduler_for(&config).algorithm(), Algorithm::Windowed);
    }
}
