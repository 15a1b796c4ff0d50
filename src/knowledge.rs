use itertools::Itertools;
use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::data::{HistoricalRecord, TeamName};
use crate::site::Site;

/// A team together with its mean observed cycle time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedTeam {
    pub team: TeamName,
    pub seconds_per_unit: f64,
}

/// Lookup tables learned from historical execution records.
///
/// Rankings are sorted fastest first. Teams with equal means keep the
/// lexicographic order of the aggregation map; that order carries no meaning.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    pub machine_speeds: BTreeMap<String, f64>,
    pub worker_roster: BTreeMap<String, Vec<TeamName>>,
    pub performance_rank: BTreeMap<(String, String), Vec<RankedTeam>>,
    pub fallback_rank: BTreeMap<String, Vec<RankedTeam>>,
    pub site_defaults: BTreeMap<Site, f64>,
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn rank(groups: BTreeMap<TeamName, Vec<f64>>) -> Vec<RankedTeam> {
    groups
        .into_iter()
        .map(|(team, times)| RankedTeam {
            team,
            seconds_per_unit: mean(&times),
        })
        .sorted_by(|a, b| a.seconds_per_unit.total_cmp(&b.seconds_per_unit))
        .collect()
}

fn team_of(record: &HistoricalRecord) -> Option<&str> {
    record
        .operator_team
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case("nan"))
}

impl KnowledgeBase {
    /// Builds the knowledge base. Empty or unusable history yields an empty one.
    pub fn train(history: &[HistoricalRecord]) -> Self {
        let valid: Vec<&HistoricalRecord> = history
            .iter()
            .filter(|r| r.cycle_time_seconds_per_unit > 0.0 && !r.station.trim().is_empty())
            .collect();

        if valid.is_empty() {
            debug!("No usable history records; knowledge base is empty.");
            return Self::default();
        }

        let machine_speeds: BTreeMap<String, f64> = valid
            .iter()
            .map(|r| (r.station.clone(), r.cycle_time_seconds_per_unit))
            .into_group_map()
            .into_iter()
            .map(|(machine, times)| (machine, mean(&times)))
            .collect();

        let site_defaults: BTreeMap<Site, f64> = valid
            .iter()
            .filter_map(|r| r.site.map(|s| (s, r.cycle_time_seconds_per_unit)))
            .into_group_map()
            .into_iter()
            .map(|(site, times)| (site, mean(&times)))
            .collect();

        let mut by_product: BTreeMap<(String, String), BTreeMap<TeamName, Vec<f64>>> =
            BTreeMap::new();
        let mut by_machine: BTreeMap<String, BTreeMap<TeamName, Vec<f64>>> = BTreeMap::new();
        for record in &valid {
            let Some(team) = team_of(record) else {
                continue;
            };
            by_product
                .entry((record.station.clone(), record.product.clone()))
                .or_default()
                .entry(team.to_string())
                .or_default()
                .push(record.cycle_time_seconds_per_unit);
            by_machine
                .entry(record.station.clone())
                .or_default()
                .entry(team.to_string())
                .or_default()
                .push(record.cycle_time_seconds_per_unit);
        }

        // roster keeps first-seen order, counting records without cycle time too
        let mut worker_roster: BTreeMap<String, Vec<TeamName>> = BTreeMap::new();
        for record in history {
            if let Some(team) = team_of(record) {
                let teams = worker_roster.entry(record.station.clone()).or_default();
                if !teams.iter().any(|t| t == team) {
                    teams.push(team.to_string());
                }
            }
        }

        let performance_rank: BTreeMap<_, _> = by_product
            .into_iter()
            .map(|(key, teams)| (key, rank(teams)))
            .collect();
        let fallback_rank: BTreeMap<_, _> = by_machine
            .into_iter()
            .map(|(machine, teams)| (machine, rank(teams)))
            .collect();

        info!(
            "Trained knowledge base from {} records: {} machines, {} machine/product rankings, {} sites.",
            valid.len(),
            machine_speeds.len(),
            performance_rank.len(),
            site_defaults.len()
        );

        Self {
            machine_speeds,
            worker_roster,
            performance_rank,
            fallback_rank,
            site_defaults,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.machine_speeds.is_empty()
    }

    /// Candidate teams for a canonical machine and product, fastest first.
    ///
    /// Falls back to the machine-wide ranking when the product was never run
    /// on that machine. Empty when the machine has no ranked teams at all.
    pub fn ranked_teams(&self, machine: &str, product: &str) -> &[RankedTeam] {
        self.performance_rank
            .get(&(machine.to_string(), product.to_string()))
            .filter(|teams| !teams.is_empty())
            .or_else(|| self.fallback_rank.get(machine))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Speed to use when no team ranking applies; `None` means the engine default.
    pub fn unit_speed(&self, machine: &str, site: Site) -> Option<f64> {
        self.machine_speeds
            .get(machine)
            .or_else(|| self.site_defaults.get(&site))
            .copied()
    }

    pub fn roster(&self, machine: &str) -> &[TeamName] {
        self.worker_roster
            .get(machine)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
