use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::site::Site;

// Type aliases for clarity
pub type OrderId = String;
pub type MachineCode = String;
pub type TeamName = String;
pub type Minutes = i64;

/// A normalized manufacturing order as handed over by ingestion.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: OrderId,
    #[serde(default)]
    pub product: String,
    #[serde(default, deserialize_with = "lenient_units")]
    pub quantity: u64,
    #[serde(default)]
    pub machine: MachineCode,
    #[serde(default)]
    pub site: Option<Site>,
    #[serde(default)]
    pub assigned_team: Option<TeamName>,
    #[serde(default)]
    pub source_file: Option<String>,
}

impl Order {
    pub fn new(
        order_id: impl Into<String>,
        product: impl Into<String>,
        quantity: u64,
        machine: impl Into<String>,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            product: product.into(),
            quantity,
            machine: machine.into(),
            site: None,
            assigned_team: None,
            source_file: None,
        }
    }

    pub fn with_site(mut self, site: Site) -> Self {
        self.site = Some(site);
        self
    }

    pub fn with_team(mut self, team: impl Into<String>) -> Self {
        self.assigned_team = Some(team.into());
        self
    }

    pub fn with_source_file(mut self, file: impl Into<String>) -> Self {
        self.source_file = Some(file.into());
        self
    }

    /// Site after preparation; `Unknown` if classification never ran.
    pub fn site(&self) -> Site {
        self.site.unwrap_or(Site::Unknown)
    }
}

/// One historical execution record used for training.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalRecord {
    #[serde(alias = "stationName")]
    pub station: String,
    #[serde(default)]
    pub product: String,
    #[serde(default)]
    pub operator_team: Option<TeamName>,
    #[serde(
        default,
        alias = "cycleTimePerOneUnit(sec)",
        deserialize_with = "lenient_seconds"
    )]
    pub cycle_time_seconds_per_unit: f64,
    #[serde(default)]
    pub site: Option<Site>,
}

impl HistoricalRecord {
    pub fn new(
        station: impl Into<String>,
        product: impl Into<String>,
        team: impl Into<String>,
        seconds_per_unit: f64,
    ) -> Self {
        Self {
            station: station.into(),
            product: product.into(),
            operator_team: Some(team.into()),
            cycle_time_seconds_per_unit: seconds_per_unit,
            site: None,
        }
    }

    pub fn with_site(mut self, site: Site) -> Self {
        self.site = Some(site);
        self
    }
}

/// How the team on a batch was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BatchStatus {
    /// A team ranked by the knowledge base.
    Scheduled,
    /// The pooled relief team; no worker clock is held.
    Relief,
    /// No knowledge-base candidates; the order's own team was kept.
    Preassigned,
    /// No ranked team and no own team; a team from the machine's roster.
    Rostered,
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BatchStatus::Scheduled => "Scheduled",
            BatchStatus::Relief => "Relief",
            BatchStatus::Preassigned => "Preassigned",
            BatchStatus::Rostered => "Rostered",
        };
        f.write_str(label)
    }
}

/// A single time-stamped run of (part of) an order on a machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledBatch {
    pub order_id: OrderId,
    pub source_order_id: OrderId,
    pub machine: MachineCode,
    pub product: String,
    pub quantity: u64,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub duration_minutes: Minutes,
    pub assigned_team: TeamName,
    pub shift_label: String,
    pub site: Site,
    pub status: BatchStatus,
    pub changeover_applied: bool,
}

/// Which scheduling variant produced (or should produce) a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Algorithm {
    #[default]
    Greedy,
    Windowed,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Greedy => f.write_str("greedy"),
            Algorithm::Windowed => f.write_str("windowed"),
        }
    }
}

/// The complete result of one scheduling run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleOutcome {
    pub algorithm: Algorithm,
    pub batches: Vec<ScheduledBatch>,
    /// Orders dropped because they hit a forbidden product/machine pair.
    pub excluded_forbidden: usize,
    /// Orders dropped for data defects (no quantity, no machine).
    pub skipped_invalid: usize,
    /// Orders that were eligible but ended up without a batch.
    pub unscheduled: usize,
}

impl ScheduleOutcome {
    pub fn empty(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            batches: Vec::new(),
            excluded_forbidden: 0,
            skipped_invalid: 0,
            unscheduled: 0,
        }
    }

    pub fn sites(&self) -> Vec<Site> {
        let mut sites: Vec<Site> = self.batches.iter().map(|b| b.site).collect();
        sites.sort();
        sites.dedup();
        sites
    }

    pub fn batches_for_site(&self, site: Site) -> impl Iterator<Item = &ScheduledBatch> {
        self.batches.iter().filter(move |b| b.site == site)
    }
}

fn loose_number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => s.trim().replace(',', "").parse().unwrap_or(0.0),
        _ => 0.0,
    };
    Ok(if value.is_finite() { value } else { 0.0 })
}

// Malformed quantities coerce to zero and are dropped during preparation.
fn lenient_units<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = loose_number(deserializer)?;
    Ok(if value > 0.0 { value.trunc() as u64 } else { 0 })
}

fn lenient_seconds<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    loose_number(deserializer)
}
