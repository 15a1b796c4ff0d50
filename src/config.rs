//! Run configuration for both scheduling variants.
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//! ```json
//! {
//!   "algorithm": "windowed",
//!   "changeoverMinutes": 30,
//!   "forbiddenPairs": [{ "productPattern": "ACID", "machine": "BXB-F01" }],
//!   "machineCodes": { "BXB-F01": "Filler 1" }
//! }
//! ```

use chrono::{Duration, Local, NaiveDateTime, NaiveTime};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::calendar::ShiftCalendar;
use crate::data::{Algorithm, Minutes};
use crate::error::ConfigError;
use crate::resolver::MachineResolver;
use crate::site::{self, SiteRule};

pub const CONFIG_PATH_ENV: &str = "PLANNER_CONFIG";

/// A product pattern that must never run on a given machine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForbiddenPair {
    /// Case-insensitive substring of the product name.
    pub product_pattern: String,
    /// Machine code, compared case-insensitively against both the order's
    /// own code and its resolved station name.
    pub machine: String,
}

impl ForbiddenPair {
    pub fn new(product_pattern: impl Into<String>, machine: impl Into<String>) -> Self {
        Self {
            product_pattern: product_pattern.into(),
            machine: machine.into(),
        }
    }

    pub fn matches(&self, product: &str, machine: &str, canonical_machine: &str) -> bool {
        let pattern = self.product_pattern.trim();
        if pattern.is_empty() {
            return false;
        }
        let machine_hit = self.machine.eq_ignore_ascii_case(machine.trim())
            || self.machine.eq_ignore_ascii_case(canonical_machine.trim());
        machine_hit && product.to_uppercase().contains(&pattern.to_uppercase())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerConfig {
    pub algorithm: Algorithm,
    /// First instant any machine may start; `None` means tomorrow 06:00 local time.
    pub horizon_start: Option<NaiveDateTime>,
    pub changeover_minutes: Minutes,
    pub min_batch_minutes: Minutes,
    pub max_batch_minutes: Minutes,
    /// Orders that would split into more batches than this are left unscheduled.
    pub max_batches_per_order: u64,
    pub fatigue_buffer_minutes: Minutes,
    pub default_seconds_per_unit: f64,
    pub relief_seconds_per_unit: f64,
    /// Proportional buffer applied to every greedy duration.
    pub duration_multiplier: f64,
    pub chunk_size: usize,
    pub solver_time_budget_secs: f64,
    pub units_per_minute: f64,
    /// Upper bound for windowed start times, in minutes from horizon start.
    pub horizon_minutes: Minutes,
    pub shift_calendar: ShiftCalendar,
    pub forbidden_pairs: Vec<ForbiddenPair>,
    pub machine_codes: MachineResolver,
    pub site_rules: Vec<SiteRule>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Greedy,
            horizon_start: None,
            changeover_minutes: 45,
            min_batch_minutes: 15,
            max_batch_minutes: 16 * 60,
            max_batches_per_order: 500,
            fatigue_buffer_minutes: 8 * 60,
            default_seconds_per_unit: 25.0,
            relief_seconds_per_unit: 30.0,
            duration_multiplier: 1.0,
            chunk_size: 50,
            solver_time_budget_secs: 10.0,
            units_per_minute: 2.0,
            horizon_minutes: 30 * 24 * 60,
            shift_calendar: ShiftCalendar::default(),
            forbidden_pairs: Vec::new(),
            machine_codes: MachineResolver::default(),
            site_rules: site::default_rules(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        info!("Loaded scheduler config from {}", path.display());
        if !config.machine_codes.is_empty() {
            info!("{} machine codes mapped to stations", config.machine_codes.len());
        }
        Ok(config)
    }

    /// Reads the file named by `PLANNER_CONFIG`, or falls back to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(path),
            None => {
                info!("{} not set, using default scheduler config", CONFIG_PATH_ENV);
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: &str| -> Result<(), ConfigError> {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };
        if self.chunk_size == 0 {
            return invalid("chunkSize", "must be at least 1");
        }
        if !(self.units_per_minute > 0.0) {
            return invalid("unitsPerMinute", "must be positive");
        }
        if !(self.duration_multiplier > 0.0) {
            return invalid("durationMultiplier", "must be positive");
        }
        if !(self.default_seconds_per_unit > 0.0) || !(self.relief_seconds_per_unit > 0.0) {
            return invalid("defaultSecondsPerUnit", "speeds must be positive");
        }
        if self.min_batch_minutes < 0 || self.max_batch_minutes < self.min_batch_minutes.max(1) {
            return invalid(
                "maxBatchMinutes",
                "must be positive and not below minBatchMinutes",
            );
        }
        if self.max_batches_per_order == 0 {
            return invalid("maxBatchesPerOrder", "must be at least 1");
        }
        if self.changeover_minutes < 0 || self.fatigue_buffer_minutes < 0 {
            return invalid("changeoverMinutes", "durations must not be negative");
        }
        if !(self.solver_time_budget_secs > 0.0) {
            return invalid("solverTimeBudgetSecs", "must be positive");
        }
        Ok(())
    }

    pub fn horizon_start(&self) -> NaiveDateTime {
        self.horizon_start.unwrap_or_else(|| {
            let six = NaiveTime::from_hms_opt(6, 0, 0).unwrap_or_default();
            (Local::now().date_naive() + Duration::days(1)).and_time(six)
        })
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn is_forbidden(&self, product: &str, machine: &str) -> bool {
        let canonical = self.machine_codes.resolve(machine);
        self.forbidden_pairs
            .iter()
            .any(|pair| pair.matches(product, machine, canonical))
    }
}
