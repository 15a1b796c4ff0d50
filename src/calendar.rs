use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// A named time-of-day band starting at `start_hour` and running until the
/// next band begins.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftBand {
    pub label: String,
    pub start_hour: u32,
}

/// Labels batches with the shift their start time falls into.
///
/// Bands wrap around midnight: an hour earlier than every band start belongs
/// to the band that starts latest in the day.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "Vec<ShiftBand>", into = "Vec<ShiftBand>")]
pub struct ShiftCalendar {
    bands: Vec<ShiftBand>,
}

impl Default for ShiftCalendar {
    /// Four 6-hour bands: Morning 06, Afternoon 12, Evening 18, Night 00.
    fn default() -> Self {
        Self::new([
            ("Night", 0),
            ("Morning", 6),
            ("Afternoon", 12),
            ("Evening", 18),
        ])
    }
}

impl From<Vec<ShiftBand>> for ShiftCalendar {
    fn from(bands: Vec<ShiftBand>) -> Self {
        Self::new(bands.into_iter().map(|b| (b.label, b.start_hour)))
    }
}

impl From<ShiftCalendar> for Vec<ShiftBand> {
    fn from(calendar: ShiftCalendar) -> Self {
        calendar.bands
    }
}

impl ShiftCalendar {
    pub fn new<I, S>(bands: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let mut bands: Vec<ShiftBand> = bands
            .into_iter()
            .map(|(label, start_hour)| ShiftBand {
                label: label.into(),
                start_hour: start_hour % 24,
            })
            .collect();
        bands.sort_by_key(|b| b.start_hour);
        Self { bands }
    }

    /// Morning 06-14, Afternoon 14-22, Night 22-06.
    pub fn three_band() -> Self {
        Self::new([("Morning", 6), ("Afternoon", 14), ("Night", 22)])
    }

    pub fn bands(&self) -> &[ShiftBand] {
        &self.bands
    }

    pub fn label_for_hour(&self, hour: u32) -> &str {
        let hour = hour % 24;
        self.bands
            .iter()
            .rev()
            .find(|b| b.start_hour <= hour)
            .or_else(|| self.bands.last())
            .map(|b| b.label.as_str())
            .unwrap_or("Unassigned")
    }

    pub fn label_for(&self, time: NaiveDateTime) -> &str {
        self.label_for_hour(time.hour())
    }
}
