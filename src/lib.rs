//! Production timeline planner.
//!
//! Learns machine speeds and team rankings from historical runs
//! ([`knowledge`]), then turns a normalized order list into time-stamped
//! batches with one of two [`scheduler`] variants: a greedy dispatcher with
//! changeovers, worker clocks and batch splitting, or a windowed MIP scheduler
//! that minimizes makespan chunk by chunk.

pub mod calendar;
pub mod config;
pub mod data;
pub mod error;
pub mod knowledge;
pub mod resolver;
pub mod scheduler;
pub mod server;
pub mod site;

pub use config::SchedulerConfig;
pub use data::{Algorithm, HistoricalRecord, Order, ScheduleOutcome, ScheduledBatch};
pub use knowledge::KnowledgeBase;
pub use scheduler::{Scheduler, scheduler_for};
