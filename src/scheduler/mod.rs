//! Periodic harvest triggers
//!
//! - [`trigger`]: trigger configuration, recurring rules and next-fire-time
//!   computation
//! - [`service`]: the [`TriggerScheduler`] that runs one timer per tenant
//! - [`error`]: scheduler errors
//!
//! # Quick Start
//!
//! ```ignore
//! use usage_harvester::scheduler::{next_fire_time, Interval, PeriodicTrigger};
//! use chrono::Utc;
//!
//! let trigger = PeriodicTrigger::new("acme", Interval::Monthly, Utc::now());
//! println!("next: {}", next_fire_time(&trigger, Utc::now()));
//! ```

pub mod error;
pub mod service;
pub mod trigger;

pub use error::{SchedulerError, SchedulerResult};
pub use service::{ScheduledTrigger, SchedulerStatus, TriggerFired, TriggerScheduler};
pub use trigger::{
    build_schedule, next_fire_time, upcoming_fire_times, Interval, PeriodicTrigger, RecurringRule,
};
