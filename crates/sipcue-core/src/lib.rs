//! # Sipcue Core Library
//!
//! Adaptive reminder scheduling for a smart water bottle. Every operation is
//! available through the `sipcue` CLI, which is a thin layer over this crate.
//!
//! ## Architecture
//!
//! - **Scheduler**: named persistent timers with jitter, a global minimum gap
//!   between firings, bounded callback timeouts and a periodic flush
//! - **Severity**: escalating per-condition counters and a recent event log
//! - **Policy**: interval feedback laws (continuous level, ignored count)
//! - **Hydration**: daily consumption and the dehydration level
//! - **Storage**: JSON state files and TOML configuration
//!
//! ## Key Components
//!
//! - [`Scheduler`]: timer registry and firing loop
//! - [`SeverityCounter`]: Nth occurrence of a condition has severity N
//! - [`ReminderSet`]: the four standard reminders wired together
//! - [`StateStore`]: persistence contract, with [`JsonFileStore`] and [`MemoryStore`]
//! - [`Config`]: application configuration management

pub mod clock;
pub mod error;
pub mod events;
pub mod hydration;
pub mod policy;
pub mod reminders;
pub mod scheduler;
pub mod severity;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ConfigError, CoreError, SchedulerError, StoreError};
pub use events::{EventRecord, Payload};
pub use hydration::{HydrationTracker, LifetimeStats, WindowInfo, WindowStatus};
pub use policy::{compute_interval, ignored_count_interval, Feedback, IntervalPolicy};
pub use reminders::{BottleSensors, LocalTime, ReminderSet, StaticSensors};
pub use scheduler::{
    callback_fn, CallbackError, FireContext, FireOutcome, FireReport, ReminderCallback, Scheduler,
    TimerOptions, TimerStatus,
};
pub use severity::{Retention, SeverityCounter};
pub use storage::{Config, JsonFileStore, MemoryStore, StateStore, TimerRecord};
