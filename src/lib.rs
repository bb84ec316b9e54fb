#![warn(clippy::pedantic, clippy::nursery, clippy::cargo)]
#![deny(clippy::use_self, rust_2018_idioms)]
#![allow(clippy::multiple_crate_versions, clippy::module_name_repetitions)]

//! Daily alarm scheduling: alarm types and rules, a registry of alarms, a
//! scheduler that keeps one timer armed for the next ring, and binary
//! persistence of the alarms.

pub mod alarm;
pub mod calendar;
pub mod config;
/// the built in alarm type, ringing once a day at a fixed time
pub mod daily;
pub mod error;
pub mod registry;
pub mod ring;
pub mod scheduler;
pub mod service;
pub mod storage;

pub use alarm::{Alarm, AlarmId, AlarmType, Properties, PropertyValue, Rule};
pub use error::AlarmError;
pub use registry::AlarmRegistry;
pub use scheduler::{RingSink, Scheduler};
pub use service::SchedulerService;
pub use storage::AlarmStore;
