pub mod allocation;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod telemetry;
pub mod week;

pub use allocation::{AllocationSheet, Entry, EntryId, Percentage};
pub use db::{TimesheetRecord, TimesheetStore};
