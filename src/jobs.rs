//! Housekeeping that runs on a schedule, decoupled from the download
//! pipeline.

pub use scheduler::{start_daily, start_every, Job};

pub mod purge;
pub mod scheduler;
pub mod trackers;
