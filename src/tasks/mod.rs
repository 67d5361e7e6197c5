//! Background Tasks Module
//!
//! Contains background tasks that run periodically during engine operation.
//!
//! # Tasks
//! - Eviction Sweep: Removes rows past their eviction instant at configured intervals

mod sweep;

pub use sweep::spawn_sweep_task;
