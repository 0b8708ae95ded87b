//! Core types for the mixdesk-daemon.
//!
//! This module re-exports all the core data types used throughout the daemon:
//! - [`CacheCategory`] and [`CacheValue`]: what the tiered cache stores
//! - [`TaskPayload`] and [`TaskOutput`]: what the worker pool processes
//! - [`TaskId`], [`TaskKind`], [`TaskState`]: task bookkeeping

mod task;
mod value;

pub use task::{TaskId, TaskKind, TaskOutput, TaskPayload, TaskReport, TaskState};
pub use value::{fingerprint, now_millis, CacheCategory, CacheValue, ValueKind};
