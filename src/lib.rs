//! GitHub synchronization engine: budgeted API access, resumable pagination,
//! retry decisions, issue import, local clone mirrors and drift polling.

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod providers;
pub mod retry;
pub mod sync;

pub use error::{Result, SyncError};
