//! Core of calsync: a recurring job scheduler and the engine that reconciles
//! ICS schedule exports into a remote calendar.
//!
//! - `scheduler` and `job` own job records and run them on their cadence
//! - `sync` and `reconcile` turn a batch of source events into
//!   create/update/skip writes against a `remote::RemoteCalendar`
//! - `retry` and `throttle` keep those writes within the store's limits

pub mod clock;
pub mod error;
pub mod event;
pub mod job;
pub mod reconcile;
pub mod remote;
pub mod retry;
pub mod scheduler;
pub mod source;
pub mod sync;
pub mod throttle;

#[cfg(test)]
mod testing;

pub use error::{CalSyncError, CalSyncResult, RemoteError};
pub use event::*;
pub use job::{Job, JobKind, JobSpec, JobStore};
pub use scheduler::{HandlerRegistry, JobHandler, Scheduler, SchedulerConfig, SchedulerHandle};
pub use sync::{IcsSyncJob, SyncOptions, SyncPayload, SyncReport};
