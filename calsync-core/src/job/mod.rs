//! Scheduled job records.

pub mod cadence;
pub mod store;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CalSyncError, CalSyncResult};
use crate::sync::SyncPayload;

pub use store::JobStore;

/// Default cadence for jobs that do not specify one.
pub const DEFAULT_INTERVAL_MIN: u32 = 15;

/// All persisted jobs, keyed by id.
pub type JobMap = BTreeMap<String, Job>;

/// The closed set of job kinds the scheduler knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    /// Pull an ICS schedule export and reconcile it into a remote calendar.
    #[serde(rename = "kronox-sync")]
    IcsSync,
}

impl JobKind {
    pub const ALL: &'static [JobKind] = &[JobKind::IcsSync];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::IcsSync => "kronox-sync",
        }
    }

    /// Reject payloads the kind's handler could never run.
    pub fn validate_payload(&self, payload: &serde_json::Value) -> CalSyncResult<()> {
        match self {
            JobKind::IcsSync => SyncPayload::from_value(payload).map(|_| ()),
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = CalSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CalSyncError::UnknownJobType(s.to_string()))
    }
}

/// A persisted job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub payload: serde_json::Value,
    #[serde(alias = "intervalMinutes", default = "default_interval")]
    pub interval_min: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Unix seconds of the next due time. `0` means "never scheduled".
    #[serde(default)]
    pub next_run_at: i64,
}

fn default_interval() -> u32 {
    DEFAULT_INTERVAL_MIN
}

fn default_enabled() -> bool {
    true
}

impl Job {
    pub fn is_due(&self, now: i64) -> bool {
        self.enabled && self.next_run_at <= now
    }
}

/// Caller-supplied job definition for an upsert.
///
/// `kind` is an unparsed type name so unknown kinds surface as
/// [`CalSyncError::UnknownJobType`] rather than a deserialization failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
    #[serde(default, alias = "intervalMinutes")]
    pub interval_min: Option<u32>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub next_run_at: Option<i64>,
}

impl JobSpec {
    pub fn new(id: impl Into<String>, kind: JobKind, payload: serde_json::Value) -> Self {
        JobSpec {
            id: id.into(),
            kind: kind.as_str().to_string(),
            payload,
            interval_min: None,
            enabled: None,
            next_run_at: None,
        }
    }

    pub fn interval(mut self, minutes: u32) -> Self {
        self.interval_min = Some(minutes);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }
}
