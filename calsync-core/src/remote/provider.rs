//! Provider subprocess client.
//!
//! Each remote call spawns an external provider binary
//! (e.g. `calsync-provider-google`), writes one JSON request line to its
//! stdin and reads one JSON response from its stdout. Providers own their
//! credentials; calsync only forwards the `[remote]` table from its config.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;

use crate::error::{CalSyncError, CalSyncResult};
use crate::event::Event;
use crate::remote::protocol::{
    Command, CreateEvent, EnsureCalendar, ListEvents, ProviderCommand, Request, Response,
    UpdateEvent,
};
use crate::remote::{CalendarSpec, EventQuery, RemoteCalendar};

const PROVIDER_TIMEOUT: Duration = Duration::from_secs(60);

/// Provider-specific parameters passed through on every call.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RemoteConfig(pub HashMap<String, serde_json::Value>);

impl From<&RemoteConfig> for serde_json::Map<String, serde_json::Value> {
    fn from(config: &RemoteConfig) -> Self {
        config
            .0
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct Provider {
    name: String,
    config: RemoteConfig,
}

impl Provider {
    pub fn new(name: &str, config: RemoteConfig) -> Self {
        Provider {
            name: name.to_string(),
            config,
        }
    }

    fn binary_name(&self) -> String {
        format!("calsync-provider-{}", self.name)
    }

    fn binary_path(&self) -> CalSyncResult<std::path::PathBuf> {
        let binary_name = self.binary_name();
        which::which(&binary_name).map_err(|_| CalSyncError::ProviderNotInstalled(binary_name))
    }

    fn remote_config(&self) -> serde_json::Map<String, serde_json::Value> {
        serde_json::Map::from(&self.config)
    }

    /// Call a typed provider command and return the result.
    pub async fn call<C: ProviderCommand>(&self, cmd: C) -> CalSyncResult<C::Response> {
        timeout(PROVIDER_TIMEOUT, self.call_raw(C::command(), cmd))
            .await
            .map_err(|_| CalSyncError::ProviderTimeout(PROVIDER_TIMEOUT.as_secs()))?
    }

    /// Low-level call that sends a command with params and deserializes the response.
    async fn call_raw<P: Serialize, R: serde::de::DeserializeOwned>(
        &self,
        command: Command,
        params: P,
    ) -> CalSyncResult<R> {
        let request = Request {
            command,
            params: serde_json::to_value(params)?,
        };
        let request_json = serde_json::to_string(&request)?;

        let binary_path = self.binary_path()?;

        let mut child = TokioCommand::new(&binary_path)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CalSyncError::Provider(format!("Failed to spawn {}: {}", binary_path.display(), e))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| CalSyncError::Provider("Provider stdin unavailable".into()))?;
        stdin
            .write_all(format!("{request_json}\n").as_bytes())
            .await?;
        drop(stdin);

        let output = child.wait_with_output().await?;

        if !output.status.success() {
            return Err(CalSyncError::Provider(format!(
                "{} exited with status: {}",
                self.binary_name(),
                output.status.code().unwrap_or(-1)
            )));
        }

        let response_str = String::from_utf8_lossy(&output.stdout);
        if response_str.trim().is_empty() {
            return Err(CalSyncError::Provider("Provider returned no response".into()));
        }

        let response: Response<R> = serde_json::from_str(&response_str)
            .map_err(|e| CalSyncError::Provider(format!("Failed to parse response: {}", e)))?;

        Ok(response.into_result()?)
    }
}

#[async_trait]
impl RemoteCalendar for Provider {
    async fn ensure_calendar(&self, spec: &CalendarSpec) -> CalSyncResult<String> {
        self.call(EnsureCalendar {
            remote_config: self.remote_config(),
            calendar: spec.clone(),
        })
        .await
    }

    async fn list_events(&self, calendar_id: &str, query: &EventQuery) -> CalSyncResult<Vec<Event>> {
        self.call(ListEvents {
            remote_config: self.remote_config(),
            calendar_id: calendar_id.to_string(),
            query: query.clone(),
        })
        .await
    }

    async fn create_event(&self, calendar_id: &str, event: &Event) -> CalSyncResult<Event> {
        self.call(CreateEvent {
            remote_config: self.remote_config(),
            calendar_id: calendar_id.to_string(),
            event: event.clone(),
        })
        .await
    }

    async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        event: &Event,
    ) -> CalSyncResult<Event> {
        self.call(UpdateEvent {
            remote_config: self.remote_config(),
            calendar_id: calendar_id.to_string(),
            event_id: event_id.to_string(),
            event: event.clone(),
        })
        .await
    }
}
