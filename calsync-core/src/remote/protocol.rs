//! Defines the JSON protocol used between calsync and provider binaries over
//! stdin/stdout.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::RemoteError;
use crate::event::Event;
use crate::remote::{CalendarSpec, EventQuery};

pub trait ProviderCommand: Serialize {
    type Response: DeserializeOwned;
    fn command() -> Command;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    EnsureCalendar,
    ListEvents,
    CreateEvent,
    UpdateEvent,
}

/// Request sent from calsync to provider.
#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    pub command: Command,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Response sent from provider to calsync.
///
/// Errors carry the store's status code, reason code and wait hint so they
/// can be classified for retry on this side of the pipe.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response<T> {
    Success {
        data: T,
    },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        http_status: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
    },
}

impl<T> Response<T> {
    pub fn into_result(self) -> Result<T, RemoteError> {
        match self {
            Response::Success { data } => Ok(data),
            Response::Error {
                error,
                http_status,
                reason,
                retry_after_secs,
            } => Err(RemoteError {
                status: http_status,
                reason,
                retry_after: retry_after_secs.map(std::time::Duration::from_secs),
                message: error,
            }),
        }
    }
}

/// Find or create a calendar by name.
#[derive(Debug, Serialize, Deserialize)]
pub struct EnsureCalendar {
    #[serde(flatten)]
    pub remote_config: serde_json::Map<String, serde_json::Value>,
    pub calendar: CalendarSpec,
}

impl ProviderCommand for EnsureCalendar {
    type Response = String; // Calendar id
    fn command() -> Command {
        Command::EnsureCalendar
    }
}

/// List events by external UID or by time window.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListEvents {
    #[serde(flatten)]
    pub remote_config: serde_json::Map<String, serde_json::Value>,
    pub calendar_id: String,
    pub query: EventQuery,
}

impl ProviderCommand for ListEvents {
    type Response = Vec<Event>;
    fn command() -> Command {
        Command::ListEvents
    }
}

/// Create a new event, keeping its external UID.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateEvent {
    #[serde(flatten)]
    pub remote_config: serde_json::Map<String, serde_json::Value>,
    pub calendar_id: String,
    pub event: Event,
}

impl ProviderCommand for CreateEvent {
    type Response = Event;
    fn command() -> Command {
        Command::CreateEvent
    }
}

/// Update an existing event by its store id.
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateEvent {
    #[serde(flatten)]
    pub remote_config: serde_json::Map<String, serde_json::Value>,
    pub calendar_id: String,
    pub event_id: String,
    pub event: Event,
}

impl ProviderCommand for UpdateEvent {
    type Response = Event;
    fn command() -> Command {
        Command::UpdateEvent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_keeps_retry_metadata() {
        let raw = r#"{"status":"error","error":"Rate Limit Exceeded","http_status":403,"reason":"rateLimitExceeded","retry_after_secs":2}"#;
        let response: Response<String> = serde_json::from_str(raw).unwrap();

        let err = response.into_result().unwrap_err();
        assert_eq!(err.status, Some(403));
        assert_eq!(err.reason.as_deref(), Some("rateLimitExceeded"));
        assert_eq!(err.retry_after, Some(std::time::Duration::from_secs(2)));
    }

    #[test]
    fn test_plain_error_response_has_no_status() {
        let raw = r#"{"status":"error","error":"calendar not found"}"#;
        let response: Response<String> = serde_json::from_str(raw).unwrap();
        assert_eq!(response.into_result().unwrap_err().status, None);
    }

    #[test]
    fn test_request_flattens_remote_config() {
        let mut remote_config = serde_json::Map::new();
        remote_config.insert("google_account".into(), "me@example.com".into());
        let cmd = ListEvents {
            remote_config,
            calendar_id: "cal-1".into(),
            query: EventQuery::Uid("uid-1".into()),
        };

        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value["google_account"], "me@example.com");
        assert_eq!(value["query"]["uid"], "uid-1");
    }
}
