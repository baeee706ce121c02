//! NetBox webhook event
//!
//! The wire format NetBox POSTs for object changes. Only `event` and `model`
//! drive routing; `data` and `snapshots` are carried as raw JSON so that the
//! bytes delivered downstream describe exactly what NetBox sent.
//!
//! ```json
//! {
//!   "event": "updated",
//!   "timestamp": "2024-05-01T09:12:44.106433+00:00",
//!   "model": "device",
//!   "username": "admin",
//!   "data": { "id": 7, "name": "node001-bb091", "site": { "slug": "eu1" } },
//!   "snapshots": { "prechange": { "status": "planned" }, "postchange": { "status": "active" } }
//! }
//! ```

use bytes::Bytes;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A payload could not be decoded as a webhook event
#[derive(Error, Debug)]
#[error("malformed webhook event: {0}")]
pub struct EventDecodeError(#[from] serde_json::Error);

/// Change event emitted by NetBox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Change kind (`created`, `updated`, `deleted`, ...)
    pub event: String,

    /// Object type the change applies to (`device`, `interface`, ...)
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Actor that made the change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// The changed object, opaque to routing
    #[serde(default)]
    pub data: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshots: Option<ChangeSnapshot>,

    /// Fields NetBox adds that this type does not model
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Object state before and after the change
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChangeSnapshot {
    #[serde(default)]
    pub prechange: Value,
    #[serde(default)]
    pub postchange: Value,
}

impl WebhookEvent {
    /// Build a minimal event, mostly useful for tests and tooling
    pub fn new(event: impl Into<String>, model: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            model: model.into(),
            timestamp: None,
            username: None,
            request_id: None,
            data,
            snapshots: None,
            extra: Map::new(),
        }
    }

    /// Decode an event from raw JSON bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EventDecodeError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encode the event as JSON bytes
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    /// Slug of the site the object belongs to, if any
    pub fn site_slug(&self) -> Option<&str> {
        self.data.get("site")?.get("slug")?.as_str()
    }

    /// Display name of the changed object
    pub fn object_name(&self) -> Option<&str> {
        self.data.get("name")?.as_str()
    }

    /// Status value of the changed object (`active`, `planned`, ...)
    pub fn status(&self) -> Option<&str> {
        let status = self.data.get("status")?;
        status
            .get("value")
            .and_then(Value::as_str)
            .or_else(|| status.as_str())
    }

    /// Role slug, covering both `device_role` and the newer `role` key
    pub fn role(&self) -> Option<&str> {
        self.data
            .get("device_role")
            .or_else(|| self.data.get("role"))?
            .get("slug")?
            .as_str()
    }

    /// Time NetBox recorded the change
    pub fn occurred_at(&self) -> Option<DateTime<FixedOffset>> {
        self.timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
    }
}
