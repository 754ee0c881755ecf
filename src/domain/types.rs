//! Shared types for the checkout tracking core

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Newtype wrapper for camera identifiers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct CameraId(pub String);

impl std::fmt::Display for CameraId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CameraId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Newtype wrapper for the stable opaque customer identity.
///
/// Supplied by the identification collaborator (or the entry
/// authentication flow); this core only correlates by key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct CustomerId(pub String);

impl std::fmt::Display for CustomerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CustomerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Newtype wrapper for session identifiers (UUIDv7)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(new_uuid_v7())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A timestamped image sample owned by one camera.
///
/// Ephemeral: produced by a capture unit, consumed once by the
/// processing step, then discarded.
#[derive(Debug, Clone)]
pub struct Frame {
    pub camera_id: CameraId,
    /// Monotonic per-camera sequence number
    pub seq: u64,
    /// Capture time, epoch ms
    pub ts_ms: u64,
    /// Opaque image payload; format is the detector's concern
    pub image: Bytes,
}

/// A frame tagged with the configured camera name, as handed to
/// downstream consumers by the orchestrator.
#[derive(Debug, Clone)]
pub struct TaggedFrame {
    pub camera_name: String,
    pub frame: Frame,
}

/// Axis-aligned bounding box in pixel coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// One product detection from the external detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    /// In [0, 1]
    pub confidence: f32,
    #[serde(default)]
    pub bbox: BoundingBox,
}

/// One identification result from the external identifier.
/// `customer_id` is `None` for an unrecognized person.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityMatch {
    pub customer_id: Option<CustomerId>,
    #[serde(default)]
    pub location: BoundingBox,
    pub confidence: f32,
}

/// Discrete inferred product interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Pick,
    Return,
}

impl EventKind {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Pick => "pick",
            EventKind::Return => "return",
        }
    }
}

/// A pick or return event emitted by the event tracker.
/// Immutable once emitted.
#[derive(Debug, Clone, Serialize)]
pub struct ProductEvent {
    pub kind: EventKind,
    pub label: String,
    pub customer_id: CustomerId,
    pub ts_ms: u64,
    pub confidence: f32,
    pub camera_id: CameraId,
}
