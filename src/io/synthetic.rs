//! Scripted frame sources and matching synthetic collaborators
//!
//! Replays a JSON script of timed per-customer detections so the full
//! pipeline can run end to end without camera hardware or models.
//! Each scripted frame carries its observations as a JSON payload
//! that the synthetic detector/identifier decode on the other side
//! of the collaborator contract.

use crate::domain::{CustomerId, Detection, IdentityMatch};
use crate::io::capture::FrameSource;
use crate::io::collaborators::{CustomerIdentifier, ProductDetector};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use tokio::time::{sleep, Duration};
use tracing::info;

/// Observations encoded into one synthetic frame
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FramePayload {
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

impl FramePayload {
    pub fn encode(&self) -> Bytes {
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }

    pub fn decode(image: &Bytes) -> anyhow::Result<Self> {
        if image.is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_slice(image)?)
    }
}

/// One scripted step, optionally repeated over consecutive frames
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptStep {
    #[serde(flatten)]
    pub payload: FramePayload,
    #[serde(default = "default_repeat")]
    pub repeat: u32,
}

fn default_repeat() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    /// Delay between emitted frames
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    pub steps: Vec<ScriptStep>,
}

fn default_interval_ms() -> u64 {
    100
}

/// Frame source that replays a script at its configured interval,
/// then reports exhaustion
pub struct ScriptedSource {
    interval: Duration,
    pending: VecDeque<FramePayload>,
}

impl ScriptedSource {
    pub fn new(script: Script) -> Self {
        let mut pending = VecDeque::new();
        for step in script.steps {
            for _ in 0..step.repeat.max(1) {
                pending.push_back(step.payload.clone());
            }
        }
        Self { interval: Duration::from_millis(script.interval_ms), pending }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            anyhow::anyhow!("failed to read script {}: {e}", path.as_ref().display())
        })?;
        let script: Script = serde_json::from_str(&content)?;
        info!(path = %path.as_ref().display(), steps = %script.steps.len(), "script_loaded");
        Ok(Self::new(script))
    }

    /// Source without timing delays, for tests
    pub fn immediate(payloads: Vec<FramePayload>) -> Self {
        Self { interval: Duration::ZERO, pending: payloads.into() }
    }
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn open(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn read(&mut self) -> anyhow::Result<Option<Bytes>> {
        let Some(payload) = self.pending.pop_front() else {
            return Ok(None);
        };
        if !self.interval.is_zero() {
            sleep(self.interval).await;
        }
        Ok(Some(payload.encode()))
    }

    async fn close(&mut self) {}
}

/// Detector that decodes scripted frame payloads
pub struct SyntheticDetector;

#[async_trait]
impl ProductDetector for SyntheticDetector {
    async fn detect(&self, image: &Bytes) -> anyhow::Result<Vec<Detection>> {
        Ok(FramePayload::decode(image)?.detections)
    }
}

/// Identifier that decodes scripted frame payloads
pub struct SyntheticIdentifier;

#[async_trait]
impl CustomerIdentifier for SyntheticIdentifier {
    async fn identify(&self, image: &Bytes) -> anyhow::Result<Vec<IdentityMatch>> {
        let payload = FramePayload::decode(image)?;
        Ok(payload
            .customer
            .map(|id| IdentityMatch {
                customer_id: Some(CustomerId(id)),
                location: Default::default(),
                confidence: 0.95,
            })
            .into_iter()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(customer: &str, labels: &[(&str, f32)]) -> FramePayload {
        FramePayload {
            customer: Some(customer.to_string()),
            detections: labels
                .iter()
                .map(|(label, confidence)| Detection {
                    label: label.to_string(),
                    confidence: *confidence,
                    bbox: Default::default(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_payload_roundtrip() {
        let original = payload("C1", &[("apple", 0.9)]);
        let decoded = FramePayload::decode(&original.encode()).unwrap();
        assert_eq!(decoded.customer.as_deref(), Some("C1"));
        assert_eq!(decoded.detections.len(), 1);
        assert_eq!(decoded.detections[0].label, "apple");
    }

    #[test]
    fn test_payload_decode_empty() {
        let decoded = FramePayload::decode(&Bytes::new()).unwrap();
        assert!(decoded.customer.is_none());
        assert!(decoded.detections.is_empty());
    }

    #[test]
    fn test_script_parse_with_repeat() {
        let script: Script = serde_json::from_str(
            r#"{
                "interval_ms": 50,
                "steps": [
                    {"customer": "C1", "detections": [{"label": "apple", "confidence": 0.9}], "repeat": 3},
                    {"customer": "C1", "detections": []}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(script.interval_ms, 50);

        let source = ScriptedSource::new(script);
        assert_eq!(source.pending.len(), 4);
    }

    #[tokio::test]
    async fn test_scripted_source_exhausts() {
        let mut source = ScriptedSource::immediate(vec![payload("C1", &[("apple", 0.9)])]);
        source.open().await.unwrap();

        assert!(source.read().await.unwrap().is_some());
        assert!(source.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_synthetic_collaborators_decode() {
        let image = payload("C1", &[("apple", 0.9)]).encode();

        let detections = SyntheticDetector.detect(&image).await.unwrap();
        assert_eq!(detections[0].label, "apple");

        let identities = SyntheticIdentifier.identify(&image).await.unwrap();
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].customer_id, Some(CustomerId::from("C1")));
    }

    #[tokio::test]
    async fn test_synthetic_detector_rejects_garbage() {
        let result = SyntheticDetector.detect(&Bytes::from_static(b"not json")).await;
        assert!(result.is_err());
    }
}
