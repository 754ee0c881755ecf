//! Camera orchestrator - owns the set of capture units
//!
//! Fans start/stop out to every registered unit and exposes per- or
//! all-camera frame access. Every frame handed downstream is tagged
//! with its originating camera id and configured name.

use crate::domain::{CameraId, CoreError, TaggedFrame};
use crate::io::capture::{CaptureUnit, FrameSource, DEFAULT_BUFFER_CAPACITY};
use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::time::Duration;
use tracing::{info, warn};

/// Per-camera runtime statistics
#[derive(Debug, Clone, Serialize)]
pub struct CameraStats {
    pub camera_id: CameraId,
    pub name: String,
    pub fps: f64,
    pub frames_produced: u64,
    pub frames_dropped: u64,
    pub buffered: usize,
}

struct Registered {
    unit: CaptureUnit,
    source: Option<Box<dyn FrameSource>>,
}

/// Registry and lifecycle owner for all capture units
pub struct CameraOrchestrator {
    cameras: FxHashMap<CameraId, Registered>,
    /// Registration order, for deterministic iteration
    order: Vec<CameraId>,
    running: bool,
}

impl CameraOrchestrator {
    pub fn new() -> Self {
        Self { cameras: FxHashMap::default(), order: Vec::new(), running: false }
    }

    /// Register a capture unit for a camera. A duplicate id is a
    /// warn-logged no-op; the existing unit is kept.
    pub fn add_camera(
        &mut self,
        camera_id: CameraId,
        name: &str,
        buffer_capacity: Option<usize>,
        source: Box<dyn FrameSource>,
    ) {
        if self.cameras.contains_key(&camera_id) {
            warn!(camera_id = %camera_id, "camera_already_registered");
            return;
        }
        let capacity = buffer_capacity.unwrap_or(DEFAULT_BUFFER_CAPACITY);
        let unit = CaptureUnit::new(camera_id.clone(), name, capacity);
        info!(camera_id = %camera_id, name = %name, capacity = %capacity, "camera_registered");
        self.order.push(camera_id.clone());
        self.cameras.insert(camera_id, Registered { unit, source: Some(source) });
    }

    /// Start every registered unit. A unit whose source cannot be
    /// opened is logged and skipped; the other cameras are unaffected.
    pub async fn start_all(&mut self) {
        if self.running {
            warn!("orchestrator_already_running");
            return;
        }
        for id in &self.order {
            let registered = self.cameras.get_mut(id).expect("registered camera");
            let Some(source) = registered.source.take() else { continue };
            if let Err(e) = registered.unit.start(source).await {
                tracing::error!(camera_id = %id, error = %e, "camera_start_failed");
            }
        }
        self.running = true;
        info!(cameras = %self.order.len(), "all_cameras_started");
    }

    /// Stop every unit and drain its buffer
    pub async fn stop_all(&mut self) {
        for id in &self.order {
            if let Some(registered) = self.cameras.get_mut(id) {
                registered.unit.stop().await;
            }
        }
        self.running = false;
        info!("all_cameras_stopped");
    }

    /// Latest frame from one camera, tagged with its name
    pub async fn get_frame(
        &self,
        camera_id: &CameraId,
        wait: Duration,
    ) -> Result<TaggedFrame, CoreError> {
        let registered = self
            .cameras
            .get(camera_id)
            .ok_or_else(|| CoreError::NotFound(format!("camera {camera_id}")))?;
        let frame = registered.unit.get_frame(wait).await?;
        Ok(TaggedFrame { camera_name: registered.unit.name().to_string(), frame })
    }

    /// Latest frame from every camera; cameras that time out are
    /// skipped rather than failing the aggregate.
    pub async fn get_all_frames(&self, wait: Duration) -> Vec<TaggedFrame> {
        let mut frames = Vec::with_capacity(self.order.len());
        for id in &self.order {
            match self.get_frame(id, wait).await {
                Ok(tagged) => frames.push(tagged),
                Err(CoreError::Timeout(_)) => {}
                Err(e) => warn!(camera_id = %id, error = %e, "get_frame_failed"),
            }
        }
        frames
    }

    pub fn camera_ids(&self) -> &[CameraId] {
        &self.order
    }

    pub fn camera_count(&self) -> usize {
        self.order.len()
    }

    pub fn camera_stats(&self) -> Vec<CameraStats> {
        self.order
            .iter()
            .filter_map(|id| self.cameras.get(id))
            .map(|r| CameraStats {
                camera_id: r.unit.camera_id().clone(),
                name: r.unit.name().to_string(),
                fps: r.unit.current_fps(),
                frames_produced: r.unit.frames_produced(),
                frames_dropped: r.unit.frames_dropped(),
                buffered: r.unit.buffered(),
            })
            .collect()
    }
}

impl Default for CameraOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}
