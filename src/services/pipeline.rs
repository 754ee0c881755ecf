//! Frame processing pipeline
//!
//! `FrameProcessor` turns one frame into an observation (who was
//! seen, holding what) through the detector and identifier
//! collaborators. `CheckoutPipeline` drives observations through the
//! stateful services: session on first sighting, events through the
//! tracker, cart updates, and exit finalization when a customer shows
//! up on an exit camera.
//!
//! Locking: the stateful services sit behind `parking_lot` mutexes,
//! acquired in a fixed order (sessions, carts, tracker) and never
//! held across an await point.

use crate::domain::{CameraId, CoreError, CustomerId, Detection, Frame, TaggedFrame, Transaction};
use crate::infra::metrics::Metrics;
use crate::io::collaborators::{CustomerIdentifier, ProductDetector};
use crate::io::orchestrator::CameraOrchestrator;
use crate::services::cart::{VirtualCart, VirtualCartManager};
use crate::services::event_tracker::EventTracker;
use crate::services::exit_processor::ExitProcessor;
use crate::services::session_manager::SessionManager;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Minimum confidence for a detection to be considered
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// What one frame showed: the identified customer (if any) and the
/// detections that cleared the confidence threshold
#[derive(Debug, Default)]
pub struct FrameObservation {
    pub customer_id: Option<CustomerId>,
    pub detections: Vec<Detection>,
}

/// Stateless per-frame step: detector and identifier collaborators
/// plus confidence filtering. Collaborator failures degrade the
/// single frame, never the pipeline.
pub struct FrameProcessor {
    detector: Arc<dyn ProductDetector>,
    identifier: Option<Arc<dyn CustomerIdentifier>>,
    confidence_threshold: f32,
}

impl FrameProcessor {
    pub fn new(
        detector: Arc<dyn ProductDetector>,
        identifier: Option<Arc<dyn CustomerIdentifier>>,
        confidence_threshold: f32,
    ) -> Self {
        Self { detector, identifier, confidence_threshold }
    }

    pub async fn process(&self, frame: &Frame) -> FrameObservation {
        let detections = match self.detector.detect(&frame.image).await {
            Ok(detections) => detections
                .into_iter()
                .filter(|d| d.confidence >= self.confidence_threshold)
                .collect(),
            Err(e) => {
                warn!(camera_id = %frame.camera_id, seq = %frame.seq, error = %e, "detector_failed");
                Vec::new()
            }
        };

        let customer_id = match &self.identifier {
            Some(identifier) => match identifier.identify(&frame.image).await {
                Ok(matches) => matches
                    .into_iter()
                    .filter(|m| m.customer_id.is_some())
                    .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
                    .and_then(|m| m.customer_id),
                Err(e) => {
                    warn!(camera_id = %frame.camera_id, seq = %frame.seq, error = %e, "identifier_failed");
                    None
                }
            },
            None => None,
        };

        FrameObservation { customer_id, detections }
    }
}

/// Mutable service state shared across camera tasks
pub struct SharedState {
    pub sessions: Mutex<SessionManager>,
    pub carts: Mutex<VirtualCartManager>,
    pub tracker: Mutex<EventTracker>,
}

/// Drives frames from the orchestrator through the stateful services
pub struct CheckoutPipeline {
    state: SharedState,
    processor: FrameProcessor,
    exit_processor: ExitProcessor,
    exit_cameras: FxHashSet<CameraId>,
    metrics: Arc<Metrics>,
}

impl CheckoutPipeline {
    pub fn new(
        processor: FrameProcessor,
        sessions: SessionManager,
        carts: VirtualCartManager,
        tracker: EventTracker,
        exit_processor: ExitProcessor,
        exit_cameras: FxHashSet<CameraId>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            state: SharedState {
                sessions: Mutex::new(sessions),
                carts: Mutex::new(carts),
                tracker: Mutex::new(tracker),
            },
            processor,
            exit_processor,
            exit_cameras,
            metrics,
        }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Process one tagged frame end to end. Returns the transaction
    /// when the frame completed an exit.
    pub async fn process_frame(
        &self,
        tagged: &TaggedFrame,
    ) -> Result<Option<Transaction>, CoreError> {
        let started = std::time::Instant::now();
        let result = self.process_inner(tagged).await;
        self.metrics.record_frame_processed(started.elapsed().as_micros() as u64);
        result
    }

    async fn process_inner(&self, tagged: &TaggedFrame) -> Result<Option<Transaction>, CoreError> {
        let frame = &tagged.frame;
        let observation = self.processor.process(frame).await;
        self.metrics.record_detections(observation.detections.len() as u64);

        let Some(customer_id) = observation.customer_id else {
            return Ok(None);
        };
        let at_exit = self.exit_cameras.contains(&frame.camera_id);

        let session_id = match self.ensure_session(&customer_id, &frame.camera_id, at_exit)? {
            Some(session_id) => session_id,
            None => return Ok(None),
        };

        let events = self.state.tracker.lock().process_detections(
            &customer_id,
            &observation.detections,
            frame.ts_ms,
            &frame.camera_id,
        );
        if !events.is_empty() {
            for event in &events {
                match event.kind {
                    crate::domain::EventKind::Pick => self.metrics.record_pick(),
                    crate::domain::EventKind::Return => self.metrics.record_return(),
                }
            }
            self.state.carts.lock().update_from_events(&customer_id, &events)?;
        }

        if at_exit {
            let txn = self.handle_exit(&customer_id, &session_id, &frame.camera_id).await?;
            return Ok(Some(txn));
        }
        Ok(None)
    }

    /// Session (and cart) for the observed customer. Never opens a
    /// session at the exit: a customer first seen there has nothing
    /// to check out, so the frame is dropped.
    fn ensure_session(
        &self,
        customer_id: &CustomerId,
        camera_id: &CameraId,
        at_exit: bool,
    ) -> Result<Option<crate::domain::SessionId>, CoreError> {
        let mut sessions = self.state.sessions.lock();

        if let Some(session) = sessions.get_by_customer(customer_id) {
            if session.status.is_terminal() {
                return Ok(None);
            }
            return Ok(Some(session.session_id.clone()));
        }
        if at_exit {
            debug!(customer_id = %customer_id, camera_id = %camera_id, "exit_without_session");
            return Ok(None);
        }

        let session = sessions.create_session(customer_id, Some(camera_id.clone()))?;
        self.metrics.record_session_started();

        let mut carts = self.state.carts.lock();
        let cart = carts.create_cart(customer_id, &session.session_id);
        let cart_session = cart.session_id.clone();
        sessions.set_cart(&session.session_id, &cart_session.0)?;
        Ok(Some(session.session_id))
    }

    /// Finalize a customer seen at an exit camera: exiting, settle,
    /// complete, release all per-customer state. No service lock is
    /// held while the collaborators are awaited.
    async fn handle_exit(
        &self,
        customer_id: &CustomerId,
        session_id: &crate::domain::SessionId,
        exit_camera: &CameraId,
    ) -> Result<Transaction, CoreError> {
        {
            let mut sessions = self.state.sessions.lock();
            let session = sessions
                .get(session_id)
                .ok_or_else(|| CoreError::NotFound(format!("session {session_id}")))?;
            if !session.is_active() {
                // Already exiting or closed by another frame
                return Err(CoreError::NotFound(format!("active session {session_id}")));
            }
            sessions.mark_exiting(session_id, Some(exit_camera.clone()))?;
        }

        let cart_snapshot: VirtualCart = self
            .state
            .carts
            .lock()
            .get(customer_id)
            .cloned()
            .unwrap_or_else(|| VirtualCart::new(customer_id.clone(), session_id.clone()));

        let txn = self
            .exit_processor
            .process_exit(session_id, customer_id, &cart_snapshot, Some(exit_camera.clone()))
            .await;
        self.metrics.record_transaction();

        self.state.sessions.lock().complete_session(session_id, Some(exit_camera.clone()))?;
        self.state.carts.lock().remove_cart(customer_id);
        self.state.tracker.lock().clear_history(Some(customer_id));

        info!(
            customer_id = %customer_id,
            session_id = %session_id,
            transaction_id = %txn.transaction_id,
            total = %txn.total_amount,
            "customer_checked_out"
        );
        Ok(txn)
    }

    /// One expiry sweep across sessions and carts. Abandoning a
    /// session releases its cart and tracking history; an expired
    /// cart abandons its session.
    pub fn cleanup(&self) {
        let abandoned = self.state.sessions.lock().cleanup_expired();
        for customer_id in &abandoned {
            self.state.carts.lock().remove_cart(customer_id);
            self.state.tracker.lock().clear_history(Some(customer_id));
        }

        let expired_carts = self.state.carts.lock().cleanup_expired();
        for customer_id in &expired_carts {
            let mut sessions = self.state.sessions.lock();
            if let Some(session) = sessions.get_by_customer(customer_id) {
                let session_id = session.session_id.clone();
                if let Err(e) = sessions.abandon_session(&session_id) {
                    warn!(customer_id = %customer_id, error = %e, "abandon_after_cart_expiry_failed");
                }
            }
            drop(sessions);
            self.state.tracker.lock().clear_history(Some(customer_id));
        }
    }

    /// Poll one camera until shutdown; timeouts mean an idle camera,
    /// an unknown camera ends the task.
    pub async fn run_camera(
        self: Arc<Self>,
        orchestrator: Arc<CameraOrchestrator>,
        camera_id: CameraId,
        poll: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(camera_id = %camera_id, "camera_task_started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                result = orchestrator.get_frame(&camera_id, poll) => match result {
                    Ok(tagged) => {
                        if let Err(e) = self.process_frame(&tagged).await {
                            match e {
                                CoreError::NotFound(_) => {
                                    debug!(camera_id = %camera_id, error = %e, "frame_skipped");
                                }
                                _ => error!(camera_id = %camera_id, error = %e, "frame_processing_failed"),
                            }
                        }
                    }
                    Err(CoreError::Timeout(_)) => {}
                    Err(e) => {
                        error!(camera_id = %camera_id, error = %e, "camera_task_stopped");
                        break;
                    }
                },
            }
        }
        info!(camera_id = %camera_id, "camera_task_finished");
    }

    /// Periodic expiry sweep until shutdown
    pub async fn run_cleanup(
        self: Arc<Self>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => self.cleanup(),
            }
        }
    }
}
