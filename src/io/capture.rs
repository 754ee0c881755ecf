//! Capture unit - per-camera frame production
//!
//! Each unit owns one `FrameSource` and one bounded frame buffer.
//! The capture task pushes timestamped frames; when the buffer is
//! full the oldest frame is dropped, since a stale frame has no
//! tracking value. Transient read failures are retried after a short
//! backoff rather than killing the pipeline.

use crate::domain::{epoch_ms, CameraId, CoreError, Frame};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration, Instant};
use tracing::{debug, info, warn};

/// Default frame buffer capacity
pub const DEFAULT_BUFFER_CAPACITY: usize = 10;

/// Backoff after a failed source read
const READ_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Inter-frame intervals kept for the rolling FPS estimate
const FPS_SAMPLE_COUNT: usize = 30;

/// A camera source, opened and read by exactly one capture unit.
///
/// `read` returns `Ok(None)` when the source is exhausted (file or
/// script playback); a live camera never returns `None`.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn open(&mut self) -> anyhow::Result<()>;
    async fn read(&mut self) -> anyhow::Result<Option<Bytes>>;
    async fn close(&mut self);
}

/// Bounded single-producer/single-consumer frame buffer with
/// overwrite-on-full (drop-oldest) semantics.
pub struct FrameBuffer {
    capacity: usize,
    inner: Mutex<VecDeque<Frame>>,
    notify: Notify,
    dropped: AtomicU64,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Push a frame, dropping the oldest buffered frame when full
    pub fn push(&self, frame: Frame) {
        {
            let mut buf = self.inner.lock();
            if buf.len() == self.capacity {
                buf.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            buf.push_back(frame);
        }
        self.notify.notify_one();
    }

    /// Take the most recent buffered frame, waiting up to `wait`
    pub async fn pop_newest(&self, wait: Duration) -> Result<Frame, CoreError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(frame) = self.inner.lock().pop_back() {
                return Ok(frame);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(CoreError::Timeout(wait));
            }
            let notified = self.notify.notified();
            // Re-check: a push may have landed between the lock
            // release and registering for notification
            if let Some(frame) = self.inner.lock().pop_back() {
                return Ok(frame);
            }
            if timeout(deadline - now, notified).await.is_err() {
                return Err(CoreError::Timeout(wait));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Frames discarded by the drop-oldest policy
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn buffered_seqs(&self) -> Vec<u64> {
        self.inner.lock().iter().map(|f| f.seq).collect()
    }
}

/// Rolling FPS estimate over the last `FPS_SAMPLE_COUNT` inter-frame
/// intervals
struct FpsEstimator {
    state: Mutex<FpsState>,
}

struct FpsState {
    last_ms: Option<u64>,
    intervals: VecDeque<u64>,
}

impl FpsEstimator {
    fn new() -> Self {
        Self {
            state: Mutex::new(FpsState {
                last_ms: None,
                intervals: VecDeque::with_capacity(FPS_SAMPLE_COUNT),
            }),
        }
    }

    fn record(&self, ts_ms: u64) {
        let mut state = self.state.lock();
        if let Some(last) = state.last_ms {
            let interval = ts_ms.saturating_sub(last);
            if state.intervals.len() == FPS_SAMPLE_COUNT {
                state.intervals.pop_front();
            }
            state.intervals.push_back(interval);
        }
        state.last_ms = Some(ts_ms);
    }

    fn fps(&self) -> f64 {
        let state = self.state.lock();
        let sum_ms: u64 = state.intervals.iter().sum();
        if sum_ms == 0 {
            return 0.0;
        }
        state.intervals.len() as f64 * 1000.0 / sum_ms as f64
    }
}

/// Owns one camera source and produces frames into its buffer
pub struct CaptureUnit {
    camera_id: CameraId,
    name: String,
    buffer: Arc<FrameBuffer>,
    fps: Arc<FpsEstimator>,
    frames_produced: Arc<AtomicU64>,
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl CaptureUnit {
    pub fn new(camera_id: CameraId, name: &str, buffer_capacity: usize) -> Self {
        Self {
            camera_id,
            name: name.to_string(),
            buffer: Arc::new(FrameBuffer::new(buffer_capacity)),
            fps: Arc::new(FpsEstimator::new()),
            frames_produced: Arc::new(AtomicU64::new(0)),
            stop_tx: None,
            task: None,
        }
    }

    /// Open the source and begin producing frames.
    ///
    /// Fails with `SourceUnavailable` when the device cannot be
    /// opened; already-started units are a warn-logged no-op.
    pub async fn start(&mut self, mut source: Box<dyn FrameSource>) -> Result<(), CoreError> {
        if self.task.is_some() {
            warn!(camera_id = %self.camera_id, "capture_already_running");
            return Ok(());
        }

        source
            .open()
            .await
            .map_err(|e| CoreError::SourceUnavailable(format!("{}: {e}", self.camera_id)))?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let camera_id = self.camera_id.clone();
        let buffer = self.buffer.clone();
        let fps = self.fps.clone();
        let produced = self.frames_produced.clone();

        info!(camera_id = %camera_id, name = %self.name, "capture_started");
        self.task = Some(tokio::spawn(async move {
            capture_loop(camera_id, source, buffer, fps, produced, stop_rx).await;
        }));
        self.stop_tx = Some(stop_tx);
        Ok(())
    }

    /// Release the source and drain the buffer. Safe to call at any
    /// time, including on a never-started unit.
    pub async fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.buffer.clear();
        info!(camera_id = %self.camera_id, "capture_stopped");
    }

    /// Most recent buffered frame, or `Timeout`
    pub async fn get_frame(&self, wait: Duration) -> Result<Frame, CoreError> {
        self.buffer.pop_newest(wait).await
    }

    pub fn camera_id(&self) -> &CameraId {
        &self.camera_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Live frames-per-second estimate
    pub fn current_fps(&self) -> f64 {
        self.fps.fps()
    }

    pub fn frames_produced(&self) -> u64 {
        self.frames_produced.load(Ordering::Relaxed)
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn frames_dropped(&self) -> u64 {
        self.buffer.dropped()
    }
}

async fn capture_loop(
    camera_id: CameraId,
    mut source: Box<dyn FrameSource>,
    buffer: Arc<FrameBuffer>,
    fps: Arc<FpsEstimator>,
    produced: Arc<AtomicU64>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut seq: u64 = 0;
    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    break;
                }
            }
            result = source.read() => match result {
                Ok(Some(image)) => {
                    let ts_ms = epoch_ms();
                    fps.record(ts_ms);
                    buffer.push(Frame { camera_id: camera_id.clone(), seq, ts_ms, image });
                    produced.fetch_add(1, Ordering::Relaxed);
                    seq += 1;
                }
                Ok(None) => {
                    info!(camera_id = %camera_id, frames = %seq, "source_exhausted");
                    // Idle until stopped; the unit stays registered
                    while stop_rx.changed().await.is_ok() {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                    break;
                }
                Err(e) => {
                    warn!(camera_id = %camera_id, error = %e, "frame_read_failed");
                    tokio::select! {
                        _ = stop_rx.changed() => {
                            if *stop_rx.borrow() {
                                break;
                            }
                        }
                        _ = sleep(READ_RETRY_BACKOFF) => {}
                    }
                }
            }
        }
    }
    source.close().await;
    debug!(camera_id = %camera_id, "capture_loop_exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticSource {
        frames: Vec<Bytes>,
        fail_open: bool,
    }

    #[async_trait]
    impl FrameSource for StaticSource {
        async fn open(&mut self) -> anyhow::Result<()> {
            if self.fail_open {
                anyhow::bail!("device busy");
            }
            Ok(())
        }

        async fn read(&mut self) -> anyhow::Result<Option<Bytes>> {
            if self.frames.is_empty() {
                return Ok(None);
            }
            Ok(Some(self.frames.remove(0)))
        }

        async fn close(&mut self) {}
    }

    fn frame(seq: u64) -> Frame {
        Frame {
            camera_id: CameraId::from("cam-1"),
            seq,
            ts_ms: 1_000 + seq,
            image: Bytes::new(),
        }
    }

    #[test]
    fn test_buffer_never_exceeds_capacity() {
        let buffer = FrameBuffer::new(10);
        for seq in 0..100 {
            buffer.push(frame(seq));
            assert!(buffer.len() <= 10);
        }
        // Drop-oldest: the most recently captured frames remain
        assert_eq!(buffer.buffered_seqs(), (90..100).collect::<Vec<_>>());
        assert_eq!(buffer.dropped(), 90);
    }

    #[tokio::test]
    async fn test_pop_newest_returns_latest() {
        let buffer = FrameBuffer::new(5);
        buffer.push(frame(0));
        buffer.push(frame(1));
        buffer.push(frame(2));

        let got = buffer.pop_newest(Duration::from_millis(10)).await.unwrap();
        assert_eq!(got.seq, 2);
    }

    #[tokio::test]
    async fn test_pop_newest_times_out_when_empty() {
        let buffer = FrameBuffer::new(5);
        let result = buffer.pop_newest(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(CoreError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_pop_newest_wakes_on_push() {
        let buffer = Arc::new(FrameBuffer::new(5));
        let pusher = buffer.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            pusher.push(frame(7));
        });

        let got = buffer.pop_newest(Duration::from_secs(1)).await.unwrap();
        assert_eq!(got.seq, 7);
    }

    #[test]
    fn test_fps_estimator_rolling_average() {
        let fps = FpsEstimator::new();
        // 40 frames at 100ms apart; only the last 30 intervals count
        for i in 0..40u64 {
            fps.record(i * 100);
        }
        let estimate = fps.fps();
        assert!((estimate - 10.0).abs() < 0.01, "estimate was {estimate}");
    }

    #[test]
    fn test_fps_estimator_empty() {
        let fps = FpsEstimator::new();
        assert_eq!(fps.fps(), 0.0);
        fps.record(1000);
        assert_eq!(fps.fps(), 0.0);
    }

    #[tokio::test]
    async fn test_start_fails_when_source_unavailable() {
        let mut unit = CaptureUnit::new(CameraId::from("cam-1"), "entrance", 10);
        let source = Box::new(StaticSource { frames: vec![], fail_open: true });

        let result = unit.start(source).await;
        assert!(matches!(result, Err(CoreError::SourceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_capture_produces_and_stop_drains() {
        let mut unit = CaptureUnit::new(CameraId::from("cam-1"), "entrance", 10);
        let source = Box::new(StaticSource {
            frames: vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")],
            fail_open: false,
        });
        unit.start(source).await.unwrap();

        let first = unit.get_frame(Duration::from_secs(1)).await.unwrap();
        assert_eq!(first.camera_id, CameraId::from("cam-1"));

        unit.stop().await;
        assert_eq!(unit.buffered(), 0);
        // Stop again is safe
        unit.stop().await;
    }
}
