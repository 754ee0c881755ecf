//! Temporal pick/return event inference
//!
//! Converts noisy per-frame detections into discrete events per
//! (customer, product) key. Each key holds a sliding window of "seen"
//! timestamps: the first marker into an empty history fires a pick;
//! an established key (at least 3 markers in the window) that is
//! absent from the current batch for longer than the minimum hold
//! duration fires a return. Requiring 3 prior observations suppresses
//! single-frame detector flicker.

use crate::domain::{CameraId, CustomerId, Detection, EventKind, ProductEvent};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use tracing::{debug, info};

/// Sliding detection window (ms)
pub const DEFAULT_DETECTION_WINDOW_MS: u64 = 2_000;
/// Minimum absence before a return fires (ms)
pub const DEFAULT_MIN_RETURN_MS: u64 = 500;
/// Absence carries no measured confidence; returns use this default
pub const DEFAULT_RETURN_CONFIDENCE: f32 = 0.8;

/// Markers established presence must reach before a return can fire
const RETURN_MIN_MARKERS: usize = 3;
/// Cap on markers retained per key
const HISTORY_CAP: usize = 100;
/// Bounded ring of retained events
const EVENT_LOG_CAP: usize = 1_000;

pub struct EventTracker {
    detection_window_ms: u64,
    min_return_ms: u64,
    return_confidence: f32,
    /// Per (customer, product): time-ordered "seen" markers
    history: FxHashMap<(CustomerId, String), VecDeque<u64>>,
    /// Ring of the most recent emitted events
    recent: VecDeque<ProductEvent>,
}

impl EventTracker {
    pub fn new(detection_window_ms: u64, min_return_ms: u64, return_confidence: f32) -> Self {
        Self {
            detection_window_ms,
            min_return_ms,
            return_confidence,
            history: FxHashMap::default(),
            recent: VecDeque::with_capacity(EVENT_LOG_CAP),
        }
    }

    /// Process one detection batch for a customer at time `ts_ms`,
    /// returning any events it triggers.
    pub fn process_detections(
        &mut self,
        customer_id: &CustomerId,
        detections: &[Detection],
        ts_ms: u64,
        camera_id: &CameraId,
    ) -> Vec<ProductEvent> {
        let mut events = Vec::new();

        // Best confidence per currently-detected label
        let mut current: FxHashMap<&str, f32> = FxHashMap::default();
        for d in detections {
            let entry = current.entry(d.label.as_str()).or_insert(d.confidence);
            if d.confidence > *entry {
                *entry = d.confidence;
            }
        }

        // Record a marker for every detected product; the first
        // marker into an otherwise-empty history is a pick. This
        // avoids re-firing on every frame while an item stays in view.
        for (label, confidence) in &current {
            let key = (customer_id.clone(), label.to_string());
            let markers = self.history.entry(key).or_default();
            prune(markers, ts_ms, self.detection_window_ms);

            if markers.is_empty() {
                let event = ProductEvent {
                    kind: EventKind::Pick,
                    label: label.to_string(),
                    customer_id: customer_id.clone(),
                    ts_ms,
                    confidence: *confidence,
                    camera_id: camera_id.clone(),
                };
                info!(
                    customer_id = %customer_id,
                    label = %label,
                    confidence = %confidence,
                    camera_id = %camera_id,
                    "pick_event"
                );
                events.push(event);
            }

            if markers.len() == HISTORY_CAP {
                markers.pop_front();
            }
            markers.push_back(ts_ms);
        }

        // Established keys absent from this batch: candidate returns
        let absent: Vec<String> = self
            .history
            .keys()
            .filter(|(cust, label)| cust == customer_id && !current.contains_key(label.as_str()))
            .map(|(_, label)| label.clone())
            .collect();

        for label in absent {
            let key = (customer_id.clone(), label.clone());
            let Some(markers) = self.history.get_mut(&key) else { continue };
            prune(markers, ts_ms, self.detection_window_ms);

            if markers.is_empty() {
                self.history.remove(&key);
                continue;
            }

            let last_seen = *markers.back().expect("non-empty markers");
            // saturating: frames can arrive newest-first across polls
            let gap_ms = ts_ms.saturating_sub(last_seen);
            if markers.len() >= RETURN_MIN_MARKERS && gap_ms >= self.min_return_ms {
                let event = ProductEvent {
                    kind: EventKind::Return,
                    label: label.clone(),
                    customer_id: customer_id.clone(),
                    ts_ms,
                    confidence: self.return_confidence,
                    camera_id: camera_id.clone(),
                };
                info!(
                    customer_id = %customer_id,
                    label = %label,
                    gap_ms = %gap_ms,
                    camera_id = %camera_id,
                    "return_event"
                );
                events.push(event);
                // One disappearance, one return: the key restarts
                // from scratch (the next sighting is a fresh pick)
                self.history.remove(&key);
            }
        }

        for event in &events {
            if self.recent.len() == EVENT_LOG_CAP {
                self.recent.pop_front();
            }
            self.recent.push_back(event.clone());
        }

        events
    }

    /// Filtered view of the retained event log
    pub fn recent_events(
        &self,
        customer_id: Option<&CustomerId>,
        kind: Option<EventKind>,
        since_ms: Option<u64>,
    ) -> Vec<ProductEvent> {
        self.recent
            .iter()
            .filter(|e| customer_id.map_or(true, |c| &e.customer_id == c))
            .filter(|e| kind.map_or(true, |k| e.kind == k))
            .filter(|e| since_ms.map_or(true, |t| e.ts_ms >= t))
            .cloned()
            .collect()
    }

    /// Reset tracking state for one customer, or all (used on
    /// session end)
    pub fn clear_history(&mut self, customer_id: Option<&CustomerId>) {
        match customer_id {
            Some(customer) => {
                self.history.retain(|(cust, _), _| cust != customer);
                debug!(customer_id = %customer, "history_cleared");
            }
            None => {
                self.history.clear();
                debug!("history_cleared_all");
            }
        }
    }

    pub fn tracked_keys(&self) -> usize {
        self.history.len()
    }
}

impl Default for EventTracker {
    fn default() -> Self {
        Self::new(DEFAULT_DETECTION_WINDOW_MS, DEFAULT_MIN_RETURN_MS, DEFAULT_RETURN_CONFIDENCE)
    }
}

fn prune(markers: &mut VecDeque<u64>, now_ms: u64, window_ms: u64) {
    while let Some(&oldest) = markers.front() {
        if now_ms.saturating_sub(oldest) > window_ms {
            markers.pop_front();
        } else {
            break;
        }
    }
}
