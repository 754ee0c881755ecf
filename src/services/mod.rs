//! Core services - the stateful heart of checkout tracking
//!
//! - `event_tracker` - detections in, pick/return events out
//! - `session_manager` - customer visit lifecycle
//! - `cart` - per-customer running totals
//! - `exit_processor` - payment, receipt, transaction record
//! - `pipeline` - wires frames through all of the above

pub mod cart;
pub mod event_tracker;
pub mod exit_processor;
pub mod pipeline;
pub mod session_manager;

pub use cart::{CartItem, CartSummary, VirtualCart, VirtualCartManager};
pub use event_tracker::EventTracker;
pub use exit_processor::ExitProcessor;
pub use pipeline::{CheckoutPipeline, FrameObservation, FrameProcessor, SharedState};
pub use session_manager::{CustomerSession, SessionManager, SessionStats, SessionStatus};
