//! IO modules - frame acquisition and external system interfaces
//!
//! - `capture` - per-camera frame production into bounded buffers
//! - `orchestrator` - registry and lifecycle for all capture units
//! - `collaborators` - black-box contracts (detection, identification,
//!   pricing, payment, receipts, record persistence)
//! - `synthetic` - scripted sources and matching collaborators
//! - `egress` - transaction output to file (JSONL format)

pub mod capture;
pub mod collaborators;
pub mod egress;
pub mod orchestrator;
pub mod synthetic;

// Re-export commonly used types
pub use capture::{CaptureUnit, FrameBuffer, FrameSource, DEFAULT_BUFFER_CAPACITY};
pub use collaborators::{
    CsvPriceTable, CustomerIdentifier, JsonFileStore, MemoryStore, PaymentGateway, PaymentOutcome,
    PriceLookup, ProductDetector, ReceiptRenderer, RecordStore, TextReceiptRenderer,
};
pub use egress::TransactionLog;
pub use orchestrator::{CameraOrchestrator, CameraStats};
pub use synthetic::{
    FramePayload, Script, ScriptStep, ScriptedSource, SyntheticDetector, SyntheticIdentifier,
};
