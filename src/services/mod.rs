//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `directory` - Data-access traits the pipeline depends on
//! - `registry` - Live push connection per user
//! - `dispatch` - Route computation and alert fan-out
//! - `ingest` - Reading classification and async ingest worker

pub mod directory;
pub mod dispatch;
pub mod ingest;
pub mod registry;

// Re-export commonly used types
pub use directory::StoreError;
pub use dispatch::{AlertDispatcher, Directories, DispatchError, DispatchOutcome};
pub use ingest::{create_ingest_worker, try_enqueue, Ingest, IngestOutcome, IngestWorker, QueuedReading};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
