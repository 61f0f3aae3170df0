//! # bgdl
//!
//! A single-slot background downloader. One transfer runs at a time; start
//! requests made while it is in flight are rejected. The transfer survives
//! process restarts: a relaunched process resumes the staged bytes with a
//! range request and is told once every pending event has been delivered.
//!
//! - [`coordinator::TransferCoordinator`] owns the slot and the lifecycle.
//! - [`session::BackgroundSession`] is the HTTP transport behind it.
//! - [`store::ResultStore`] moves finished files into the download directory.

pub mod cli;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod observer;
pub mod session;
pub mod state;
pub mod store;
pub mod task;
pub mod transport;
pub mod utils;

pub use config::Settings;
pub use coordinator::TransferCoordinator;
pub use error::{StoreError, TransferError, TransportError};
pub use observer::{EventSink, TransferEvent};
pub use session::BackgroundSession;
pub use store::ResultStore;
pub use task::{TaskHandle, TaskId, TaskState, TransferTask};
