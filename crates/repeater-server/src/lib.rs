//! # repeater-server
//!
//! Tokio transports around the repeater engine.
//!
//! This crate provides:
//! - [`EventLoop`], the single task that owns the engine and serializes
//!   every unit of work through one bounded queue
//! - [`EngineHandle`], the cloneable way into that queue
//! - The TCP console server and the serial console
//!
//! Enable features based on target platform:
//! - `tokio-runtime` (default) - For Linux/desktop

#[cfg(feature = "tokio-runtime")]
pub mod console;
#[cfg(feature = "tokio-runtime")]
pub mod event_loop;
#[cfg(feature = "tokio-runtime")]
pub mod serial;

#[cfg(feature = "tokio-runtime")]
pub use console::{ConsoleServer, IDLE_TIMEOUT};
#[cfg(feature = "tokio-runtime")]
pub use event_loop::{EngineHandle, EventLoop, Halted, WebOutcome, QUEUE_DEPTH};
#[cfg(feature = "tokio-runtime")]
pub use serial::run_serial;

pub use repeater_core::{Origin, PowerRequest, Reply, Signal};
