//! # repeater-core
//!
//! Configuration and control engine of a dual-role Wi-Fi repeater.
//!
//! This crate provides:
//! - The persisted configuration record and its flash store (plus blob slots)
//! - The command tokenizer and interpreter with its lock state machine
//! - Network control: radio event handling and interface patching
//! - The periodic supervisor (watchdogs, reset button, supply voltage)
//! - A simulated [`Platform`] and in-memory flash for tests and hosts
//!
//! This crate is intentionally runtime-agnostic and contains no async code.
//! Transports feed it [`Signal`]s and route the returned [`Reply`]s.

pub mod addr;
pub mod capabilities;
pub mod command;
pub mod config;
pub mod engine;
pub mod fixed;
pub mod flash;
pub mod netif;
pub mod network;
pub mod platform;
pub mod portmap;
pub mod response;
pub mod signal;
pub mod sim;
pub mod state;
pub mod store;
pub mod supervisor;
pub mod tokenizer;

pub use addr::MacAddr;
pub use capabilities::{Capabilities, Feature};
pub use command::CommandError;
pub use config::ConfigRecord;
pub use engine::Repeater;
pub use fixed::FixedStr;
pub use flash::{Flash, FlashError, MemoryFlash};
pub use platform::Platform;
pub use response::Response;
pub use signal::Signal;
pub use state::{Origin, PowerRequest, Reply, SessionId};
pub use store::{ConfigStore, StoreError};
