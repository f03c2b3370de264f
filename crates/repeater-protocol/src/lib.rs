//! # repeater-protocol
//!
//! Framing shared by the repeater's transports.
//!
//! This crate provides:
//! - Console line assembly and response rendering (`\r\n` lines, `CMD>` prompt)
//! - Access classification of network peers against `config_access`
//! - Mapping of web query parameters onto console command lines
//! - The configuration and unlock HTML pages

pub mod access;
pub mod console;
pub mod web;

pub use access::{classify, Access};
pub use console::{render, FrameError, LineAssembler, MAX_LINE, PROMPT};
pub use web::{config_page, escape_token, unlock_page, PageValues, TelemetryValues, WebRequest};
