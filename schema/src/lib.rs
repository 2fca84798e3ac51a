//! Schema definitions for Tandem
//!
//! This crate contains the data structures shared between the supervisor
//! core and the host binary. All types here implement JSON Schema
//! generation for external consumption.

pub mod config;
pub mod server;

pub use config::*;
pub use server::*;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Log stream identifier for captured child output
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LogStream {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

impl LogStream {
    /// Short identifier used in logs
    pub fn as_str(self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
        }
    }
}

/// Current time as an RFC3339 string with second precision
pub fn current_timestamp() -> String {
    humantime::format_rfc3339_seconds(SystemTime::now()).to_string()
}
