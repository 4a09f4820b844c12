// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Centralized message types for structured logging and tracing.
//!
//! Every diagnostic event with operational meaning gets a struct here
//! rather than an ad-hoc format string at the call site. Each type
//! implements:
//!
//! * `Display` - Human-readable output (supports future i18n)
//! * `StructuredLog` - Machine-readable fields + span creation
//!
//! # Organization
//!
//! * `engine` - reactor / executor lifecycle events
//! * `cluster` - master / agent control-plane events
//!
//! # Usage
//! ```rust
//! use rill::observability::messages::{StructuredLog, cluster::FrontierReceived};
//!
//! FrontierReceived { graph: 3, stream: 17 }.log();
//! ```

pub mod cluster;
pub mod engine;

use tracing::Span;

/// Trait for messages that support structured logging and tracing.
///
/// `log` emits the human-readable message together with the structured
/// fields at the level the message's meaning calls for; `span` wraps the
/// same fields into a tracing span for longer-lived context.
pub trait StructuredLog {
    /// Emit a log event with structured fields.
    fn log(&self);

    /// Create a span with this message's fields as attributes.
    fn span(&self, name: &str) -> Span;
}
