// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Observability module for structured logging and tracing.
//!
//! This module provides centralized message types for all diagnostic and
//! operational logging in the engine and the control plane. Message types
//! follow a struct-based pattern with `Display` implementations to:
//!
//! * Eliminate magic strings scattered throughout the codebase
//! * Enable future internationalization without code changes
//! * Keep log levels consistent per event, not per call site
//!
//! # Architecture
//!
//! Messages are organized by subsystem:
//! * `messages::engine` - reactor / executor lifecycle events
//! * `messages::cluster` - master / agent control-plane events

pub mod messages;
