// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod archive;    // recursive binary codec + length-prefixed packager
pub mod cluster;    // master, agent, scheduler, container
pub mod config;     // DTC_* runtime policy + settings file
pub mod engine;     // event, reactor, executor
pub mod errors;     // error handling
pub mod graph;      // user-facing graph + builders
pub mod observability;
pub mod proto;      // wire messages live here
pub mod transport;  // device, stream buffers, channel
