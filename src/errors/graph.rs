// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;

use crate::graph::Key;

/// Errors raised while composing a graph through the builder API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A stream was routed through a placeholder with no usable port.
    DanglingPlaceHolder {
        /// The fixed endpoint the stream was being attached to.
        endpoint: Key,
    },
    /// A prober referenced a vertex key that was never created.
    UnknownVertex { vertex: Key },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::DanglingPlaceHolder { endpoint } => {
                write!(f, "cannot route a stream to {} through an unbound placeholder", endpoint)
            }
            GraphError::UnknownVertex { vertex } => {
                write!(f, "vertex {} does not exist in this graph", vertex)
            }
        }
    }
}

impl std::error::Error for GraphError {}
