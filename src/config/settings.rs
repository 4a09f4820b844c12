// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Optional YAML settings for the master and agent daemons.
//!
//! Deployment knobs that do not belong on the wire live here: bind
//! address, listener ports, and the log filter. Precedence is
//! environment over file over defaults, so an operator can pin one value
//! without rewriting the file.
//!
//! # Example
//! ```yaml
//! bind_host: 10.0.0.7
//! master_host: 10.0.0.1
//! agent_listener_port: 9909
//! graph_listener_port: 9910
//! frontier_listener_port: 9913
//! log_filter: rill=debug
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::config::policy::Policy;
use crate::errors::SettingsError;

/// Name of the variable pointing at the settings file.
pub const ENV_SETTINGS_FILE: &str = "RILL_SETTINGS";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub bind_host: Option<String>,
    pub master_host: Option<String>,
    pub agent_listener_port: Option<u16>,
    pub graph_listener_port: Option<u16>,
    pub frontier_listener_port: Option<u16>,
    pub log_filter: Option<String>,
}

/// Load the settings file named by `RILL_SETTINGS`, or defaults when the
/// variable is unset.
pub fn load_settings() -> Result<Settings, SettingsError> {
    match std::env::var(ENV_SETTINGS_FILE) {
        Ok(path) if !path.is_empty() => load_settings_file(&path),
        _ => Ok(Settings::default()),
    }
}

pub fn load_settings_file(path: impl AsRef<Path>) -> Result<Settings, SettingsError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|source| SettingsError::UnreadableFile {
        path: path.display().to_string(),
        source,
    })?;
    let settings = serde_yaml::from_str(&raw).map_err(|source| SettingsError::Malformed {
        path: path.display().to_string(),
        source,
    })?;
    Ok(settings)
}

/// Fold the settings file underneath the already-parsed environment:
/// anything the environment left at its default may be overridden by the
/// file.
pub fn apply_settings(policy: &mut Policy, settings: &Settings) {
    use crate::config::policy::{
        DEFAULT_AGENT_LISTENER_PORT, DEFAULT_FRONTIER_LISTENER_PORT, DEFAULT_GRAPH_LISTENER_PORT,
        DEFAULT_HOST,
    };

    if policy.this_host == DEFAULT_HOST {
        if let Some(host) = &settings.bind_host {
            policy.this_host = host.clone();
        }
    }
    if policy.master_host == DEFAULT_HOST {
        if let Some(host) = &settings.master_host {
            policy.master_host = host.clone();
        }
    }
    if policy.agent_listener_port == DEFAULT_AGENT_LISTENER_PORT {
        if let Some(port) = settings.agent_listener_port {
            policy.agent_listener_port = port;
        }
    }
    if policy.graph_listener_port == DEFAULT_GRAPH_LISTENER_PORT {
        if let Some(port) = settings.graph_listener_port {
            policy.graph_listener_port = port;
        }
    }
    if policy.frontier_listener_port == DEFAULT_FRONTIER_LISTENER_PORT {
        if let Some(port) = settings.frontier_listener_port {
            policy.frontier_listener_port = port;
        }
    }
}
