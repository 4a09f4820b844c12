// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod policy;
mod settings;

pub use policy::{
    Policy, DEFAULT_AGENT_LISTENER_PORT, DEFAULT_FRONTIER_LISTENER_PORT,
    DEFAULT_GRAPH_LISTENER_PORT, DEFAULT_HOST, DEFAULT_SHELL_LISTENER_PORT,
    DEFAULT_WEBUI_LISTENER_PORT,
};
pub use settings::{apply_settings, load_settings, load_settings_file, Settings, ENV_SETTINGS_FILE};
