// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;

/// Errors that can occur while loading deployment settings.
#[derive(Debug)]
pub enum SettingsError {
    /// The settings file could not be read from disk.
    UnreadableFile {
        path: String,
        source: std::io::Error,
    },
    /// The settings file is not valid YAML for the expected shape.
    Malformed {
        path: String,
        source: serde_yaml::Error,
    },
    /// A DTC_* variable was present but unparsable.
    BadVariable {
        name: &'static str,
        value: String,
    },
    /// A variable the current execution mode requires is missing.
    MissingVariable { name: &'static str },
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::UnreadableFile { path, source } => {
                write!(f, "cannot read settings file '{}': {}", path, source)
            }
            SettingsError::Malformed { path, source } => {
                write!(f, "settings file '{}' is malformed: {}", path, source)
            }
            SettingsError::BadVariable { name, value } => {
                write!(f, "environment variable {} has unusable value '{}'", name, value)
            }
            SettingsError::MissingVariable { name } => {
                write!(f, "required environment variable {} is not set", name)
            }
        }
    }
}

impl std::error::Error for SettingsError {}
