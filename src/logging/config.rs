//! Logging configuration
//!
//! Per-component log levels, output destinations and presets.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    pub global_level: String,

    /// Enable console output
    pub console_output: bool,

    /// Directory for daily-rolled JSON log files (None = no file logging)
    pub log_directory: Option<PathBuf>,

    /// Include file location in logs
    pub include_file_location: bool,

    /// Image source loading and series selection
    pub source_level: String,

    /// Landmark solver and feature matching
    pub registration_level: String,

    /// Canvas planning and slice placement
    pub composite_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            global_level: "info".to_string(),
            console_output: true,
            log_directory: None,
            include_file_location: false,
            source_level: "info".to_string(),
            registration_level: "info".to_string(),
            composite_level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Verbose console logging plus JSON files under `logs/`
    pub fn development() -> Self {
        Self {
            global_level: "debug".to_string(),
            console_output: true,
            log_directory: Some(PathBuf::from("logs")),
            include_file_location: true,
            source_level: "debug".to_string(),
            registration_level: "trace".to_string(),
            composite_level: "debug".to_string(),
        }
    }

    /// Warnings only, files only
    pub fn production() -> Self {
        Self {
            global_level: "warn".to_string(),
            console_output: false,
            log_directory: Some(PathBuf::from("/var/log/stack-alignment")),
            include_file_location: false,
            source_level: "info".to_string(),
            registration_level: "info".to_string(),
            composite_level: "info".to_string(),
        }
    }

    /// Map a `-v` count onto a preset-independent global level.
    pub fn with_verbosity(mut self, verbose: u8) -> Self {
        let level = match verbose {
            0 => return self,
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        self.global_level = level.to_string();
        self.source_level = level.to_string();
        self.registration_level = level.to_string();
        self.composite_level = level.to_string();
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, level) in [
            ("global_level", &self.global_level),
            ("source_level", &self.source_level),
            ("registration_level", &self.registration_level),
            ("composite_level", &self.composite_level),
        ] {
            if !VALID_LEVELS.contains(&level.as_str()) {
                return Err(format!(
                    "Invalid {}: {}. Must be one of: {:?}",
                    name, level, VALID_LEVELS
                ));
            }
        }

        if let Some(ref log_dir) = self.log_directory {
            if let Some(parent) = log_dir.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(format!("Log directory parent does not exist: {:?}", parent));
                }
            }
        }

        Ok(())
    }

    /// Effective log level for a component module
    pub fn get_component_level(&self, component: &str) -> &str {
        match component {
            "source" => &self.source_level,
            "registration" | "algorithms" => &self.registration_level,
            "compositor" | "composite" => &self.composite_level,
            _ => &self.global_level,
        }
    }

    /// `EnvFilter` directives for this crate and its components.
    pub fn filter_directives(&self) -> String {
        let krate = env!("CARGO_PKG_NAME").replace('-', "_");
        let mut directives = format!("{krate}={}", self.global_level);
        for component in ["source", "registration", "algorithms", "compositor"] {
            directives.push_str(&format!(",{krate}::{component}={}", self.get_component_level(component)));
        }
        directives
    }
}
