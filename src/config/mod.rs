//! Configuration module for the craft supervisor.
//!
//! This module handles parsing, validation, and access to the supervisor's
//! settings and to the child-process services it should launch. Configuration
//! is JSON, loaded from a file or a string.
//!
//! # Examples
//!
//! Loading a configuration from a file:
//!
//! ```no_run
//! use craft_supervisor::config::{Config, validate_config};
//!
//! let config = Config::from_file("config.json").unwrap();
//! validate_config(&config).unwrap();
//! println!("Loaded configuration with {} services", config.services.len());
//! ```
//!
//! Creating a configuration programmatically:
//!
//! ```
//! use craft_supervisor::config::{Config, ServiceConfig, SupervisorSettings};
//! use std::collections::HashMap;
//!
//! let mut services = HashMap::new();
//! services.insert("vpn-monitor".to_string(), ServiceConfig {
//!     command: "vpn-watch".to_string(),
//!     args: vec![],
//!     env: HashMap::new(),
//!     working_dir: None,
//!     stop_command: None,
//!     kill_timeout_secs: 5,
//! });
//!
//! let config = Config {
//!     supervisor: SupervisorSettings { max_restarts: 3, ..Default::default() },
//!     services,
//! };
//! assert_eq!(config.supervisor.restart_window_secs, 3600);
//! ```
mod parser;
pub mod validator;

pub use parser::{Config, ServiceConfig, SupervisorSettings};
pub use validator::validate_config;
