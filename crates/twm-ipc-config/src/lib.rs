//! Configuration parsing for twm-ipc
//!
//! This crate handles parsing the KDL configuration file that tells the
//! event-stream and command clients how to reach the `twm` tool.

mod error;
mod model;
mod parser;

pub use error::ConfigError;
pub use model::*;
pub use parser::{load_config, parse_config, parse_config_str};
