//! KDL configuration parser

use std::path::Path;

use crate::error::ConfigError;
use crate::model::*;

/// Parse a configuration file from the given path
pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Parse the configuration file if it exists, otherwise return defaults
///
/// A missing file is the normal case for users who never customised
/// anything; any other IO error is still reported.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_config_str(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Config::default())
        }
        Err(e) => Err(e.into()),
    }
}

/// Parse configuration from a string
pub fn parse_config_str(content: &str) -> Result<Config, ConfigError> {
    let doc: kdl::KdlDocument = content.parse().map_err(|e: kdl::KdlError| {
        // kdl reports spans with its own miette version; rebuild the span for ours
        let offset = e.span.offset();
        let len = e.span.len();
        let span = miette::SourceSpan::from((offset, len));
        ConfigError::ParseError {
            src: content.to_string(),
            span,
            source: e,
        }
    })?;

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "global" => {
                config.global = parse_global(node)?;
            }
            "tool" => {
                config.tool = parse_tool(node)?;
            }
            "listen" => {
                config.listen = parse_listen(node)?;
            }
            name => {
                tracing::warn!("Unknown top-level node: {}", name);
            }
        }
    }

    Ok(config)
}

fn parse_global(node: &kdl::KdlNode) -> Result<GlobalConfig, ConfigError> {
    let mut global = GlobalConfig::default();

    for child in children(node) {
        match child.name().value() {
            "log-level" => {
                let val = string_arg(child)?;
                global.log_level = val
                    .parse()
                    .map_err(|e| ConfigError::Invalid { message: e })?;
            }
            name => {
                tracing::warn!("Unknown global config option: {}", name);
            }
        }
    }

    Ok(global)
}

fn parse_tool(node: &kdl::KdlNode) -> Result<ToolConfig, ConfigError> {
    let mut tool = ToolConfig::default();

    for child in children(node) {
        match child.name().value() {
            "program" => {
                let val = string_arg(child)?;
                if val.trim().is_empty() {
                    return Err(ConfigError::Invalid {
                        message: "tool program must not be empty".to_string(),
                    });
                }
                // Only expand paths; bare names stay as-is for $PATH lookup
                tool.program = shellexpand::tilde(val).into_owned();
            }
            "timeout-ms" => {
                let ms = unsigned_arg(child)?;
                tool.timeout_ms = if ms == 0 { None } else { Some(ms) };
            }
            name => {
                tracing::warn!("Unknown tool config option: {}", name);
            }
        }
    }

    Ok(tool)
}

fn parse_listen(node: &kdl::KdlNode) -> Result<ListenConfig, ConfigError> {
    let mut listen = ListenConfig::default();

    for child in children(node) {
        match child.name().value() {
            "events" => {
                listen.events = parse_event_names(child)?;
            }
            "grace-period-ms" => {
                listen.grace_period_ms = unsigned_arg(child)?;
            }
            "channel-capacity" => {
                let capacity = unsigned_arg(child)?;
                listen.channel_capacity =
                    usize::try_from(capacity).map_err(|_| ConfigError::Invalid {
                        message: format!("channel-capacity {} is too large", capacity),
                    })?;
            }
            "trailing-line" => {
                let val = string_arg(child)?;
                listen.trailing_line = val
                    .parse()
                    .map_err(|e| ConfigError::Invalid { message: e })?;
            }
            "forward-stderr" => {
                listen.forward_stderr = bool_arg(child)?;
            }
            name => {
                tracing::warn!("Unknown listen config option: {}", name);
            }
        }
    }

    Ok(listen)
}

/// Collect `events "a" "b"` arguments, also accepting `events "a,b"`
fn parse_event_names(node: &kdl::KdlNode) -> Result<Vec<String>, ConfigError> {
    let mut events = Vec::new();

    for entry in node.entries().iter().filter(|e| e.name().is_none()) {
        let Some(val) = entry.value().as_string() else {
            return Err(ConfigError::Invalid {
                message: format!("event names must be strings, got {}", entry.value()),
            });
        };
        events.extend(
            val.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string),
        );
    }

    Ok(events)
}

fn children(node: &kdl::KdlNode) -> impl Iterator<Item = &kdl::KdlNode> {
    node.children().into_iter().flat_map(|doc| doc.nodes())
}

fn first_arg(node: &kdl::KdlNode) -> Result<&kdl::KdlValue, ConfigError> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
        .ok_or_else(|| ConfigError::MissingValue {
            field: node.name().value().to_string(),
        })
}

fn string_arg(node: &kdl::KdlNode) -> Result<&str, ConfigError> {
    first_arg(node)?
        .as_string()
        .ok_or_else(|| ConfigError::Invalid {
            message: format!("`{}` expects a string", node.name().value()),
        })
}

fn unsigned_arg(node: &kdl::KdlNode) -> Result<u64, ConfigError> {
    let name = node.name().value();
    let value = first_arg(node)?
        .as_i64()
        .ok_or_else(|| ConfigError::Invalid {
            message: format!("`{}` expects an integer", name),
        })?;

    u64::try_from(value).map_err(|_| ConfigError::Invalid {
        message: format!("`{}` must not be negative, got {}", name, value),
    })
}

fn bool_arg(node: &kdl::KdlNode) -> Result<bool, ConfigError> {
    first_arg(node)?
        .as_bool()
        .ok_or_else(|| ConfigError::Invalid {
            message: format!("`{}` expects true or false", node.name().value()),
        })
}
