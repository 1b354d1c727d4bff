//! One-shot `twm` queries
//!
//! Each query runs `twm --format json <subcommand> [args...]` to completion
//! and decodes the single response envelope it prints:
//!
//! ```text
//! {"type": "success", "data": {...}}
//! {"type": "error", "message": "no such workspace", "code": "NOT_FOUND"}
//! ```

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{CommandError, SpawnError};
use crate::payload::{Handle, Payload};
use crate::transport::Tool;
use crate::types::{MonitorInfo, VersionInfo, WindowInfo, WorkspaceInfo};

/// Message used when a failed process leaves no usable explanation
const NO_DETAILS: &str = "no error details";

/// Response envelope printed by every non-streaming subcommand
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Envelope {
    Success {
        #[serde(default)]
        data: Value,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        code: Option<Value>,
    },
}

/// Client for request/response calls to the `twm` CLI
///
/// Cheap to clone; every call spawns a fresh process.
///
/// # Example
///
/// ```ignore
/// let client = CommandClient::new(Tool::default());
/// for ws in client.workspaces().await? {
///     println!("{} ({} windows)", ws.name.as_deref().unwrap_or("?"), ws.window_count);
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct CommandClient {
    tool: Tool,
    timeout: Option<Duration>,
}

impl CommandClient {
    pub fn new(tool: Tool) -> Self {
        Self {
            tool,
            timeout: None,
        }
    }

    /// Bound each query by `timeout`; the child is killed when it elapses
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn tool(&self) -> &Tool {
        &self.tool
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run `<tool> --format json <args...>` and return the response `data`
    ///
    /// A success envelope without `data` returns `Value::Null`.
    ///
    /// # Errors
    ///
    /// Returns `CommandError::ToolNotFound` if the executable is missing,
    /// `CommandError::ProcessFailed` on a non-zero exit (even when stdout
    /// is garbage), `CommandError::MalformedResponse` for output that is
    /// not a known envelope, `CommandError::Rejected` for an error envelope
    /// and `CommandError::TimedOut` if a configured timeout elapses.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let data = client.query(["workspaces"]).await?;
    /// ```
    pub async fn query<I, S>(&self, args: I) -> Result<Value, CommandError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();
        debug!(program = %self.tool.program(), ?args, "Running twm query");

        let child = self
            .tool
            .command(&args)
            .spawn()
            .map_err(|e| SpawnError::from_io(self.tool.program(), e))?;

        // Dropping the output future drops the child, which kills it
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| CommandError::TimedOut { after: limit })?,
            None => child.wait_with_output().await,
        }
        .map_err(CommandError::Io)?;

        for line in String::from_utf8_lossy(&output.stderr).lines() {
            let line = line.trim_end();
            if !line.is_empty() {
                warn!(target: "twm_ipc::tool", program = %self.tool.program(), "{}", line);
            }
        }

        decode_response(output.status.code(), &output.stdout, &output.stderr)
    }

    /// The focused window, or `None` when nothing has focus
    pub async fn active_window(&self) -> Result<Option<WindowInfo>, CommandError> {
        match self.query(["active-window"]).await? {
            Value::Null => Ok(None),
            Value::Object(map) => Ok(Some(WindowInfo::from_payload(&Payload::from(map)))),
            other => Err(unexpected("active-window", &other)),
        }
    }

    /// All workspaces across all monitors
    pub async fn workspaces(&self) -> Result<Vec<WorkspaceInfo>, CommandError> {
        let data = self.query(["workspaces"]).await?;
        Ok(records("workspaces", data)?
            .iter()
            .map(WorkspaceInfo::from_payload)
            .collect())
    }

    /// Managed windows, optionally restricted to one workspace
    pub async fn windows(&self, workspace: Option<u64>) -> Result<Vec<WindowInfo>, CommandError> {
        let mut args = vec!["windows".to_string()];
        if let Some(workspace) = workspace {
            args.push("--workspace".to_string());
            args.push(workspace.to_string());
        }

        let data = self.query(&args).await?;
        Ok(records("windows", data)?
            .iter()
            .map(WindowInfo::from_payload)
            .collect())
    }

    pub async fn monitors(&self) -> Result<Vec<MonitorInfo>, CommandError> {
        let data = self.query(["monitors"]).await?;
        Ok(records("monitors", data)?
            .iter()
            .map(MonitorInfo::from_payload)
            .collect())
    }

    pub async fn version(&self) -> Result<VersionInfo, CommandError> {
        match self.query(["version"]).await? {
            Value::Object(map) => Ok(VersionInfo::from_payload(&Payload::from(map))),
            other => Err(unexpected("version", &other)),
        }
    }

    /// Check that the window manager is answering
    pub async fn ping(&self) -> Result<(), CommandError> {
        self.query(["ping"]).await.map(|_| ())
    }

    pub async fn switch_workspace(&self, id: u64) -> Result<(), CommandError> {
        self.query(["workspace".to_string(), id.to_string()])
            .await
            .map(|_| ())
    }

    pub async fn focus_window(&self, hwnd: &Handle) -> Result<(), CommandError> {
        self.query(["focus".to_string(), hwnd.as_arg()])
            .await
            .map(|_| ())
    }

    pub async fn move_window(&self, hwnd: &Handle, workspace: u64) -> Result<(), CommandError> {
        self.query(["move".to_string(), hwnd.as_arg(), workspace.to_string()])
            .await
            .map(|_| ())
    }

    /// Close `hwnd`, or the focused window when `None`
    pub async fn close_window(&self, hwnd: Option<&Handle>) -> Result<(), CommandError> {
        self.query(window_action("close", hwnd)).await.map(|_| ())
    }

    /// Toggle floating for `hwnd`, or the focused window when `None`
    pub async fn toggle_floating(&self, hwnd: Option<&Handle>) -> Result<(), CommandError> {
        self.query(window_action("toggle-float", hwnd))
            .await
            .map(|_| ())
    }
}

impl From<&twm_ipc_config::ToolConfig> for CommandClient {
    fn from(config: &twm_ipc_config::ToolConfig) -> Self {
        let client = CommandClient::new(Tool::new(config.program.clone()));
        match config.timeout_ms {
            Some(ms) => client.with_timeout(Duration::from_millis(ms)),
            None => client,
        }
    }
}

/// Interpret the result of a finished query process
///
/// `exit_code` is `None` when the process was killed by a signal. On a
/// failed exit the message comes from an error envelope on stdout if one
/// decodes, else from the last line of stderr, else a generic text.
///
/// # Errors
///
/// See [`CommandClient::query`].
pub fn decode_response(
    exit_code: Option<i32>,
    stdout: &[u8],
    stderr: &[u8],
) -> Result<Value, CommandError> {
    let envelope = parse_envelope(stdout);

    if exit_code != Some(0) {
        let message = match envelope {
            Ok(Envelope::Error {
                message: Some(message),
                ..
            }) => message,
            _ => last_line(stderr).unwrap_or_else(|| NO_DETAILS.to_string()),
        };
        return Err(CommandError::ProcessFailed {
            code: exit_code,
            message,
        });
    }

    match envelope? {
        Envelope::Success { data } => Ok(data),
        Envelope::Error { message, code } => Err(CommandError::Rejected {
            message: message.unwrap_or_else(|| NO_DETAILS.to_string()),
            code: code.and_then(|code| match code {
                Value::Null => None,
                Value::String(code) => Some(code),
                other => Some(other.to_string()),
            }),
        }),
    }
}

fn parse_envelope(stdout: &[u8]) -> Result<Envelope, CommandError> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Err(CommandError::MalformedResponse {
            reason: "empty output".to_string(),
        });
    }

    serde_json::from_slice(stdout).map_err(|e| CommandError::MalformedResponse {
        reason: e.to_string(),
    })
}

fn last_line(bytes: &[u8]) -> Option<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(str::to_string)
}

/// Split a listing into its records
///
/// `null` reads as an empty listing. Entries that are not objects are
/// skipped.
fn records(what: &str, data: Value) -> Result<Vec<Payload>, CommandError> {
    let entries = match data {
        Value::Null => return Ok(Vec::new()),
        Value::Array(entries) => entries,
        other => return Err(unexpected(what, &other)),
    };

    Ok(entries
        .into_iter()
        .filter_map(|entry| match entry {
            Value::Object(map) => Some(Payload::from(map)),
            other => {
                warn!("Skipping non-object {} entry: {}", what, other);
                None
            }
        })
        .collect())
}

fn unexpected(what: &str, data: &Value) -> CommandError {
    CommandError::MalformedResponse {
        reason: format!("unexpected `{}` data: {}", what, data),
    }
}

fn window_action(subcommand: &str, hwnd: Option<&Handle>) -> Vec<String> {
    let mut args = vec![subcommand.to_string()];
    if let Some(hwnd) = hwnd {
        args.push("--window".to_string());
        args.push(hwnd.as_arg());
    }
    args
}
