//! Client library for the twm window manager
//!
//! The window manager is reached only through its CLI, `twm`:
//!
//! - [`Session`] runs `twm --format json listen` and dispatches each event
//!   line to handlers registered on a [`Dispatcher`]. Malformed lines and
//!   failing handlers are reported and skipped; the stream keeps running
//!   until it is cancelled or the tool closes its output.
//! - [`CommandClient`] runs one-shot queries such as `twm --format json
//!   workspaces` and decodes the response envelope.
//!
//! ## Architecture
//!
//! - `transport`: spawning and stopping the `twm` child process
//! - `lines`: splitting its stdout into lines
//! - `parser`: turning a line into an [`Event`]
//! - `dispatcher`: routing events to handlers
//! - `session`: the supervised stream tying those together
//! - `client`: request/response queries
//! - `types` / `payload`: the data model

mod client;
mod dispatcher;
mod error;
mod lines;
mod parser;
mod payload;
mod session;
mod transport;
mod types;

pub use client::{decode_response, CommandClient};
pub use dispatcher::{Dispatched, Dispatcher, EventHandler};
pub use error::{
    BoxError, CommandError, DecodeCause, DecodeError, HandlerError, HandlerFailure, SessionError,
    SpawnError, TransportError, TruncatedStreamWarning,
};
pub use lines::{DecodedLine, LineDecoder, TrailingLine};
pub use parser::{parse_bytes, parse_line};
pub use payload::{Handle, Payload};
pub use session::{
    ChannelPolicy, Session, SessionConfig, SessionEnd, SessionHandle, SessionOutcome,
    SessionState, SessionSummary, StreamWarning, DEFAULT_CHANNEL_CAPACITY, DEFAULT_GRACE_PERIOD,
};
pub use transport::{spawn, ProcessHandle, Tool, DEFAULT_PROGRAM};
pub use types::{names, Event, EventKind, MonitorInfo, Rect, VersionInfo, WindowInfo, WorkspaceInfo};

pub use tokio_util::sync::CancellationToken;
