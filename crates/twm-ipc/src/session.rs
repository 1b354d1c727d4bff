//! Event stream sessions
//!
//! A session runs `twm --format json listen` and feeds its output through
//! the pipeline
//!
//! ```text
//! stdout -> LineDecoder -> channel -> parse_bytes -> Dispatcher
//! ```
//!
//! on two tokio tasks: a reader that only moves lines into the channel, and
//! the session task that parses and dispatches them in order. The caller
//! keeps a [`SessionHandle`] to observe, cancel and join the session.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::dispatcher::{panic_message, Dispatched, Dispatcher};
use crate::error::{
    DecodeError, HandlerError, SessionError, SpawnError, TransportError, TruncatedStreamWarning,
};
use crate::lines::{DecodedLine, LineDecoder, TrailingLine};
use crate::parser::parse_bytes;
use crate::transport::{self, ProcessHandle, Tool};

/// Default number of lines buffered between reader and dispatcher
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Default time a terminated tool gets to exit before it is killed
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Lifecycle of a session
///
/// ```text
/// Idle -> Running -> Draining -> Terminated
///            |                       ^
///            +---- transport error --+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not yet started
    Idle,
    /// The tool is running and events are being dispatched
    Running,
    /// Cancelled or end of stream; the child is being stopped
    Draining,
    /// The child has exited and nothing more will be dispatched
    Terminated,
}

/// Backpressure between the reader and the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPolicy {
    /// At most `n` lines in flight; the reader waits when the buffer is full
    Bounded(usize),
    /// No limit; a slow handler lets memory grow without bound
    Unbounded,
}

impl Default for ChannelPolicy {
    fn default() -> Self {
        Self::Bounded(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl ChannelPolicy {
    fn channel(self) -> (LineSender, LineReceiver) {
        match self {
            ChannelPolicy::Bounded(capacity) => {
                let (tx, rx) = mpsc::channel(capacity.max(1));
                (LineSender::Bounded(tx), LineReceiver::Bounded(rx))
            }
            ChannelPolicy::Unbounded => {
                let (tx, rx) = mpsc::unbounded_channel();
                (LineSender::Unbounded(tx), LineReceiver::Unbounded(rx))
            }
        }
    }
}

/// Settings for one streaming session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub tool: Tool,
    /// Event names for `--events`; empty subscribes to everything
    pub events: Vec<String>,
    pub grace_period: Duration,
    pub channel: ChannelPolicy,
    pub trailing_line: TrailingLine,
    /// Log the tool's stderr at warn level rather than trace
    pub forward_stderr: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tool: Tool::default(),
            events: Vec::new(),
            grace_period: DEFAULT_GRACE_PERIOD,
            channel: ChannelPolicy::default(),
            trailing_line: TrailingLine::default(),
            forward_stderr: true,
        }
    }
}

impl SessionConfig {
    pub fn new(tool: Tool) -> Self {
        Self {
            tool,
            ..Self::default()
        }
    }

    pub fn with_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events = events.into_iter().map(Into::into).collect();
        self
    }

    /// Arguments after `--format json`: `listen [--events a,b,...]`
    pub fn listen_args(&self) -> Vec<String> {
        let mut args = vec!["listen".to_string()];
        if !self.events.is_empty() {
            args.push("--events".to_string());
            args.push(self.events.join(","));
        }
        args
    }
}

impl From<&twm_ipc_config::Config> for SessionConfig {
    fn from(config: &twm_ipc_config::Config) -> Self {
        let listen = &config.listen;
        Self {
            tool: Tool::new(config.tool.program.clone()),
            events: listen.events.clone(),
            grace_period: Duration::from_millis(listen.grace_period_ms),
            channel: match listen.channel_capacity {
                0 => ChannelPolicy::Unbounded,
                n => ChannelPolicy::Bounded(n),
            },
            trailing_line: match listen.trailing_line {
                twm_ipc_config::TrailingLinePolicy::Emit => TrailingLine::Emit,
                twm_ipc_config::TrailingLinePolicy::Discard => TrailingLine::Discard,
            },
            forward_stderr: listen.forward_stderr,
        }
    }
}

/// A recoverable fault reported while the session keeps running
#[derive(Debug, Error)]
pub enum StreamWarning {
    #[error(transparent)]
    Decode(DecodeError),

    #[error(transparent)]
    Handler(HandlerError),

    #[error(transparent)]
    Truncated(TruncatedStreamWarning),
}

/// Why a session ended without a transport fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Stopped by the caller; not an error
    Cancelled,
    /// The tool closed its output and exited successfully, or had to be
    /// stopped after closing it
    Completed,
    /// The tool closed its output and exited on its own with a failure
    /// status; see `SessionSummary::exit_status`
    ToolFailed,
}

/// Counters collected over a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Events that reached a handler without failing
    pub dispatched: u64,
    /// Events with no applicable handler
    pub ignored: u64,
    pub decode_errors: u64,
    pub handler_errors: u64,
    /// Trailing records dropped under `TrailingLine::Discard`
    pub truncated: u64,
    /// Lines still buffered when the session was cancelled
    pub discarded: u64,
    /// How the tool exited
    pub exit_status: Option<ExitStatus>,
}

/// Result of a session that ended cleanly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub end: SessionEnd,
    pub summary: SessionSummary,
}

type WarningCallback = Box<dyn FnMut(&StreamWarning) + Send>;

/// A configured, not yet started event stream session
///
/// Handlers are fixed at construction: the dispatcher moves into the
/// session and cannot be changed while events flow.
///
/// # Example
///
/// ```ignore
/// let mut dispatcher = Dispatcher::new();
/// dispatcher.on("window_created", |event| {
///     println!("[NEW] {}", event.data.str_or("title", "Unknown"));
///     Ok(())
/// });
///
/// let config = SessionConfig::default().with_events(["window_created"]);
/// let handle = Session::new(config, dispatcher).start()?;
///
/// tokio::signal::ctrl_c().await?;
/// let outcome = handle.shutdown().await?;
/// ```
pub struct Session {
    config: SessionConfig,
    dispatcher: Dispatcher,
    on_warning: Option<WarningCallback>,
    state: watch::Sender<SessionState>,
}

impl Session {
    pub fn new(config: SessionConfig, dispatcher: Dispatcher) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            config,
            dispatcher,
            on_warning: None,
            state,
        }
    }

    /// Receive every recoverable fault as it happens
    ///
    /// Faults are logged with `tracing` either way.
    pub fn on_warning<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&StreamWarning) + Send + 'static,
    {
        self.on_warning = Some(Box::new(callback));
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Watch the session state, starting from `Idle`
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Spawn the tool and start dispatching
    ///
    /// Returns once the child is running; events are handled on a tokio
    /// task. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a `SpawnError` if the tool cannot be launched. No task is
    /// started in that case.
    pub fn start(self) -> Result<SessionHandle, SpawnError> {
        let Session {
            config,
            dispatcher,
            on_warning,
            state,
        } = self;

        let mut process = transport::spawn(&config.tool, config.listen_args())?;
        let stdout = process.take_stdout()?;
        process.drain_stderr(config.forward_stderr);
        let pid = process.pid();

        let cancel = CancellationToken::new();
        let (tx, rx) = config.channel.channel();
        let decoder = LineDecoder::new(stdout, config.trailing_line);
        let reader = tokio::spawn(read_lines(decoder, tx, cancel.clone()));

        state.send_replace(SessionState::Running);
        info!(pid = ?pid, events = ?config.events, "Event stream session started");

        let receiver = state.subscribe();
        let pump = Pump {
            dispatcher,
            on_warning,
            summary: SessionSummary::default(),
        };
        let task = tokio::spawn(run(Running {
            pump,
            process,
            rx,
            reader,
            cancel: cancel.clone(),
            state,
            grace: config.grace_period,
        }));

        Ok(SessionHandle {
            guard: cancel.clone().drop_guard(),
            cancel,
            state: receiver,
            pid,
            task,
        })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .field("on_warning", &self.on_warning.is_some())
            .finish()
    }
}

/// Caller's side of a running session
///
/// Dropping the handle without joining cancels the session.
#[derive(Debug)]
pub struct SessionHandle {
    guard: DropGuard,
    cancel: CancellationToken,
    state: watch::Receiver<SessionState>,
    pid: Option<u32>,
    task: JoinHandle<Result<SessionOutcome, SessionError>>,
}

impl SessionHandle {
    /// Request cancellation
    ///
    /// Idempotent and safe to call from any task or thread. Lines already
    /// buffered but not yet dispatched are discarded.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this session, for use elsewhere
    ///
    /// # Example
    ///
    /// ```ignore
    /// let canceller = handle.canceller();
    /// tokio::spawn(async move {
    ///     let _ = tokio::signal::ctrl_c().await;
    ///     canceller.cancel();
    /// });
    /// ```
    pub fn canceller(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// OS process id of the tool
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session to end
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Transport` if the protocol channel broke and
    /// `SessionError::Task` if the session task itself panicked.
    pub async fn join(self) -> Result<SessionOutcome, SessionError> {
        let SessionHandle { guard, task, .. } = self;
        let result = task.await;
        guard.disarm();
        result?
    }

    /// Cancel, then wait for the session to end
    pub async fn shutdown(self) -> Result<SessionOutcome, SessionError> {
        self.cancel();
        self.join().await
    }
}

type LineItem = Result<DecodedLine, TransportError>;

enum LineSender {
    Bounded(mpsc::Sender<LineItem>),
    Unbounded(mpsc::UnboundedSender<LineItem>),
}

impl LineSender {
    /// `false` once the receiving side is gone
    async fn send(&self, item: LineItem) -> bool {
        match self {
            LineSender::Bounded(tx) => tx.send(item).await.is_ok(),
            LineSender::Unbounded(tx) => tx.send(item).is_ok(),
        }
    }
}

enum LineReceiver {
    Bounded(mpsc::Receiver<LineItem>),
    Unbounded(mpsc::UnboundedReceiver<LineItem>),
}

impl LineReceiver {
    async fn recv(&mut self) -> Option<LineItem> {
        match self {
            LineReceiver::Bounded(rx) => rx.recv().await,
            LineReceiver::Unbounded(rx) => rx.recv().await,
        }
    }

    /// Close the channel and drop whatever is still queued
    fn discard(&mut self) -> u64 {
        let mut dropped = 0;
        match self {
            LineReceiver::Bounded(rx) => {
                rx.close();
                while rx.try_recv().is_ok() {
                    dropped += 1;
                }
            }
            LineReceiver::Unbounded(rx) => {
                rx.close();
                while rx.try_recv().is_ok() {
                    dropped += 1;
                }
            }
        }
        dropped
    }
}

/// Move decoded lines into the channel until EOF, error or cancellation
async fn read_lines<R>(mut decoder: LineDecoder<R>, tx: LineSender, cancel: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = decoder.next_line() => item,
        };

        let (item, last) = match item {
            Ok(Some(line)) => (Ok(line), false),
            Ok(None) => break,
            Err(e) => (Err(e), true),
        };

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            sent = tx.send(item) => sent,
        };
        if !sent || last {
            break;
        }
    }
    debug!("Line reader stopped");
}

/// Parse-and-dispatch half of the pipeline
struct Pump {
    dispatcher: Dispatcher,
    on_warning: Option<WarningCallback>,
    summary: SessionSummary,
}

impl Pump {
    /// Dispatch lines in arrival order until cancellation or end of stream
    async fn pump(
        &mut self,
        rx: &mut LineReceiver,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd, TransportError> {
        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
                item = rx.recv() => item,
            };

            match item {
                Some(Ok(DecodedLine::Complete(line))) => self.handle_line(line.as_bytes()),
                Some(Ok(DecodedLine::Invalid(bytes))) => self.handle_line(&bytes),
                Some(Ok(DecodedLine::Truncated(truncated))) => {
                    self.summary.truncated += 1;
                    warn!("{}", truncated);
                    self.report(StreamWarning::Truncated(truncated));
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(SessionEnd::Completed),
            }
        }
    }

    fn handle_line(&mut self, line: &[u8]) {
        let event = match parse_bytes(line) {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(e) => {
                self.summary.decode_errors += 1;
                warn!("Skipping malformed event line: {}", e);
                self.report(StreamWarning::Decode(e));
                return;
            }
        };

        match self.dispatcher.dispatch(&event) {
            Ok(Dispatched::Ignored) => self.summary.ignored += 1,
            Ok(_) => self.summary.dispatched += 1,
            Err(e) => {
                self.summary.handler_errors += 1;
                warn!("{}", e);
                self.report(StreamWarning::Handler(e));
            }
        }
    }

    /// Hand a warning to the consumer callback; a panic in it is logged
    fn report(&mut self, warning: StreamWarning) {
        if let Some(callback) = self.on_warning.as_mut() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(&warning))) {
                warn!(
                    "Warning callback panicked: {}",
                    panic_message(panic.as_ref())
                );
            }
        }
    }
}

/// Everything the session task owns
struct Running {
    pump: Pump,
    process: ProcessHandle,
    rx: LineReceiver,
    reader: JoinHandle<()>,
    cancel: CancellationToken,
    state: watch::Sender<SessionState>,
    grace: Duration,
}

async fn run(running: Running) -> Result<SessionOutcome, SessionError> {
    let Running {
        mut pump,
        mut process,
        mut rx,
        mut reader,
        cancel,
        state,
        grace,
    } = running;

    let mut end = pump.pump(&mut rx, &cancel).await;

    // The channel only closes early if the reader died without reporting
    if matches!(end, Ok(SessionEnd::Completed)) {
        if let Err(e) = (&mut reader).await {
            warn!("Line reader task failed: {}", e);
            end = Err(TransportError::ReaderLost);
        }
    }

    let end = match end {
        Ok(end) => end,
        Err(e) => {
            warn!("Event stream transport failed: {}", e);
            cancel.cancel();
            if let Err(stop_err) = process.terminate(grace).await {
                warn!("Failed to stop twm after transport failure: {}", stop_err);
            }
            state.send_replace(SessionState::Terminated);
            return Err(SessionError::Transport(e));
        }
    };

    state.send_replace(SessionState::Draining);

    let (end, status) = match end {
        SessionEnd::Completed => match process.wait_timeout(grace).await {
            Ok(Some(status)) if status.success() => (SessionEnd::Completed, Ok(status)),
            Ok(Some(status)) => {
                warn!(?status, "twm exited with a failure status");
                (SessionEnd::ToolFailed, Ok(status))
            }
            Ok(None) => {
                debug!("twm closed its output but kept running, stopping it");
                (SessionEnd::Completed, process.terminate(grace).await)
            }
            Err(e) => (SessionEnd::Completed, Err(e)),
        },
        other => {
            pump.summary.discarded = rx.discard();
            if pump.summary.discarded > 0 {
                debug!(
                    discarded = pump.summary.discarded,
                    "Discarded buffered lines after cancellation"
                );
            }
            (other, process.terminate(grace).await)
        }
    };

    cancel.cancel();
    if !reader.is_finished() {
        if let Err(e) = reader.await {
            warn!("Line reader task failed: {}", e);
        }
    }

    state.send_replace(SessionState::Terminated);
    let status = status?;
    pump.summary.exit_status = Some(status);

    info!(
        end = ?end,
        dispatched = pump.summary.dispatched,
        decode_errors = pump.summary.decode_errors,
        handler_errors = pump.summary.handler_errors,
        ?status,
        "Event stream session ended"
    );

    Ok(SessionOutcome {
        end,
        summary: pump.summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Event;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    fn recording_dispatcher(log: &Log) -> Dispatcher {
        let log = Arc::clone(log);
        let mut dispatcher = Dispatcher::new();
        dispatcher.on_default(move |event: &Event| {
            log.lock().unwrap().push(event.name.clone());
            Ok(())
        });
        dispatcher
    }

    fn line(text: &str) -> LineItem {
        Ok(DecodedLine::Complete(text.to_string()))
    }

    fn pump_for(dispatcher: Dispatcher, warnings: &Arc<Mutex<Vec<String>>>) -> Pump {
        let warnings = Arc::clone(warnings);
        Pump {
            dispatcher,
            on_warning: Some(Box::new(move |w: &StreamWarning| {
                warnings.lock().unwrap().push(w.to_string());
            })),
            summary: SessionSummary::default(),
        }
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    #[test]
    fn test_listen_args() {
        let config = SessionConfig::default();
        assert_eq!(config.listen_args(), vec!["listen"]);

        let config = config.with_events(["window_created", "window_closed"]);
        assert_eq!(
            config.listen_args(),
            vec!["listen", "--events", "window_created,window_closed"]
        );
    }

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.tool.program(), "twm");
        assert_eq!(config.grace_period, Duration::from_secs(2));
        assert_eq!(config.channel, ChannelPolicy::Bounded(64));
        assert_eq!(config.trailing_line, TrailingLine::Emit);
        assert!(config.forward_stderr);
    }

    #[test]
    fn test_from_file_config() {
        let file = twm_ipc_config::parse_config_str(
            r#"
            tool { program "/opt/twm/twm"; }
            listen {
                events "window_created" "workspace_changed"
                grace-period-ms 500
                channel-capacity 0
                trailing-line "discard"
                forward-stderr false
            }
            "#,
        )
        .unwrap();

        let config = SessionConfig::from(&file);
        assert_eq!(config.tool.program(), "/opt/twm/twm");
        assert_eq!(config.events, vec!["window_created", "workspace_changed"]);
        assert_eq!(config.grace_period, Duration::from_millis(500));
        assert_eq!(config.channel, ChannelPolicy::Unbounded);
        assert_eq!(config.trailing_line, TrailingLine::Discard);
        assert!(!config.forward_stderr);
    }

    #[test]
    fn test_new_session_is_idle() {
        let session = Session::new(SessionConfig::default(), Dispatcher::new());
        assert_eq!(*session.subscribe_state().borrow(), SessionState::Idle);
    }

    // ========================================================================
    // Pump
    // ========================================================================

    #[tokio::test]
    async fn test_malformed_line_between_events_is_recoverable() {
        let log: Log = Arc::default();
        let warnings = Arc::default();
        let mut pump = pump_for(recording_dispatcher(&log), &warnings);

        let (tx, mut rx) = ChannelPolicy::default().channel();
        assert!(tx.send(line(r#"{"name":"window_created","data":{"hwnd":1}}"#)).await);
        assert!(tx.send(line(r#"{"name":"window_created","data":"#)).await);
        assert!(tx.send(line(r#"{"name":"window_closed","data":{"hwnd":1}}"#)).await);
        drop(tx);

        let end = pump.pump(&mut rx, &CancellationToken::new()).await.unwrap();

        assert_eq!(end, SessionEnd::Completed);
        assert_eq!(*log.lock().unwrap(), vec!["window_created", "window_closed"]);
        assert_eq!(pump.summary.dispatched, 2);
        assert_eq!(pump.summary.decode_errors, 1);
        assert_eq!(warnings.lock().unwrap().len(), 1);
    }

    fn panicking_reporter(_: &StreamWarning) {
        panic!("reporter bug");
    }

    #[tokio::test]
    async fn test_panicking_warning_callback_does_not_stop_pump() {
        let log: Log = Arc::default();
        let mut pump = Pump {
            dispatcher: recording_dispatcher(&log),
            on_warning: Some(Box::new(panicking_reporter)),
            summary: SessionSummary::default(),
        };

        let (tx, mut rx) = ChannelPolicy::default().channel();
        assert!(tx.send(line("garbage")).await);
        assert!(tx.send(line(r#"{"name":"window_created"}"#)).await);
        assert!(tx.send(line("more garbage")).await);
        assert!(tx.send(line(r#"{"name":"window_closed"}"#)).await);
        drop(tx);

        let end = pump.pump(&mut rx, &CancellationToken::new()).await.unwrap();

        assert_eq!(end, SessionEnd::Completed);
        assert_eq!(*log.lock().unwrap(), vec!["window_created", "window_closed"]);
        assert_eq!(pump.summary.decode_errors, 2);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_decode_error() {
        let log: Log = Arc::default();
        let warnings: Log = Arc::default();
        let mut pump = pump_for(recording_dispatcher(&log), &warnings);

        let (tx, mut rx) = ChannelPolicy::default().channel();
        assert!(tx.send(line(r#"{"name":"window_focused"}"#)).await);
        let raw = b"{\"name\":\"window_created\",\"data\":{\"title\":\"caf\xe9\"}}".to_vec();
        assert!(tx.send(Ok(DecodedLine::Invalid(raw))).await);
        assert!(tx.send(line(r#"{"name":"window_closed"}"#)).await);
        drop(tx);

        pump.pump(&mut rx, &CancellationToken::new()).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["window_focused", "window_closed"]);
        assert_eq!(pump.summary.decode_errors, 1);
        assert!(warnings.lock().unwrap()[0].contains("UTF-8"));
    }

    #[tokio::test]
    async fn test_handler_failure_does_not_stop_pump() {
        let warnings = Arc::default();
        let seen: Log = Arc::default();
        let mut dispatcher = Dispatcher::new();
        dispatcher.on("window_focused", |_| panic!("boom"));
        let record = Arc::clone(&seen);
        dispatcher.on("window_closed", move |event| {
            record.lock().unwrap().push(event.name.clone());
            Ok(())
        });
        let mut pump = pump_for(dispatcher, &warnings);

        let (tx, mut rx) = ChannelPolicy::Unbounded.channel();
        assert!(tx.send(line(r#"{"name":"window_focused"}"#)).await);
        assert!(tx.send(line(r#"{"name":"window_closed"}"#)).await);
        drop(tx);

        pump.pump(&mut rx, &CancellationToken::new()).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["window_closed"]);
        assert_eq!(pump.summary.handler_errors, 1);
        assert_eq!(pump.summary.dispatched, 1);
        assert!(warnings.lock().unwrap()[0].contains("boom"));
    }

    #[tokio::test]
    async fn test_blank_and_unhandled_lines() {
        let warnings = Arc::default();
        let mut dispatcher = Dispatcher::new();
        dispatcher.on("window_created", |_| Ok(()));
        let mut pump = pump_for(dispatcher, &warnings);

        let (tx, mut rx) = ChannelPolicy::default().channel();
        assert!(tx.send(line("")).await);
        assert!(tx.send(line(r#"{"name":"layout_changed"}"#)).await);
        drop(tx);

        pump.pump(&mut rx, &CancellationToken::new()).await.unwrap();

        assert_eq!(pump.summary.ignored, 1);
        assert_eq!(pump.summary.dispatched, 0);
        assert!(warnings.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_truncated_tail_is_reported() {
        let warnings = Arc::default();
        let mut pump = pump_for(Dispatcher::new(), &warnings);

        let (tx, mut rx) = ChannelPolicy::default().channel();
        assert!(
            tx.send(Ok(DecodedLine::Truncated(TruncatedStreamWarning { bytes: 9 })))
                .await
        );
        drop(tx);

        pump.pump(&mut rx, &CancellationToken::new()).await.unwrap();

        assert_eq!(pump.summary.truncated, 1);
        assert!(warnings.lock().unwrap()[0].contains("9 unterminated"));
    }

    #[tokio::test]
    async fn test_transport_error_ends_pump() {
        let log: Log = Arc::default();
        let warnings = Arc::default();
        let mut pump = pump_for(recording_dispatcher(&log), &warnings);

        let (tx, mut rx) = ChannelPolicy::default().channel();
        assert!(tx.send(line(r#"{"name":"window_created"}"#)).await);
        assert!(tx.send(Err(TransportError::ReaderLost)).await);
        assert!(tx.send(line(r#"{"name":"window_closed"}"#)).await);

        let result = pump.pump(&mut rx, &CancellationToken::new()).await;

        assert!(matches!(result, Err(TransportError::ReaderLost)));
        assert_eq!(*log.lock().unwrap(), vec!["window_created"]);
    }

    #[tokio::test]
    async fn test_cancelled_pump_dispatches_nothing_more() {
        let log: Log = Arc::default();
        let warnings = Arc::default();
        let mut pump = pump_for(recording_dispatcher(&log), &warnings);

        let (tx, mut rx) = ChannelPolicy::default().channel();
        assert!(tx.send(line(r#"{"name":"window_created"}"#)).await);
        assert!(tx.send(line(r#"{"name":"window_closed"}"#)).await);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let end = pump.pump(&mut rx, &cancel).await.unwrap();

        assert_eq!(end, SessionEnd::Cancelled);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(rx.discard(), 2);
        // Closed: the reader's next send fails
        assert!(!tx.send(line(r#"{"name":"late"}"#)).await);
    }

    // ========================================================================
    // Sessions over a real process
    // ========================================================================

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::os::unix::process::ExitStatusExt;

        fn scripted(script: &str) -> SessionConfig {
            let mut config = SessionConfig::new(Tool::new("sh").with_base_args(["-c", script]));
            config.grace_period = Duration::from_millis(500);
            config
        }

        fn process_gone(pid: u32) -> bool {
            use nix::sys::signal::kill;
            use nix::unistd::Pid;

            kill(Pid::from_raw(pid as i32), None).is_err()
        }

        #[tokio::test]
        async fn test_stream_with_malformed_line() {
            let script = r#"printf '%s\n' '{"name":"window_created","data":{"hwnd":123,"title":"Notes","workspace":2}}' 'not json at all' '{"name":"window_closed","data":{"hwnd":"123"}}'"#;
            let log: Log = Arc::default();
            let warnings: Log = Arc::default();
            let recorded = Arc::clone(&warnings);

            let handle = Session::new(scripted(script), recording_dispatcher(&log))
                .on_warning(move |w| recorded.lock().unwrap().push(w.to_string()))
                .start()
                .unwrap();
            let outcome = handle.join().await.unwrap();

            assert_eq!(outcome.end, SessionEnd::Completed);
            assert_eq!(*log.lock().unwrap(), vec!["window_created", "window_closed"]);
            assert_eq!(outcome.summary.dispatched, 2);
            assert_eq!(outcome.summary.decode_errors, 1);
            assert_eq!(warnings.lock().unwrap().len(), 1);
            assert!(warnings.lock().unwrap()[0].contains("not json at all"));
            assert!(outcome.summary.exit_status.map(|s| s.success()).unwrap_or(false));
        }

        #[tokio::test]
        async fn test_non_utf8_record_is_skipped() {
            let script = r#"printf '{"name":"window_created","data":{"title":"caf\351"}}\n{"name":"window_closed"}\n'"#;
            let log: Log = Arc::default();

            let outcome = Session::new(scripted(script), recording_dispatcher(&log))
                .start()
                .unwrap()
                .join()
                .await
                .unwrap();

            assert_eq!(*log.lock().unwrap(), vec!["window_closed"]);
            assert_eq!(outcome.summary.decode_errors, 1);
        }

        #[tokio::test]
        async fn test_panicking_warning_callback_keeps_session_running() {
            let script = r#"printf '%s\n' 'garbage' '{"name":"window_created"}' '{"name":"window_closed"}'"#;
            let log: Log = Arc::default();

            let outcome = Session::new(scripted(script), recording_dispatcher(&log))
                .on_warning(|_| panic!("reporter bug"))
                .start()
                .unwrap()
                .join()
                .await
                .unwrap();

            assert_eq!(outcome.end, SessionEnd::Completed);
            assert_eq!(*log.lock().unwrap(), vec!["window_created", "window_closed"]);
        }

        #[tokio::test]
        async fn test_tool_failure_at_eof_is_distinct() {
            let script = r#"echo '{"name":"window_created"}'; echo 'window manager not running' >&2; exit 3"#;
            let log: Log = Arc::default();

            let outcome = Session::new(scripted(script), recording_dispatcher(&log))
                .start()
                .unwrap()
                .join()
                .await
                .unwrap();

            assert_eq!(outcome.end, SessionEnd::ToolFailed);
            assert_eq!(*log.lock().unwrap(), vec!["window_created"]);
            assert_eq!(outcome.summary.exit_status.and_then(|s| s.code()), Some(3));
        }

        #[tokio::test]
        async fn test_listen_invocation() {
            let script = r#"printf '{"name":"args","data":{"argv":"%s %s"}}\n' "$0" "$*""#;
            let argv: Log = Arc::default();
            let seen = Arc::clone(&argv);
            let mut dispatcher = Dispatcher::new();
            dispatcher.on("args", move |event| {
                seen.lock()
                    .unwrap()
                    .push(event.data.str_or("argv", "").to_string());
                Ok(())
            });

            let config = scripted(script).with_events(["window_created", "window_closed"]);
            Session::new(config, dispatcher)
                .start()
                .unwrap()
                .join()
                .await
                .unwrap();

            assert_eq!(
                *argv.lock().unwrap(),
                vec!["--format json listen --events window_created,window_closed"]
            );
        }

        #[tokio::test]
        async fn test_unterminated_last_record_is_emitted() {
            let script = r#"printf '{"name":"window_created"}\n{"name":"window_closed"}'"#;
            let log: Log = Arc::default();

            let outcome = Session::new(scripted(script), recording_dispatcher(&log))
                .start()
                .unwrap()
                .join()
                .await
                .unwrap();

            assert_eq!(*log.lock().unwrap(), vec!["window_created", "window_closed"]);
            assert_eq!(outcome.summary.truncated, 0);
        }

        #[tokio::test]
        async fn test_unterminated_last_record_discarded_when_configured() {
            let script = r#"printf '{"name":"window_created"}\n{"name":"window_closed"}'"#;
            let log: Log = Arc::default();
            let mut config = scripted(script);
            config.trailing_line = TrailingLine::Discard;
            config.channel = ChannelPolicy::Unbounded;

            let outcome = Session::new(config, recording_dispatcher(&log))
                .start()
                .unwrap()
                .join()
                .await
                .unwrap();

            assert_eq!(*log.lock().unwrap(), vec!["window_created"]);
            assert_eq!(outcome.summary.truncated, 1);
        }

        #[tokio::test]
        async fn test_cancel_stops_child_within_grace_period() {
            let script = r#"echo '{"name":"window_created"}'; exec sleep 30"#;
            let (first_tx, mut first_rx) = mpsc::unbounded_channel();
            let mut dispatcher = Dispatcher::new();
            dispatcher.on_default(move |event: &Event| {
                let _ = first_tx.send(event.name.clone());
                Ok(())
            });

            let handle = Session::new(scripted(script), dispatcher).start().unwrap();
            assert_eq!(handle.state(), SessionState::Running);
            let pid = handle.pid().unwrap();

            assert_eq!(first_rx.recv().await.as_deref(), Some("window_created"));

            let started = std::time::Instant::now();
            handle.cancel();
            handle.cancel();
            let state = handle.subscribe_state();
            let outcome = handle.join().await.unwrap();

            assert_eq!(outcome.end, SessionEnd::Cancelled);
            assert_eq!(*state.borrow(), SessionState::Terminated);
            assert_eq!(
                outcome.summary.exit_status.and_then(|s| s.signal()),
                Some(nix::libc::SIGTERM)
            );
            assert!(started.elapsed() < Duration::from_secs(5));
            assert!(process_gone(pid));
            // Nothing dispatched after cancellation
            assert!(first_rx.try_recv().is_err());
        }

        #[tokio::test]
        async fn test_shutdown_kills_tool_ignoring_sigterm() {
            let script = r#"trap '' TERM; echo '{"name":"ready"}'; while true; do sleep 1; done"#;
            let (ready_tx, mut ready_rx) = mpsc::unbounded_channel();
            let mut dispatcher = Dispatcher::new();
            dispatcher.on("ready", move |_| {
                let _ = ready_tx.send(());
                Ok(())
            });

            let mut config = scripted(script);
            config.grace_period = Duration::from_millis(200);
            let handle = Session::new(config, dispatcher).start().unwrap();
            ready_rx.recv().await.unwrap();

            let outcome = handle.shutdown().await.unwrap();
            assert_eq!(
                outcome.summary.exit_status.and_then(|s| s.signal()),
                Some(nix::libc::SIGKILL)
            );
        }

        #[tokio::test]
        async fn test_canceller_token_from_another_task() {
            let handle = Session::new(scripted("exec sleep 30"), Dispatcher::new())
                .start()
                .unwrap();

            let canceller = handle.canceller();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                canceller.cancel();
            });

            let outcome = handle.join().await.unwrap();
            assert_eq!(outcome.end, SessionEnd::Cancelled);
        }

        #[tokio::test]
        async fn test_dropping_handle_cancels_session() {
            let handle = Session::new(scripted("exec sleep 30"), Dispatcher::new())
                .start()
                .unwrap();
            let pid = handle.pid().unwrap();
            drop(handle);

            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            while !process_gone(pid) {
                assert!(std::time::Instant::now() < deadline, "tool still running");
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }

        #[tokio::test]
        async fn test_tool_lingering_after_eof_is_stopped() {
            let script = r#"echo '{"name":"window_created"}'; exec 1>&-; exec sleep 30"#;
            let log: Log = Arc::default();
            let mut config = scripted(script);
            config.grace_period = Duration::from_millis(200);

            let outcome = Session::new(config, recording_dispatcher(&log))
                .start()
                .unwrap()
                .join()
                .await
                .unwrap();

            assert_eq!(outcome.end, SessionEnd::Completed);
            assert_eq!(*log.lock().unwrap(), vec!["window_created"]);
            assert_eq!(
                outcome.summary.exit_status.and_then(|s| s.signal()),
                Some(nix::libc::SIGTERM)
            );
        }

        #[tokio::test]
        async fn test_missing_tool_fails_to_start() {
            let config = SessionConfig::new(Tool::new("twm-definitely-not-installed-4b1d"));
            let result = Session::new(config, Dispatcher::new()).start();

            assert!(
                matches!(result, Err(SpawnError::NotFound { .. })),
                "Expected NotFound, got: {:?}",
                result.map(|h| h.pid())
            );
        }
    }
}
