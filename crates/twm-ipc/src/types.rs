//! Data types for twm IPC
//!
//! This module defines the event record read from `twm listen` and typed
//! views over the loosely-structured data the window manager reports.
//!
//! Everything here is built from a [`Payload`] rather than derived with
//! serde, because every wire field is optional and a field of the wrong
//! type must read as absent instead of rejecting the whole record.

use serde::Serialize;

use crate::payload::{Handle, Payload};

/// Event names emitted by the window manager
///
/// The set is open: names not listed here still decode into an [`Event`]
/// and map to [`EventKind::Other`].
pub mod names {
    pub const WINDOW_CREATED: &str = "window_created";
    pub const WINDOW_CLOSED: &str = "window_closed";
    pub const WINDOW_FOCUSED: &str = "window_focused";
    pub const WINDOW_MOVED: &str = "window_moved";
    pub const WINDOW_STATE_CHANGED: &str = "window_state_changed";
    pub const WORKSPACE_CHANGED: &str = "workspace_changed";
    pub const WORKSPACE_CREATED: &str = "workspace_created";
    pub const WORKSPACE_DELETED: &str = "workspace_deleted";
    pub const MONITOR_CHANGED: &str = "monitor_changed";
    pub const CONFIG_RELOADED: &str = "config_reloaded";
    pub const LAYOUT_CHANGED: &str = "layout_changed";

    /// Every event name known to this crate
    pub const ALL: &[&str] = &[
        WINDOW_CREATED,
        WINDOW_CLOSED,
        WINDOW_FOCUSED,
        WINDOW_MOVED,
        WINDOW_STATE_CHANGED,
        WORKSPACE_CHANGED,
        WORKSPACE_CREATED,
        WORKSPACE_DELETED,
        MONITOR_CHANGED,
        CONFIG_RELOADED,
        LAYOUT_CHANGED,
    ];
}

/// One record from the event stream
///
/// Produced from exactly one line of `twm listen` output.
///
/// # Example
///
/// ```ignore
/// let event = parse_line(r#"{"name":"window_focused","data":{"hwnd":42}}"#)?.unwrap();
/// assert_eq!(event.name, "window_focused");
/// println!("HWND {}", event.data.display_or("hwnd", "Unknown"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    /// Event name, never empty
    pub name: String,

    /// Event-specific fields; empty when the producer sent none
    pub data: Payload,
}

impl Event {
    pub fn new(name: impl Into<String>, data: Payload) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Typed view of this event
    pub fn kind(&self) -> EventKind {
        EventKind::from_event(self)
    }
}

/// Typed interpretation of the known event names
///
/// Fields are `None` when the producer left them out or sent the wrong
/// type. Unknown names become `Other` so that new producer versions do not
/// break consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    WindowCreated {
        hwnd: Option<Handle>,
        title: Option<String>,
        workspace: Option<u64>,
    },
    WindowClosed {
        hwnd: Option<Handle>,
    },
    WindowFocused {
        hwnd: Option<Handle>,
    },
    WindowMoved {
        hwnd: Option<Handle>,
        from_workspace: Option<u64>,
        to_workspace: Option<u64>,
    },
    WindowStateChanged {
        hwnd: Option<Handle>,
        old_state: Option<String>,
        new_state: Option<String>,
    },
    WorkspaceChanged {
        from: Option<u64>,
        to: Option<u64>,
    },
    WorkspaceCreated {
        id: Option<u64>,
        name: Option<String>,
    },
    WorkspaceDeleted {
        id: Option<u64>,
    },
    MonitorChanged,
    ConfigReloaded,
    LayoutChanged {
        layout: Option<String>,
    },
    /// An event name this crate does not know about
    Other(String),
}

impl EventKind {
    pub fn from_event(event: &Event) -> Self {
        let data = &event.data;
        let text = |key: &str| data.str(key).map(str::to_string);

        match event.name.as_str() {
            names::WINDOW_CREATED => EventKind::WindowCreated {
                hwnd: data.handle("hwnd"),
                title: text("title"),
                workspace: data.u64("workspace"),
            },
            names::WINDOW_CLOSED => EventKind::WindowClosed {
                hwnd: data.handle("hwnd"),
            },
            names::WINDOW_FOCUSED => EventKind::WindowFocused {
                hwnd: data.handle("hwnd"),
            },
            names::WINDOW_MOVED => EventKind::WindowMoved {
                hwnd: data.handle("hwnd"),
                from_workspace: data.u64("from_workspace"),
                to_workspace: data.u64("to_workspace"),
            },
            names::WINDOW_STATE_CHANGED => EventKind::WindowStateChanged {
                hwnd: data.handle("hwnd"),
                old_state: text("old_state"),
                new_state: text("new_state"),
            },
            names::WORKSPACE_CHANGED => EventKind::WorkspaceChanged {
                from: data.u64("from"),
                to: data.u64("to"),
            },
            names::WORKSPACE_CREATED => EventKind::WorkspaceCreated {
                id: data.u64("id"),
                name: text("name"),
            },
            names::WORKSPACE_DELETED => EventKind::WorkspaceDeleted { id: data.u64("id") },
            names::MONITOR_CHANGED => EventKind::MonitorChanged,
            names::CONFIG_RELOADED => EventKind::ConfigReloaded,
            names::LAYOUT_CHANGED => EventKind::LayoutChanged {
                layout: text("layout"),
            },
            other => EventKind::Other(other.to_string()),
        }
    }
}

/// Window position and size in screen pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl Rect {
    /// Missing coordinates read as 0
    pub fn from_payload(data: &Payload) -> Self {
        Self {
            x: data.i64_or("x", 0),
            y: data.i64_or("y", 0),
            width: data.i64_or("width", 0),
            height: data.i64_or("height", 0),
        }
    }
}

/// Information about a window
///
/// Returned by `active-window` and `windows` queries. Every field is
/// optional at the wire level.
///
/// # Example
///
/// ```ignore
/// if let Some(window) = client.active_window().await? {
///     println!("{} ({})", window.title.as_deref().unwrap_or("Unknown"), window.process_name.as_deref().unwrap_or("?"));
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowInfo {
    /// Opaque window handle
    pub hwnd: Option<Handle>,
    pub title: Option<String>,
    /// Window class name
    pub class: Option<String>,
    /// Executable name of the owning process
    pub process_name: Option<String>,
    pub workspace: Option<u64>,
    pub monitor: Option<u64>,
    /// Tiling state as reported (`tiled`, `floating`, `fullscreen`, `minimized`)
    pub state: Option<String>,
    pub rect: Option<Rect>,
    /// Present only in listings that mark the focused window
    pub focused: Option<bool>,
}

impl WindowInfo {
    pub fn from_payload(data: &Payload) -> Self {
        let rect = data
            .get("rect")
            .filter(|v| v.is_object())
            .map(|_| Rect::from_payload(&data.object("rect")));

        Self {
            hwnd: data.handle("hwnd"),
            title: data.str("title").map(str::to_string),
            class: data.str("class").map(str::to_string),
            process_name: data.str("process_name").map(str::to_string),
            workspace: data.u64("workspace"),
            monitor: data.u64("monitor"),
            state: data.str("state").map(str::to_string),
            rect,
            focused: data.bool("focused"),
        }
    }
}

/// Information about a workspace
///
/// The producer marks at most one workspace per monitor as active; this is
/// display state only and is not checked here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceInfo {
    pub id: Option<u64>,
    pub name: Option<String>,
    pub monitor: Option<u64>,
    /// Number of windows on the workspace, 0 when not reported
    pub window_count: u64,
    /// Whether this is the active workspace on its monitor
    pub active: bool,
    /// Whether the workspace is visible on its monitor, when reported
    pub visible: Option<bool>,
}

impl WorkspaceInfo {
    pub fn from_payload(data: &Payload) -> Self {
        Self {
            id: data.u64("id"),
            name: data.str("name").map(str::to_string),
            monitor: data.u64("monitor"),
            window_count: data.u64_or("window_count", 0),
            active: data.bool_or("active", false),
            visible: data.bool("visible"),
        }
    }
}

/// Information about a monitor
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorInfo {
    pub id: Option<u64>,
    pub name: Option<String>,
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
    /// DPI scale factor, 1.0 when not reported
    pub scale: f64,
    pub primary: Option<bool>,
    pub active_workspace: Option<u64>,
}

impl MonitorInfo {
    pub fn from_payload(data: &Payload) -> Self {
        Self {
            id: data.u64("id"),
            name: data.str("name").map(str::to_string),
            x: data.i64_or("x", 0),
            y: data.i64_or("y", 0),
            width: data.i64_or("width", 0),
            height: data.i64_or("height", 0),
            scale: data.f64("scale").unwrap_or(1.0),
            primary: data.bool("primary"),
            active_workspace: data.u64("active_workspace"),
        }
    }
}

/// Version details reported by the window manager
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: Option<String>,
    pub build_date: Option<String>,
    pub git_commit: Option<String>,
    pub rustc_version: Option<String>,
}

impl VersionInfo {
    pub fn from_payload(data: &Payload) -> Self {
        let text = |key: &str| data.str(key).map(str::to_string);
        Self {
            version: text("version"),
            build_date: text("build_date"),
            git_commit: text("git_commit"),
            rustc_version: text("rustc_version"),
        }
    }
}
