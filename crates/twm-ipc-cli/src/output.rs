//! Human-readable rendering of events and query results

use twm_ipc::{Event, Payload, WindowInfo, WorkspaceInfo};

/// Wall-clock prefix for stream output
pub fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

pub fn window_created(ts: &str, data: &Payload) -> String {
    format!(
        "[{}] ✓ Window Created: {} (Workspace {})",
        ts,
        data.str_or("title", "Unknown"),
        data.display_or("workspace", "?")
    )
}

pub fn window_closed(ts: &str, data: &Payload) -> String {
    format!(
        "[{}] ✗ Window Closed: HWND {}",
        ts,
        data.display_or("hwnd", "Unknown")
    )
}

pub fn window_focused(ts: &str, data: &Payload) -> String {
    format!(
        "[{}] ◆ Window Focused: HWND {}",
        ts,
        data.display_or("hwnd", "Unknown")
    )
}

pub fn other_event(ts: &str, event: &Event) -> String {
    format!("[{}] ? Unknown event: {}", ts, event.name)
}

/// Line printed by `tile` for each new window
pub fn new_window(ts: &str, data: &Payload) -> String {
    format!(
        "[{}] New window: {} (HWND: {}, Workspace: {})",
        ts,
        data.str_or("title", "Unknown"),
        data.display_or("hwnd", "Unknown"),
        data.display_or("workspace", "?")
    )
}

pub fn active_window(window: &WindowInfo) -> String {
    let text = |value: &Option<String>| value.clone().unwrap_or_else(|| "Unknown".to_string());
    let number = |value: Option<u64>| value.map_or_else(|| "?".to_string(), |n| n.to_string());
    let rect = window.rect.unwrap_or_default();

    [
        "Active Window:".to_string(),
        String::new(),
        format!(
            "  HWND:       {}",
            window
                .hwnd
                .as_ref()
                .map_or_else(|| "Unknown".to_string(), ToString::to_string)
        ),
        format!("  Title:      {}", text(&window.title)),
        format!("  Class:      {}", text(&window.class)),
        format!("  Process:    {}", text(&window.process_name)),
        format!("  Workspace:  {}", number(window.workspace)),
        format!("  Monitor:    {}", number(window.monitor)),
        format!("  State:      {}", text(&window.state)),
        format!("  Position:   {}, {}", rect.x, rect.y),
        format!("  Size:       {}x{}", rect.width, rect.height),
    ]
    .join("\n")
}

pub fn workspace(ws: &WorkspaceInfo) -> String {
    format!(
        "{} Workspace {}: {} ({} windows, monitor {})",
        if ws.active { "●" } else { "○" },
        ws.id.map_or_else(|| "?".to_string(), |id| id.to_string()),
        ws.name.as_deref().unwrap_or("Unknown"),
        ws.window_count,
        ws.monitor.map_or_else(|| "?".to_string(), |m| m.to_string())
    )
}

pub fn window_row(window: &WindowInfo) -> String {
    format!(
        "{}{:>10}  {} [{}] (workspace {}, {})",
        if window.focused == Some(true) { "*" } else { " " },
        window
            .hwnd
            .as_ref()
            .map_or_else(|| "?".to_string(), ToString::to_string),
        window.title.as_deref().unwrap_or("Unknown"),
        window.process_name.as_deref().unwrap_or("?"),
        window
            .workspace
            .map_or_else(|| "?".to_string(), |w| w.to_string()),
        window.state.as_deref().unwrap_or("unknown")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use twm_ipc::{parse_line, Handle, Rect};

    fn data(line: &str) -> Payload {
        parse_line(line).unwrap().unwrap().data
    }

    #[test]
    fn test_stream_lines() {
        let created = data(r#"{"name":"window_created","data":{"hwnd":123,"title":"Notes","workspace":2}}"#);
        assert_eq!(
            window_created("12:00:00", &created),
            "[12:00:00] ✓ Window Created: Notes (Workspace 2)"
        );
        assert_eq!(
            new_window("12:00:00", &created),
            "[12:00:00] New window: Notes (HWND: 123, Workspace: 2)"
        );

        let closed = data(r#"{"name":"window_closed","data":{"hwnd":"65794"}}"#);
        assert_eq!(
            window_closed("09:15:30", &closed),
            "[09:15:30] ✗ Window Closed: HWND 65794"
        );
    }

    #[test]
    fn test_stream_lines_with_missing_fields() {
        let empty = Payload::new();
        assert_eq!(
            window_created("t", &empty),
            "[t] ✓ Window Created: Unknown (Workspace ?)"
        );
        assert_eq!(window_focused("t", &empty), "[t] ◆ Window Focused: HWND Unknown");
    }

    #[test]
    fn test_workspace_line() {
        let ws = WorkspaceInfo {
            id: Some(1),
            name: Some("main".to_string()),
            monitor: Some(0),
            window_count: 3,
            active: true,
            visible: None,
        };
        assert_eq!(workspace(&ws), "● Workspace 1: main (3 windows, monitor 0)");

        let idle = WorkspaceInfo::default();
        assert_eq!(workspace(&idle), "○ Workspace ?: Unknown (0 windows, monitor ?)");
    }

    #[test]
    fn test_active_window_block() {
        let window = WindowInfo {
            hwnd: Some(Handle::from("131542")),
            title: Some("Untitled - Notepad".to_string()),
            workspace: Some(1),
            rect: Some(Rect {
                x: 10,
                y: 20,
                width: 800,
                height: 600,
            }),
            ..WindowInfo::default()
        };

        let block = active_window(&window);
        assert!(block.starts_with("Active Window:\n\n"));
        assert!(block.contains("  HWND:       131542"));
        assert!(block.contains("  Class:      Unknown"));
        assert!(block.contains("  Monitor:    ?"));
        assert!(block.ends_with("  Size:       800x600"));
    }
}
