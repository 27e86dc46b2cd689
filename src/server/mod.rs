//! Controller-facing operations and the JSON-over-stdio transport.
//!
//! Each request is one JSON object per line on stdin; each response is one
//! JSON object per line on stdout. The operation set mirrors the tools an
//! automated agent drives a TUI with: launch, view, type, resize, restart,
//! stop, list.

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::core::registry::Registry;
use crate::core::term::RenderFormat;

/// A single request envelope: a correlation id plus the operation.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub id: u64,
    #[serde(flatten)]
    pub request: Request,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    LaunchApp {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    ViewScreen {
        session_id: String,
        #[serde(default)]
        format: Option<String>,
    },
    SendKeys {
        session_id: String,
        keys: String,
    },
    GetCursorPosition {
        session_id: String,
    },
    GetScreenSize {
        session_id: String,
    },
    ResizeTerminal {
        session_id: String,
        width: usize,
        height: usize,
    },
    RestartApp {
        session_id: String,
    },
    StopApp {
        session_id: String,
    },
    ListSessions,
}

#[derive(Debug, Serialize)]
pub struct Response {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(message.into()),
        }
    }
}

/// Execute one operation against the registry.
pub fn dispatch(registry: &Arc<Registry>, envelope: Envelope) -> Response {
    let id = envelope.id;
    match handle(registry, envelope.request) {
        Ok(result) => Response::ok(id, result),
        Err(err) => Response::err(id, err),
    }
}

fn handle(registry: &Arc<Registry>, request: Request) -> Result<Value, String> {
    match request {
        Request::LaunchApp { command, args, env } => {
            debug!(tool = "launch_app", %command, "tool call");
            let session = registry
                .create(command, args, env)
                .map_err(|e| e.to_string())?;
            info!(tool = "launch_app", session_id = %session.id(), "app launched");
            Ok(json!({ "session_id": session.id(), "success": true }))
        }

        Request::ViewScreen { session_id, format } => {
            debug!(tool = "view_screen", %session_id, "tool call");
            let session = registry.get(&session_id).map_err(|e| e.to_string())?;
            let format = RenderFormat::parse(format.as_deref().unwrap_or("plain"));
            let (content, (col, row)) = session.snapshot(format);
            Ok(json!({
                "content": content,
                "cursor": { "row": row, "col": col },
            }))
        }

        Request::SendKeys { session_id, keys } => {
            debug!(tool = "send_keys", %session_id, key_count = keys.len(), "tool call");
            let session = registry.get(&session_id).map_err(|e| e.to_string())?;
            session.send_keys(&keys).map_err(|e| e.to_string())?;
            Ok(json!({ "success": true }))
        }

        Request::GetCursorPosition { session_id } => {
            debug!(tool = "get_cursor_position", %session_id, "tool call");
            let session = registry.get(&session_id).map_err(|e| e.to_string())?;
            let (col, row) = session.cursor();
            Ok(json!({ "row": row, "col": col }))
        }

        Request::GetScreenSize { session_id } => {
            debug!(tool = "get_screen_size", %session_id, "tool call");
            let session = registry.get(&session_id).map_err(|e| e.to_string())?;
            let (width, height) = session.size();
            Ok(json!({ "width": width, "height": height }))
        }

        Request::ResizeTerminal {
            session_id,
            width,
            height,
        } => {
            debug!(tool = "resize_terminal", %session_id, width, height, "tool call");
            let session = registry.get(&session_id).map_err(|e| e.to_string())?;
            session.resize(width, height).map_err(|e| e.to_string())?;
            Ok(json!({ "success": true, "width": width, "height": height }))
        }

        Request::RestartApp { session_id } => {
            debug!(tool = "restart_app", %session_id, "tool call");
            let session = registry.get(&session_id).map_err(|e| e.to_string())?;
            session.restart().map_err(|e| e.to_string())?;
            Ok(json!({ "success": true }))
        }

        Request::StopApp { session_id } => {
            debug!(tool = "stop_app", %session_id, "tool call");
            registry.remove(&session_id).map_err(|e| e.to_string())?;
            Ok(json!({ "success": true }))
        }

        Request::ListSessions => {
            let sessions = registry.list();
            debug!(tool = "list_sessions", count = sessions.len(), "tool call");
            let records: Vec<Value> = sessions
                .iter()
                .map(|info| {
                    json!({
                        "id": info.id,
                        "command": info.command,
                        "state": info.state,
                        "created": info.created.to_rfc3339(),
                    })
                })
                .collect();
            Ok(json!({ "sessions": records }))
        }
    }
}

/// Serve requests line by line until EOF on the input.
pub fn serve<R: BufRead, W: Write>(
    registry: &Arc<Registry>,
    input: R,
    mut output: W,
) -> std::io::Result<()> {
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Envelope>(&line) {
            Ok(envelope) => dispatch(registry, envelope),
            Err(err) => {
                error!(%err, "malformed request line");
                Response::err(0, format!("malformed request: {err}"))
            }
        };
        serde_json::to_writer(&mut output, &response)?;
        output.write_all(b"\n")?;
        output.flush()?;
    }
    Ok(())
}
