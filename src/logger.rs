use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::warn;

use crate::diff::diff_json;

pub enum MessageLogMode {
    Full,
    /// First body per endpoint in full, then only the changed JSON paths.
    Diffed,
}

/// Appends one NDJSON line per device request.
pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous: HashMap<String, Value>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            mode,
            file,
            previous: HashMap::new(),
        })
    }

    pub fn log_write(&mut self, path: &str, key: &str, value: &str) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "write",
            "path": path,
            "query": { key: value },
        });
        self.write_line(&entry);
    }

    pub fn log_read(&mut self, path: &str, status: u16, body: &Value) {
        let entry = match self.mode {
            MessageLogMode::Full => json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "read",
                "path": path,
                "status": status,
                "body": body,
            }),
            MessageLogMode::Diffed => match self.previous.insert(path.to_string(), body.clone()) {
                None => json!({
                    "ts": Utc::now().to_rfc3339(),
                    "dir": "read",
                    "path": path,
                    "status": status,
                    "full": true,
                    "body": body,
                }),
                Some(prev) => {
                    let mut changes = Vec::new();
                    diff_json(&prev, body, "", &mut changes);
                    let changes: Vec<Value> = changes
                        .iter()
                        .map(|(path, old, new)| json!({ "path": path, "old": old, "new": new }))
                        .collect();
                    json!({
                        "ts": Utc::now().to_rfc3339(),
                        "dir": "read",
                        "path": path,
                        "status": status,
                        "changes": changes,
                    })
                }
            },
        };
        self.write_line(&entry);
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}
