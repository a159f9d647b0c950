use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Things the plugin does that are worth keeping a record of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    ImageGenerated,
    GenerationFailed,
    ImagesCleaned,
    OldImagesSwept,
}

impl ActivityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ImageGenerated => "image_generated",
            Self::GenerationFailed => "generation_failed",
            Self::ImagesCleaned => "images_cleaned",
            Self::OldImagesSwept => "old_images_swept",
        }
    }
}

// Keys owned by the record header; details cannot replace them.
const HEADER_KEYS: [&str; 3] = ["type", "session_id", "ts"];

#[derive(Serialize)]
struct ActivityRecord<'a> {
    #[serde(rename = "type")]
    kind: ActivityKind,
    session_id: &'a str,
    ts: String,
    #[serde(flatten)]
    details: Map<String, Value>,
}

/// JSONL journal of plugin activity for one plugin session.
///
/// Clones write to the same journal, so the retention thread and the chat
/// handler can share it.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    inner: Arc<Journal>,
}

#[derive(Debug)]
struct Journal {
    path: PathBuf,
    session_id: String,
    append: Mutex<()>,
}

impl ActivityLog {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Journal {
                path: path.into(),
                session_id: session_id.into(),
                append: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Appends one record. `details` should be a JSON object; anything else
    /// is kept under a `detail` key.
    pub fn record(&self, kind: ActivityKind, details: Value) -> Result<()> {
        let mut details = match details {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => Map::from_iter([("detail".to_string(), other)]),
        };
        for key in HEADER_KEYS {
            details.remove(key);
        }
        let line = serde_json::to_string(&ActivityRecord {
            kind,
            session_id: &self.inner.session_id,
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            details,
        })?;

        let path = &self.inner.path;
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let _guard = self
            .inner
            .append
            .lock()
            .map_err(|_| anyhow!("activity log lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open activity log {}", path.display()))?;
        writeln!(file, "{line}")
            .with_context(|| format!("failed to append to {}", path.display()))?;
        Ok(())
    }
}
