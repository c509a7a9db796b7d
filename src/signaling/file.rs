// src/signaling/file.rs
//! Shared-directory signaling for local testing: every message is one JSON
//! file in a directory both peers can reach. No server required.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use super::{SignalListener, SignalMessage, Signaling};

/// Files older than this are deleted on every processing pass.
const MAX_SIGNAL_AGE: Duration = Duration::from_secs(300);

/// Filesystem-backed signaling adapter.
pub struct FileSignaling {
    directory: PathBuf,
    peer_id: String,
    last_processed_index: usize,
    active: bool,
    listeners: Vec<SignalListener>,
}

impl FileSignaling {
    /// Create an adapter over `directory`, with a freshly generated peer id.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            peer_id: Uuid::new_v4().to_string(),
            last_processed_index: 0,
            active: false,
            listeners: Vec::new(),
        }
    }

    /// `signal_<unix_ts>_<peer>_<uuid>.json`; the timestamp prefix makes
    /// a lexicographic sort deliver FIFO per sender.
    fn message_file_name(&self) -> String {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        format!("signal_{timestamp}_{}_{}.json", self.peer_id, Uuid::new_v4())
    }

    /// All signal files, sorted by name.
    fn list_signal_files(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.directory) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().map(|ext| ext == "json").unwrap_or(false))
            .collect();
        files.sort();
        files
    }

    fn cleanup_old_files(&self) {
        let now = SystemTime::now();
        for path in self.list_signal_files() {
            let Ok(modified) = fs::metadata(&path).and_then(|m| m.modified()) else {
                continue;
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age > MAX_SIGNAL_AGE {
                if fs::remove_file(&path).is_ok() {
                    tracing::trace!(path = %path.display(), "cleaned up old signal file");
                }
            }
        }
    }

    fn read_message(path: &Path) -> Option<SignalMessage> {
        match fs::read_to_string(path) {
            Ok(json) => Some(SignalMessage::from_json(&json)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read signal file");
                None
            }
        }
    }
}

impl Signaling for FileSignaling {
    fn init(&mut self) -> bool {
        if let Err(e) = fs::create_dir_all(&self.directory) {
            tracing::error!(
                directory = %self.directory.display(),
                error = %e,
                "failed to create signaling directory"
            );
            return false;
        }
        tracing::info!(
            peer_id = %self.peer_id,
            directory = %self.directory.display(),
            "file signaling initialized"
        );
        self.active = true;
        true
    }

    fn shutdown(&mut self) {
        if self.active {
            tracing::info!(peer_id = %self.peer_id, "file signaling shut down");
            self.active = false;
        }
    }

    fn send_signal(&mut self, message: &SignalMessage) -> bool {
        if !self.active {
            tracing::warn!("cannot send signal: signaling not active");
            return false;
        }

        let path = self.directory.join(self.message_file_name());
        match fs::write(&path, message.to_json()) {
            Ok(()) => {
                tracing::trace!(path = %path.display(), kind = ?message.kind, "signal sent");
                true
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to write signal file");
                false
            }
        }
    }

    fn process_signals(&mut self) {
        if !self.active {
            return;
        }

        let files = self.list_signal_files();
        for path in files.iter().skip(self.last_processed_index) {
            let Some(message) = Self::read_message(path) else {
                continue;
            };
            if !message.is_for(&self.peer_id) {
                continue;
            }
            tracing::trace!(
                sender = %message.sender_id,
                kind = ?message.kind,
                candidates = message.candidates.len(),
                "signal received"
            );
            for listener in &mut self.listeners {
                listener(&message);
            }
        }
        self.last_processed_index = files.len();

        self.cleanup_old_files();
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn local_peer_id(&self) -> &str {
        &self.peer_id
    }

    fn subscribe(&mut self, listener: SignalListener) {
        self.listeners.push(listener);
    }
}

impl Drop for FileSignaling {
    fn drop(&mut self) {
        self.shutdown();
    }
}
