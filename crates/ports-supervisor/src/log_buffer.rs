use std::collections::{HashMap, VecDeque};
use parking_lot::Mutex;

/// Lines kept per tunnel.
pub const MAX_LOG_LINES: usize = 300;

/// Recent output per profile, oldest evicted first.
#[derive(Debug, Default)]
pub struct LogBuffer {
    lines: Mutex<HashMap<String, VecDeque<String>>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fresh, empty history for `name`.
    pub fn reset(&self, name: &str) {
        self.lines.lock().insert(name.to_string(), VecDeque::new());
    }

    /// Appends the trimmed line; blank lines are dropped.
    pub fn append(&self, name: &str, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }

        let mut lines = self.lines.lock();
        let buf = lines.entry(name.to_string()).or_default();
        if buf.len() == MAX_LOG_LINES {
            buf.pop_front();
        }
        buf.push_back(trimmed.to_string());
    }

    pub fn snapshot(&self, name: &str) -> Vec<String> {
        self.lines
            .lock()
            .get(name)
            .map(|buf| buf.iter().cloned().collect())
            .unwrap_or_default()
    }
}
