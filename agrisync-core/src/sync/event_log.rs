//! Bounded log of recent sync activity, newest first.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::monitor::ConnectionState;
use crate::models::{ChangeKind, ResourceKey};

#[derive(Debug, Clone, PartialEq)]
pub enum LogKind {
    /// A change applied to a live view
    Change { kind: ChangeKind, key: String },
    /// A snapshot fetched from the query client
    Fetched { records: usize },
    /// The connection changed state
    Connection(ConnectionState),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    /// Resource the entry concerns, if any
    pub resource: Option<ResourceKey>,
    pub kind: LogKind,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.at.format("%H:%M:%S"))?;
        match (&self.kind, &self.resource) {
            (LogKind::Change { kind, key }, Some(resource)) => {
                write!(f, "{} {} {}", kind.as_str(), resource, key)
            }
            (LogKind::Change { kind, key }, None) => write!(f, "{} {}", kind.as_str(), key),
            (LogKind::Fetched { records }, Some(resource)) => {
                write!(f, "FETCH {} ({} records)", resource, records)
            }
            (LogKind::Fetched { records }, None) => write!(f, "FETCH ({} records)", records),
            (LogKind::Connection(state), _) => write!(f, "CONNECTION {}", state),
        }
    }
}

#[derive(Debug)]
pub struct EventLog {
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, resource: Option<&ResourceKey>, kind: LogKind) {
        let entry = LogEntry {
            at: Utc::now(),
            resource: resource.cloned(),
            kind,
        };
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push_front(entry);
        entries.truncate(self.capacity);
    }

    /// Entries, newest first.
    pub fn recent(&self) -> Vec<LogEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Scope;

    #[test]
    fn test_keeps_newest_up_to_capacity() {
        let log = EventLog::new(3);
        let key = ResourceKey::new("farms", Scope::owner("U1"));
        for i in 0..5 {
            log.record(
                Some(&key),
                LogKind::Change {
                    kind: ChangeKind::Insert,
                    key: format!("f{}", i),
                },
            );
        }

        let keys: Vec<String> = log
            .recent()
            .into_iter()
            .map(|e| match e.kind {
                LogKind::Change { key, .. } => key,
                other => panic!("Unexpected entry {:?}", other),
            })
            .collect();
        assert_eq!(keys, vec!["f4", "f3", "f2"]);
    }

    #[test]
    fn test_display() {
        let log = EventLog::new(5);
        log.record(
            Some(&ResourceKey::new("crops", Scope::farm("F1"))),
            LogKind::Fetched { records: 4 },
        );
        log.record(
            None,
            LogKind::Connection(ConnectionState::Reconnecting { attempt: 2 }),
        );

        let lines: Vec<String> = log.recent().iter().map(|e| e.to_string()).collect();
        assert!(lines[0].ends_with("CONNECTION reconnecting (attempt 2)"));
        assert!(lines[1].ends_with("FETCH crops[farm_id=eq.F1] (4 records)"));
    }
}
