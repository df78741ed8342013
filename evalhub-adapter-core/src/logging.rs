use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEvent {
    pub ts: DateTime<Utc>,
    pub level: LogLevel,
    pub job_id: Option<String>,
    pub message: String,
    pub fields: HashMap<String, String>,
}

pub trait EventLogger: Send + Sync {
    fn log(&self, event: LogEvent);
}

#[derive(Default)]
pub struct NoopEventLogger;

impl EventLogger for NoopEventLogger {
    fn log(&self, _event: LogEvent) {}
}

pub type SharedEventLogger = Arc<dyn EventLogger>;

/// Writes one JSON object per line to stderr, dropping events below `min_level`.
pub struct StderrEventLogger {
    min_level: LogLevel,
}

impl StderrEventLogger {
    pub fn new(min_level: LogLevel) -> Self {
        Self { min_level }
    }
}

impl Default for StderrEventLogger {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

impl EventLogger for StderrEventLogger {
    fn log(&self, event: LogEvent) {
        if event.level < self.min_level {
            return;
        }
        let Ok(line) = serde_json::to_string(&event) else {
            return;
        };
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{line}");
    }
}

/// In-memory ring of the most recent events. Used by tests and by hosts
/// that embed an adapter and want to inspect what it reported.
pub struct BufferedEventLogger {
    capacity: usize,
    events: Mutex<VecDeque<LogEvent>>,
}

impl BufferedEventLogger {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Buffered events, oldest first.
    pub fn events(&self) -> Vec<LogEvent> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.iter().cloned().collect()
    }

    pub fn job_events(&self, job_id: &str) -> Vec<LogEvent> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events
            .iter()
            .filter(|ev| ev.job_id.as_deref() == Some(job_id))
            .cloned()
            .collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events().into_iter().map(|ev| ev.message).collect()
    }
}

impl Default for BufferedEventLogger {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventLogger for BufferedEventLogger {
    fn log(&self, event: LogEvent) {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.push_back(event);
        while events.len() > self.capacity {
            events.pop_front();
        }
    }
}

impl LogEvent {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            level,
            job_id: None,
            message: message.into(),
            fields: HashMap::new(),
        }
    }

    pub fn with_job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_field(mut self, k: impl Into<String>, v: impl Into<String>) -> Self {
        self.fields.insert(k.into(), v.into());
        self
    }
}
