//! Ingest and check progress reporting.
//!
//! Reports observable progress while the corpus is extracted, chunk and
//! sentence embeddings are fetched, and sentences are checked, so users
//! see how much is left on a large corpus. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// Stage of a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    /// Walking input paths. Total unknown.
    Discovering,
    /// Extracting and chunking documents.
    Extracting,
    /// Fetching embeddings (cache or provider).
    Embedding,
    /// Scoring draft sentences.
    Checking,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Discovering => "discovering",
            Phase::Extracting => "extracting",
            Phase::Embedding => "embedding",
            Phase::Checking => "checking",
        }
    }

    fn unit(self) -> &'static str {
        match self {
            Phase::Discovering | Phase::Extracting => "files",
            Phase::Embedding => "texts",
            Phase::Checking => "sentences",
        }
    }
}

/// A single progress event.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    Started { phase: Phase },
    Advanced { phase: Phase, n: u64, total: u64 },
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "cdrift  embedding  1,234 / 5,000 texts".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Started { phase } => format!("cdrift  {}...\n", phase.as_str()),
            ProgressEvent::Advanced { phase, n, total } => format!(
                "cdrift  {}  {} / {} {}\n",
                phase.as_str(),
                format_number(*n),
                format_number(*total),
                phase.unit()
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Started { phase } => serde_json::json!({
                "event": "progress",
                "phase": phase.as_str(),
            }),
            ProgressEvent::Advanced { phase, n, total } => serde_json::json!({
                "event": "progress",
                "phase": phase.as_str(),
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut out = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Parse a `--progress` value; `auto` picks by TTY.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "auto" => Some(Self::default_for_tty()),
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
