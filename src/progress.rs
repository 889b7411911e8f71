//! Sync progress reporting.
//!
//! Emits observable progress during `siphon sync` so long-running
//! datasource fetches (paginated APIs, large directories) show what is
//! happening. Progress goes to **stderr** so stdout remains parseable
//! for scripts.

use std::io::Write;

use serde::Serialize;

/// A single progress event for sync.
///
/// Serializes internally tagged, so JSON consumers can switch on the
/// `phase` field.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SyncProgressEvent {
    /// The datasource is still fetching records (no total yet).
    Fetching { datasource: String },
    /// Ingest phase: n documents processed out of total.
    Ingesting {
        datasource: String,
        n: u64,
        total: u64,
    },
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress: "sync bundestag  ingesting  1,234 / 5,000 documents".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Fetching { datasource } => {
                format!("sync {}  fetching...", datasource)
            }
            SyncProgressEvent::Ingesting {
                datasource,
                n,
                total,
            } => {
                format!(
                    "sync {}  ingesting  {} / {} documents",
                    datasource,
                    format_number(*n),
                    format_number(*total)
                )
            }
        };
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", line);
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        if let Ok(line) = serde_json::to_string(&event) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, d) in digits.bytes().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(d as char);
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
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_groups_thousands() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(12), "12");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn events_serialize_with_phase_tag() {
        let event = SyncProgressEvent::Fetching {
            datasource: "notion".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"phase":"fetching","datasource":"notion"}"#);

        let event = SyncProgressEvent::Ingesting {
            datasource: "pdf".to_string(),
            n: 2,
            total: 5,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"phase":"ingesting","datasource":"pdf","n":2,"total":5}"#
        );
    }
}
