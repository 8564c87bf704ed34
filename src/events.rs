// src/events.rs

//! Event reports: structured classification of a job's log output.
//!
//! Solvers write events into their log as small YAML documents:
//!
//! ```text
//! --- !WARNING
//! src_file: m_scfcv.F90
//! src_line: 412
//! message: |
//!     nstep reached before convergence
//! ...
//! ```
//!
//! and print `Calculation completed.` once the run reached its normal end.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::Result;

/// Marker printed by the solver when the run reached its normal end.
pub const COMPLETION_MARKER: &str = "Calculation completed.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Error,
    Bug,
    Warning,
    Comment,
}

impl EventKind {
    /// Classify a YAML tag (`ERROR`, `ScfConvergenceWarning`, ...).
    pub fn from_tag(tag: &str) -> Self {
        let lower = tag.to_lowercase();
        if lower == "bug" || lower.ends_with("bug") {
            EventKind::Bug
        } else if lower == "error" || lower.ends_with("error") {
            EventKind::Error
        } else if lower == "warning" || lower.ends_with("warning") {
            EventKind::Warning
        } else {
            EventKind::Comment
        }
    }
}

/// A single entry of an [`EventReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    /// Raw YAML tag, e.g. `WARNING` or `ScfConvergenceWarning`.
    pub tag: String,
    pub message: String,
    #[serde(default)]
    pub src_file: Option<String>,
    #[serde(default)]
    pub src_line: Option<u32>,
}

impl Event {
    /// Convergence problems are reported through dedicated warning tags.
    pub fn is_convergence_warning(&self) -> bool {
        self.tag.ends_with("ConvergenceWarning")
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.tag, self.message.trim())
    }
}

/// Body of a YAML event document.
#[derive(Debug, Deserialize)]
struct EventBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    src_file: Option<String>,
    #[serde(default)]
    src_line: Option<u32>,
}

/// Result of inspecting a finished job's log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventReport {
    /// Log file the report was built from, if any.
    #[serde(default)]
    pub filename: Option<PathBuf>,
    pub run_completed: bool,
    pub events: Vec<Event>,
}

fn header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^---\s+!(\w+)\s*$").expect("valid event header regex"))
}

impl EventReport {
    /// Parse a log text into a report.
    pub fn parse(text: &str) -> Self {
        let mut events = Vec::new();
        let mut run_completed = false;

        let mut lines = text.lines();
        while let Some(line) = lines.next() {
            if line.trim_start().starts_with(COMPLETION_MARKER) {
                run_completed = true;
                continue;
            }

            let Some(caps) = header_regex().captures(line.trim_end()) else {
                continue;
            };
            let tag = caps[1].to_string();

            let mut body = String::new();
            for inner in lines.by_ref() {
                if inner.trim_end() == "..." {
                    break;
                }
                body.push_str(inner);
                body.push('\n');
            }

            events.push(Self::event_from_doc(tag, &body));
        }

        Self {
            filename: None,
            run_completed,
            events,
        }
    }

    /// Parse the log stored at `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        // Solver output is not guaranteed to be UTF-8.
        let bytes = std::fs::read(path)?;
        let text = String::from_utf8_lossy(&bytes);
        let mut report = Self::parse(&text);
        report.filename = Some(path.to_path_buf());
        debug!(
            file = %path.display(),
            events = report.events.len(),
            completed = report.run_completed,
            "parsed event report"
        );
        Ok(report)
    }

    fn event_from_doc(tag: String, body: &str) -> Event {
        let kind = EventKind::from_tag(&tag);
        match serde_yaml::from_str::<EventBody>(body) {
            Ok(doc) => Event {
                kind,
                tag,
                message: doc.message.unwrap_or_default().trim_end().to_string(),
                src_file: doc.src_file,
                src_line: doc.src_line,
            },
            // Malformed bodies still count; keep the raw text.
            Err(_) => Event {
                kind,
                tag,
                message: body.trim().to_string(),
                src_file: None,
                src_line: None,
            },
        }
    }

    pub fn errors(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(|e| e.kind == EventKind::Error)
    }

    pub fn bugs(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(|e| e.kind == EventKind::Bug)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(|e| e.kind == EventKind::Warning)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn has_bugs(&self) -> bool {
        self.bugs().next().is_some()
    }

    pub fn has_warnings(&self) -> bool {
        self.warnings().next().is_some()
    }

    /// Errors and bugs, in log order.
    pub fn critical_events(&self) -> impl Iterator<Item = &Event> {
        self.events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::Error | EventKind::Bug))
    }
}

impl fmt::Display for EventReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "completed={} errors={} bugs={} warnings={}",
            self.run_completed,
            self.errors().count(),
            self.bugs().count(),
            self.warnings().count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = r#"
 iteration 1
--- !COMMENT
message: |
    starting SCF
...
--- !WARNING
src_file: m_io.F90
src_line: 12
message: |
    file not found, using defaults
...
 Calculation completed.
"#;

    #[test]
    fn clean_log_with_warning() {
        let report = EventReport::parse(LOG);
        assert!(report.run_completed);
        assert_eq!(report.events.len(), 2);
        assert!(report.has_warnings());
        assert!(!report.has_errors());
        assert_eq!(report.critical_events().count(), 0);

        let warning = report.warnings().next().unwrap();
        assert_eq!(warning.src_file.as_deref(), Some("m_io.F90"));
        assert_eq!(warning.src_line, Some(12));
        assert_eq!(warning.message, "file not found, using defaults");
    }

    #[test]
    fn bug_makes_report_unclean() {
        let log = "--- !BUG\nmessage: |\n    negative density\n...\n Calculation completed.\n";
        let report = EventReport::parse(log);
        assert!(report.has_bugs());
        assert!(report.run_completed);
        assert_eq!(report.critical_events().count(), 1);
    }

    #[test]
    fn convergence_warning_detected() {
        let log = "--- !ScfConvergenceWarning\nmessage: |\n    nstep reached\n...\n Calculation completed.\n";
        let report = EventReport::parse(log);
        assert!(report.warnings().any(Event::is_convergence_warning));
        assert_eq!(report.critical_events().count(), 0);
    }

    #[test]
    fn log_with_invalid_utf8_is_still_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let mut bytes = b"ok\n\xff\xfe\n--- !BUG\nmessage: |\n    bad\n...\n".to_vec();
        bytes.extend_from_slice(b" Calculation completed.\n");
        std::fs::write(&path, bytes).unwrap();

        let report = EventReport::from_file(&path).unwrap();
        assert!(report.run_completed);
        assert!(report.has_bugs());
        assert_eq!(report.filename.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn incomplete_log_is_not_completed() {
        let report = EventReport::parse("--- !ERROR\nmessage: boom\n...\n");
        assert!(!report.run_completed);
        assert_eq!(report.errors().next().unwrap().message, "boom");
    }

    #[test]
    fn malformed_body_keeps_raw_text() {
        let report = EventReport::parse("--- !ERROR\n: : [not yaml\n...\n");
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].kind, EventKind::Error);
        assert!(report.events[0].message.contains("not yaml"));
    }

    #[test]
    fn tag_classification() {
        assert_eq!(EventKind::from_tag("DilatmxError"), EventKind::Error);
        assert_eq!(EventKind::from_tag("RelaxConvergenceWarning"), EventKind::Warning);
        assert_eq!(EventKind::from_tag("BUG"), EventKind::Bug);
        assert_eq!(EventKind::from_tag("YAML_DATA"), EventKind::Comment);
    }
}
