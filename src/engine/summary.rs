// src/engine/summary.rs

//! Human-readable status lines and the final failure report.

use std::fmt::Write as _;

use crate::flow::Flow;
use crate::status::Status;

/// Number of log lines shown per failed task.
pub const TAIL_LINES: usize = 10;

/// `cycle 3: completed=2 running=1 ready=4` (zero counts omitted).
pub fn cycle_line(cycle: u64, flow: &Flow) -> String {
    let counts = flow.status_counts();
    let mut out = format!("cycle {cycle}:");
    for (status, n) in counts.iter().rev() {
        let _ = write!(out, " {status}={n}");
    }
    out
}

/// Failing tasks with their last report entries and log tail.
///
/// Empty when nothing failed.
pub fn failure_report(flow: &Flow, tail: usize) -> String {
    let mut out = String::new();

    for task in flow.tasks() {
        let failed = task.status() == Status::Error || task.status().is_critical();
        if !failed && task.unreachable().is_none() {
            continue;
        }

        let _ = writeln!(out, "{} {} [{}]", task.id(), task.name(), task.status());
        if let Some(producer) = task.unreachable() {
            let _ = writeln!(out, "  skipped: producer {producer} failed");
            continue;
        }
        if let Some(failure) = task.failure() {
            let _ = writeln!(out, "  reason: {failure}");
        }
        if let Some(report) = task.cached_report() {
            for event in report.critical_events().chain(report.warnings()).take(5) {
                let _ = writeln!(out, "  event: {event}");
            }
        }
        let lines = task.last_log_lines(tail);
        if !lines.is_empty() {
            let _ = writeln!(out, "  last {} log lines:", lines.len());
            for line in lines {
                let _ = writeln!(out, "    | {line}");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskManager;
    use crate::flow::Dependency;
    use crate::input::InputPayload;

    #[test]
    fn cycle_line_counts_statuses() {
        let mut flow = Flow::new("/tmp/flowtk-summary", TaskManager::default());
        let w = flow.register_work("w");
        flow.register_task(w, "a", InputPayload::new("true"), vec![]).unwrap();
        flow.register_task(w, "b", InputPayload::new("true"), vec![]).unwrap();
        assert_eq!(cycle_line(1, &flow), "cycle 1: initialized=2");
    }

    #[test]
    fn failure_report_names_unreachable_consumers() {
        let mut flow = Flow::new("/tmp/flowtk-summary", TaskManager::default());
        let w = flow.register_work("w");
        let a = flow.register_task(w, "a", InputPayload::new("true"), vec![]).unwrap();
        flow.register_task(w, "b", InputPayload::new("true"), vec![Dependency::new(a)])
            .unwrap();
        assert!(failure_report(&flow, TAIL_LINES).is_empty());

        flow.refresh_readiness().unwrap();
        let t = flow.task_mut(a).unwrap();
        t.set_status(Status::Locked).unwrap();
        t.set_status(Status::Error).unwrap();
        flow.refresh_readiness().unwrap();

        let report = failure_report(&flow, TAIL_LINES);
        assert!(report.contains("w0_t0 a [error]"));
        assert!(report.contains("skipped: producer w0_t0 failed"));
    }
}
