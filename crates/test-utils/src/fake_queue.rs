use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use flowtk::config::{Limits, QueueKind};
use flowtk::errors::{QueueError, QueueFailure};
use flowtk::events::COMPLETION_MARKER;
use flowtk::qadapters::{BoxFuture, JobId, JobRequest, JobState, QueueAdapter};

/// What a fake job does once submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeOutcome {
    /// Exit 0 with a clean log.
    Clean,
    /// Exit 0 but the log reports a BUG event.
    Bug,
    /// Exit 0 with an unconverged run.
    Unconverged,
    /// Non-zero exit code.
    Exit(i32),
    /// The queue killed the job before it wrote an exit code.
    Killed,
    /// Exit 0 with a log holding bytes that are not UTF-8.
    Garbled,
    /// Runs until [`FakeQueue::finish_hanging`] is called, then exits 0.
    Hang,
}

/// A fake queue that:
/// - records which jobs were submitted (by task id, e.g. `w0_t1`)
/// - writes the log / exit code of each job at submission time
/// - reports `Done` on poll unless the job hangs.
///
/// Outcomes are scripted per task id and consumed one per submission;
/// unscripted submissions finish `Clean`.
#[derive(Default)]
pub struct FakeQueue {
    script: Mutex<HashMap<String, VecDeque<FakeOutcome>>>,
    submitted: Mutex<Vec<String>>,
    /// Job id -> exit code file written on release.
    hanging: Mutex<HashMap<String, PathBuf>>,
    cancelled: Mutex<Vec<String>>,
    next_id: AtomicU64,
    /// Polls to fail with a transient error before answering.
    transient_polls: AtomicU32,
}

impl FakeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `outcomes` for the task with the given id.
    pub fn script(self, task: impl ToString, outcomes: impl IntoIterator<Item = FakeOutcome>) -> Self {
        self.script
            .lock()
            .unwrap()
            .entry(task.to_string())
            .or_default()
            .extend(outcomes);
        self
    }

    pub fn fail_polls(self, n: u32) -> Self {
        self.transient_polls.store(n, Ordering::SeqCst);
        self
    }

    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn submissions_of(&self, task: impl ToString) -> usize {
        let task = task.to_string();
        self.submitted.lock().unwrap().iter().filter(|t| **t == task).count()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    /// Let every hanging job finish cleanly.
    pub fn finish_hanging(&self) -> std::io::Result<()> {
        for (_, exitcode) in self.hanging.lock().unwrap().drain() {
            fs::write(exitcode, "0\n")?;
        }
        Ok(())
    }

    fn write_outputs(job: &JobRequest, outcome: &FakeOutcome) -> std::io::Result<()> {
        if *outcome == FakeOutcome::Garbled {
            let mut log = format!("fake run of {}\n", job.name).into_bytes();
            log.extend_from_slice(b"\xff\xfe garbled\n");
            log.extend_from_slice(format!("{COMPLETION_MARKER}\n").as_bytes());
            fs::write(&job.stdout, log)?;
            return fs::write(&job.exitcode, "0\n");
        }

        let log = match outcome {
            FakeOutcome::Clean
            | FakeOutcome::Garbled
            | FakeOutcome::Exit(_)
            | FakeOutcome::Killed
            | FakeOutcome::Hang => {
                format!("fake run of {}\n{COMPLETION_MARKER}\n", job.name)
            }
            FakeOutcome::Bug => format!(
                "fake run of {}\n--- !BUG\nsrc_file: m_fake.F90\nsrc_line: 1\nmessage: |\n    fake bug\n...\n",
                job.name
            ),
            FakeOutcome::Unconverged => format!(
                "fake run of {}\n--- !ScfConvergenceWarning\nmessage: |\n    nstep reached\n...\n{COMPLETION_MARKER}\n",
                job.name
            ),
        };
        fs::write(&job.stdout, log)?;

        match outcome {
            FakeOutcome::Exit(code) => fs::write(&job.exitcode, format!("{code}\n"))?,
            FakeOutcome::Killed | FakeOutcome::Hang => {}
            _ => fs::write(&job.exitcode, "0\n")?,
        }
        Ok(())
    }
}

impl QueueAdapter for FakeQueue {
    fn kind(&self) -> QueueKind {
        QueueKind::Shell
    }

    fn generate_submission_script(&self, job: &JobRequest) -> Result<String, QueueError> {
        Ok(format!("#!/bin/bash\n# fake job {}\n", job.name))
    }

    fn submit<'a>(&'a self, _script: &'a Path, job: &'a JobRequest) -> BoxFuture<'a, Result<JobId, QueueError>> {
        Box::pin(async move {
            let outcome = self
                .script
                .lock()
                .unwrap()
                .get_mut(&job.name)
                .and_then(|q| q.pop_front())
                .unwrap_or(FakeOutcome::Clean);

            Self::write_outputs(job, &outcome).map_err(|e| QueueError::Submission(e.to_string()))?;
            self.submitted.lock().unwrap().push(job.name.clone());

            let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
            if outcome == FakeOutcome::Hang {
                self.hanging
                    .lock()
                    .unwrap()
                    .insert(id.clone(), job.exitcode.clone());
            }
            Ok(JobId::from(id.as_str()))
        })
    }

    fn cancel<'a>(&'a self, job_id: &'a JobId) -> BoxFuture<'a, Result<(), QueueError>> {
        Box::pin(async move {
            self.cancelled.lock().unwrap().push(job_id.to_string());
            self.hanging.lock().unwrap().remove(&job_id.to_string());
            Ok(())
        })
    }

    fn poll<'a>(&'a self, job_id: &'a JobId) -> BoxFuture<'a, Result<JobState, QueueError>> {
        Box::pin(async move {
            let pending = self.transient_polls.load(Ordering::SeqCst);
            if pending > 0 {
                self.transient_polls.store(pending - 1, Ordering::SeqCst);
                return Err(QueueError::TransientQuery("fake queue timed out".into()));
            }
            if self.hanging.lock().unwrap().contains_key(&job_id.to_string()) {
                Ok(JobState::Running)
            } else {
                Ok(JobState::Done)
            }
        })
    }

    fn default_resource_limits(&self) -> Limits {
        Limits::default()
    }

    fn classify_queue_errors(&self, _qerr: &str) -> Option<QueueFailure> {
        None
    }
}
