mod common;

use std::sync::Arc;

use common::{FakeOutcome, FakeQueue, FlowBuilder, chain_flow, fast_scheduler_config, init_tracing, with_timeout};
use flowtk::config::SchedulerConfig;
use flowtk::engine::{FlowScheduler, Launcher, StopReason};
use flowtk::errors::FlowError;
use flowtk::flow::{Dependency, Flow, FlowLock, has_pickle};
use flowtk::qadapters::{Backends, JobState};
use flowtk::status::Status;

fn backends_with(fake: &Arc<FakeQueue>) -> Backends {
    let mut backends = Backends::empty();
    backends.register(fake.clone());
    backends
}

#[tokio::test]
async fn interrupted_flow_resumes_from_disk() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let workdir = dir.path().join("flow");
    let (flow, ids) = chain_flow(&workdir, &["a", "b", "c"]);
    flow.build_and_pickle_dump().unwrap();
    let fake = Arc::new(FakeQueue::new());

    let one_cycle = SchedulerConfig {
        max_cycles: Some(1),
        ..fast_scheduler_config()
    };
    let mut scheduler = FlowScheduler::new(flow, backends_with(&fake), &one_cycle).unwrap();
    let reason = with_timeout(scheduler.run()).await.unwrap();
    assert_eq!(reason, StopReason::MaxCycles(1));
    drop(scheduler);

    let restored = Flow::pickle_load(&workdir).unwrap();
    assert_eq!(restored.task(ids[0]).unwrap().status(), Status::Completed);
    assert_eq!(restored.task(ids[1]).unwrap().status(), Status::Ready);
    assert_eq!(restored.task(ids[2]).unwrap().status(), Status::Initialized);

    let mut scheduler =
        FlowScheduler::new(restored, backends_with(&fake), &fast_scheduler_config()).unwrap();
    let reason = with_timeout(scheduler.run()).await.unwrap();
    assert_eq!(reason, StopReason::AllOk);

    // Nothing ran twice.
    for id in ids {
        assert_eq!(fake.submissions_of(id), 1);
    }
}

#[tokio::test]
async fn running_job_is_polled_again_after_reload() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let workdir = dir.path().join("flow");
    let (flow, ids) = chain_flow(&workdir, &["a", "b"]);
    let fake = Arc::new(FakeQueue::new().script(ids[0], [FakeOutcome::Hang]));

    let one_cycle = SchedulerConfig {
        max_cycles: Some(1),
        ..fast_scheduler_config()
    };
    let mut scheduler = FlowScheduler::new(flow, backends_with(&fake), &one_cycle).unwrap();
    assert_eq!(with_timeout(scheduler.run()).await.unwrap(), StopReason::MaxCycles(1));
    let job_id = scheduler.flow().task(ids[0]).unwrap().job_id().cloned().unwrap();
    drop(scheduler);

    let restored = Flow::pickle_load(&workdir).unwrap();
    let a = restored.task(ids[0]).unwrap();
    assert_eq!(a.status(), Status::Running);
    assert_eq!(a.job_id(), Some(&job_id));

    fake.finish_hanging().unwrap();
    let mut scheduler =
        FlowScheduler::new(restored, backends_with(&fake), &fast_scheduler_config()).unwrap();
    assert_eq!(with_timeout(scheduler.run()).await.unwrap(), StopReason::AllOk);

    let flow = scheduler.into_flow();
    assert_eq!(fake.submissions_of(ids[0]), 1);
    assert_eq!(flow.task(ids[0]).unwrap().attempts().len(), 1);
    assert_eq!(flow.task(ids[0]).unwrap().job_id(), Some(&job_id));
}

#[tokio::test]
async fn done_task_saved_before_classification_is_finished_on_resume() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let workdir = dir.path().join("flow");
    let (flow, ids) = chain_flow(&workdir, &["a", "b"]);
    let fake = Arc::new(FakeQueue::new().script(ids[0], [FakeOutcome::Hang]));

    let one_cycle = SchedulerConfig {
        max_cycles: Some(1),
        ..fast_scheduler_config()
    };
    let mut scheduler = FlowScheduler::new(flow, backends_with(&fake), &one_cycle).unwrap();
    with_timeout(scheduler.run()).await.unwrap();
    let mut flow = scheduler.into_flow();

    // Crash between the poll and the classification.
    fake.finish_hanging().unwrap();
    assert!(flow.task_mut(ids[0]).unwrap().apply_job_state(JobState::Done).unwrap());
    flow.pickle_dump().unwrap();

    let restored = Flow::pickle_load(&workdir).unwrap();
    assert_eq!(restored.task(ids[0]).unwrap().status(), Status::Done);
    let mut scheduler =
        FlowScheduler::new(restored, backends_with(&fake), &fast_scheduler_config()).unwrap();
    assert_eq!(with_timeout(scheduler.run()).await.unwrap(), StopReason::AllOk);
    assert_eq!(fake.submissions_of(ids[0]), 1);
}

#[test]
fn locked_tasks_are_recovered_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let workdir = dir.path().join("flow");
    let (mut flow, ids) = chain_flow(&workdir, &["a"]);
    flow.build().unwrap();
    flow.refresh_readiness().unwrap();
    flow.task_mut(ids[0]).unwrap().set_status(Status::Locked).unwrap();
    flow.pickle_dump().unwrap();

    let restored = Flow::pickle_load(&workdir).unwrap();
    assert_eq!(restored.task(ids[0]).unwrap().status(), Status::Ready);
}

#[test]
fn second_scheduler_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let first = FlowLock::acquire(dir.path()).unwrap();

    let err = FlowLock::acquire(dir.path()).unwrap_err();
    assert!(matches!(err, FlowError::FlowLocked(_)));

    drop(first);
    assert!(FlowLock::acquire(dir.path()).is_ok());
}

#[test]
fn dependency_cycles_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (mut flow, ids) = chain_flow(dir.path().join("flow"), &["a", "b", "c"]);

    let err = flow.add_dependency(ids[0], Dependency::new(ids[2])).unwrap_err();
    assert!(matches!(err, FlowError::DagCycle(_)));
    assert!(flow.task(ids[0]).unwrap().deps().is_empty());
}

#[test]
fn excluded_works_still_count_for_all_ok() {
    let dir = tempfile::tempdir().unwrap();
    let (mut flow, ids) = FlowBuilder::new(dir.path().join("flow"))
        .work("main")
        .task("a")
        .work("extra")
        .task("b")
        .exclude_current_work()
        .build();

    assert_eq!(flow.benchmark_works().count(), 1);

    for id in [ids["a"], ids["b"]] {
        flow.refresh_readiness().unwrap();
        let task = flow.task_mut(id).unwrap();
        for st in [Status::Locked, Status::Submitted, Status::Done] {
            task.set_status(st).unwrap();
        }
        if id == ids["a"] {
            task.set_status(Status::Completed).unwrap();
        } else {
            task.set_status(Status::AbiCritical).unwrap();
            task.give_up().unwrap();
        }
    }

    assert!(!flow.all_ok());
}

#[tokio::test]
async fn launcher_runs_a_single_cycle() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let workdir = dir.path().join("flow");
    let (mut flow, ids) = chain_flow(&workdir, &["a", "b"]);
    flow.build_and_pickle_dump().unwrap();
    let fake = Arc::new(FakeQueue::new());
    let backends = backends_with(&fake);

    let report = with_timeout(async {
        Launcher::new(&mut flow, &backends, &fast_scheduler_config())
            .unwrap()
            .single_shot()
            .await
    })
    .await
    .unwrap();

    assert_eq!(report.submitted, 1);
    assert_eq!(report.finished, 1);
    assert_eq!(fake.submitted(), vec![ids[0].to_string()]);
    assert!(has_pickle(&workdir));

    let restored = Flow::pickle_load(&workdir).unwrap();
    assert_eq!(restored.task(ids[0]).unwrap().status(), Status::Completed);
    assert_eq!(restored.task(ids[1]).unwrap().status(), Status::Initialized);
}
