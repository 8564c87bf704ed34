// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod flow;
pub mod input;
pub mod logging;
pub mod qadapters;
pub mod status;
pub mod types;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use tracing::{debug, error, info, warn};

use crate::cli::CliArgs;
use crate::config::{SchedulerConfig, TaskManager, find_manager, find_scheduler_config, load_and_validate};
use crate::engine::{FlowScheduler, Launcher, SchedulerEvent, StopReason, launcher};
use crate::flow::{Flow, FlowLock, has_pickle};
use crate::qadapters::Backends;

/// Exit code used when the flow did not finish cleanly.
pub const EXIT_INCOMPLETE: i32 = 1;

/// Exit code used for configuration errors detected before any job runs.
pub const EXIT_CONFIG: i32 = 2;

/// Number of log lines printed for an input that fails validation.
const VALIDATION_TAIL: usize = 50;

/// What a flow-building closure gets from the CLI.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub workdir: PathBuf,
    pub manager: TaskManager,
}

/// Entry point for programs that build their flow in code.
///
/// Parses the command line, sets up logging and a tokio runtime, calls
/// `build` unless a persisted flow can be resumed, then executes the
/// requested action. Returns the process exit code.
pub fn flow_main<F>(build: F) -> i32
where
    F: FnOnce(BuildContext) -> Result<Flow>,
{
    let args = cli::parse();
    if let Err(e) = logging::init_logging(args.log_level) {
        eprintln!("flowtk: {e}");
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("flowtk: failed to start runtime: {e}");
            return EXIT_CONFIG;
        }
    };

    let default_workdir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .map(|stem| PathBuf::from(format!("flow_{stem}")))
        .unwrap_or_else(|| PathBuf::from("flow"));

    let code = runtime.block_on(async move {
        let workdir = resolve_workdir(&args, default_workdir)?;
        run_with(args, workdir, build).await
    });
    report_exit(code)
}

/// High-level entry point used by `main.rs`: the flow comes from the
/// `FLOWFILE` argument.
pub async fn run(args: CliArgs) -> Result<i32> {
    let flow_file = match args.flowfile.as_deref() {
        Some(path) => Some(load_and_validate(path).with_context(|| format!("loading {}", path.display()))?),
        None if args.status || args.cancel_all => None,
        None => bail!("FLOWFILE is required unless --status or --cancel-all is given"),
    };

    let default_workdir = match (&flow_file, args.flowfile.as_deref()) {
        (Some(file), _) if file.flow.workdir.is_some() => {
            PathBuf::from(file.flow.workdir.clone().unwrap_or_default())
        }
        (_, Some(path)) => default_workdir_for(path),
        _ => bail!("--workdir is required without a FLOWFILE"),
    };
    let workdir = resolve_workdir(&args, default_workdir)?;

    run_with(args, workdir, move |ctx| {
        let file = flow_file.context("no FLOWFILE to build from")?;
        Ok(Flow::from_flow_file(&file, ctx.workdir, ctx.manager)?)
    })
    .await
}

/// Map the outcome of [`run`] to a process exit code, printing errors.
pub fn report_exit(result: Result<i32>) -> i32 {
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("flowtk error: {e:?}");
            EXIT_CONFIG
        }
    }
}

/// `flow_<stem>` next to the current directory.
fn default_workdir_for(flowfile: &Path) -> PathBuf {
    let stem = flowfile
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "flow".to_string());
    PathBuf::from(format!("flow_{stem}"))
}

/// `--workdir` wins, then `--tempdir`, then `default`.
fn resolve_workdir(args: &CliArgs, default: PathBuf) -> Result<PathBuf> {
    if let Some(dir) = &args.workdir {
        return Ok(dir.clone());
    }
    if args.tempdir {
        let dir = tempfile::Builder::new()
            .prefix("flowtk_")
            .tempdir()
            .context("creating temporary workdir")?
            .keep();
        println!("Working in temporary directory {}", dir.display());
        // The flow needs a fresh directory, not an existing empty one.
        return Ok(dir.join("flow"));
    }
    Ok(default)
}

/// Run the action selected on the command line against the flow in
/// `workdir`.
///
/// Errors returned here are configuration or setup problems and map to
/// [`EXIT_CONFIG`]; a scheduler that stops early yields `Ok(EXIT_INCOMPLETE)`.
pub async fn run_with<F>(args: CliArgs, workdir: PathBuf, build: F) -> Result<i32>
where
    F: FnOnce(BuildContext) -> Result<Flow>,
{
    let manager = find_manager(args.manager.as_deref())?;
    let sched_config = find_scheduler_config()?;
    let backends = Backends::with_defaults();

    if args.status {
        let flow = Flow::pickle_load(&workdir)?;
        print!("{}", flow.show_status());
        for entry in flow.benchmark_summary() {
            if let Some(wall) = entry.wall_time {
                println!("[w{}] {}: {} tasks, {:.1}s", entry.work, entry.name, entry.num_tasks, wall.as_secs_f64());
            }
        }
        return Ok(0);
    }

    if args.cancel_all {
        let _lock = FlowLock::acquire(&workdir)?;
        let mut flow = Flow::pickle_load(&workdir)?;
        let cancelled = flow.cancel_all(&backends).await?;
        flow.pickle_dump()?;
        println!("Cancelled {cancelled} job(s)");
        return Ok(0);
    }

    if args.remove && workdir.exists() {
        remove_workdir(&workdir)?;
    }

    let flow = if has_pickle(&workdir) {
        info!(workdir = %workdir.display(), "resuming persisted flow");
        Flow::pickle_load(&workdir)?
    } else {
        let mut flow = build(BuildContext {
            workdir: workdir.clone(),
            manager,
        })?;
        flow.allocate();
        flow
    };

    let started = Instant::now();
    let code = execute(&args, flow, &backends, &sched_config).await;
    if args.prof {
        println!("Execution time: {:.3}s", started.elapsed().as_secs_f64());
    }
    code
}

/// Delete `workdir`, refusing while another process holds its flow lock.
fn remove_workdir(workdir: &Path) -> Result<()> {
    let _lock = FlowLock::acquire(workdir)?;
    println!("Removing old directory {}", workdir.display());
    fs::remove_dir_all(workdir).with_context(|| format!("removing {}", workdir.display()))?;
    Ok(())
}

async fn execute(args: &CliArgs, mut flow: Flow, backends: &Backends, sched_config: &SchedulerConfig) -> Result<i32> {
    if args.plot {
        print!("{}", flow.text_tree());
    }

    if args.graphviz {
        fs::create_dir_all(flow.workdir())?;
        let path = flow.workdir().join("flow.dot");
        fs::write(&path, flow.to_dot())?;
        println!("Graphviz source written to {}", path.display());
    }

    if args.abivalidate && !validate_inputs(&flow) {
        return Ok(EXIT_INCOMPLETE);
    }

    if args.dry_run {
        print!("{}", flow.show_status());
        return Ok(0);
    }

    if args.scheduler {
        let _lock = FlowLock::acquire(flow.workdir())?;
        flow.build_and_pickle_dump()?;
        return run_scheduler(flow, backends.clone(), sched_config).await;
    }

    if args.batch {
        let lock = FlowLock::acquire(flow.workdir())?;
        flow.build_and_pickle_dump()?;
        drop(lock);
        let argv = batch_argv(flow.workdir())?;
        let job_id = launcher::submit_batch_scheduler(flow.workdir(), flow.manager(), backends, argv).await?;
        println!("Scheduler submitted with job id {job_id}");
        return Ok(0);
    }

    if args.launch {
        let _lock = FlowLock::acquire(flow.workdir())?;
        flow.build_and_pickle_dump()?;
        let report = Launcher::new(&mut flow, backends, sched_config)?.single_shot().await?;
        debug!(?report, "launch report");
        print!("{}", flow.show_status());
        return Ok(0);
    }

    let _lock = FlowLock::acquire(flow.workdir())?;
    flow.build_and_pickle_dump()?;
    println!("Flow written to {}", flow.workdir().display());
    Ok(0)
}

/// Print the problems of every failing input. Returns `true` when all
/// inputs are valid.
fn validate_inputs(flow: &Flow) -> bool {
    let builder = flow.input_builder();
    let mut failed = 0usize;

    for task in flow.tasks() {
        let validation = builder.validate(task.input());
        if validation.is_ok() {
            continue;
        }
        failed += 1;
        println!("{} {}: invalid input", task.id(), task.name());
        for problem in validation.problems.iter() {
            println!("  {problem}");
        }
        let skip = validation.log.len().saturating_sub(VALIDATION_TAIL);
        for line in validation.log.iter().skip(skip) {
            println!("  | {line}");
        }
    }

    if failed == 0 {
        println!("Validation succeeded");
        true
    } else {
        error!(failed, "input validation failed");
        false
    }
}

async fn run_scheduler(flow: Flow, backends: Backends, config: &SchedulerConfig) -> Result<i32> {
    let mut scheduler = FlowScheduler::new(flow, backends, config)?;

    // Ctrl-C → stop after the current cycle is persisted.
    {
        let tx = scheduler.event_sender();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(SchedulerEvent::StopRequested).await;
        });
    }

    let reason = match scheduler.run().await {
        Ok(reason) => reason,
        Err(e) => {
            error!(error = %e, "scheduler aborted");
            return Ok(EXIT_INCOMPLETE);
        }
    };

    let flow = scheduler.into_flow();
    print!("{}", flow.show_status());
    if reason == StopReason::AllOk && flow.all_ok() {
        Ok(0)
    } else {
        warn!("{reason}");
        Ok(EXIT_INCOMPLETE)
    }
}

/// Command line for the batch job: this program again, in scheduler mode,
/// pointed at the absolute workdir.
fn batch_argv(workdir: &Path) -> Result<Vec<String>> {
    let exe = std::env::current_exe().context("locating current executable")?;
    let workdir = std::path::absolute(workdir)?;

    let mut argv = vec![exe.to_string_lossy().into_owned()];
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-b" | "--batch" | "-t" | "--tempdir" | "-r" | "--remove" | "-l" | "--launch" => {}
            "-w" | "--workdir" => {
                args.next();
            }
            a if a.starts_with("--workdir=") => {}
            _ => argv.push(arg),
        }
    }
    argv.push("--scheduler".to_string());
    argv.push("--workdir".to_string());
    argv.push(workdir.to_string_lossy().into_owned());
    Ok(argv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_workdir_uses_flowfile_stem() {
        assert_eq!(default_workdir_for(Path::new("cfg/relax.toml")), PathBuf::from("flow_relax"));
    }

    #[test]
    fn explicit_workdir_wins() {
        let args = CliArgs {
            workdir: Some(PathBuf::from("here")),
            tempdir: true,
            ..CliArgs::default()
        };
        assert_eq!(resolve_workdir(&args, PathBuf::from("default")).unwrap(), PathBuf::from("here"));
    }

    #[test]
    fn remove_refuses_a_locked_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = dir.path().join("flow");
        let held = FlowLock::acquire(&workdir).unwrap();

        let err = remove_workdir(&workdir).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<crate::errors::FlowError>(),
            Some(crate::errors::FlowError::FlowLocked(_))
        ));
        assert!(workdir.is_dir());

        drop(held);
        remove_workdir(&workdir).unwrap();
        assert!(!workdir.exists());
    }

    #[test]
    fn missing_flowfile_is_a_config_error() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt.block_on(run(CliArgs::default()));
        assert_eq!(report_exit(result), EXIT_CONFIG);
    }
}
