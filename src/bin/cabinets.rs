//! The application shell (§4.8): CLI argument parsing, backend selection, logging
//! initialization, and exit-code translation. No algorithmic logic lives here — every decision
//! point is a direct translation of a CLI/env input into a `RunConfig` field or backend choice.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use cabinets::collective::single::SingleBackend;
use cabinets::collective::thread::ThreadTeam;
use cabinets::collective::Collective;
use cabinets::error::Result;
use cabinets::{controller, input, output, Run};

/// Name of the environment variable that requests the in-process thread backend with an explicit
/// worker count, the way a test harness would. Absent or `1`: run single-worker in this thread.
const WORKERS_ENV: &str = "CABINETS_WORKERS";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "run failed");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let input_path = args
        .next()
        .map(PathBuf::from)
        .ok_or_else(|| cabinets::Error::ConfigInvalid("usage: cabinets <input-path> [cabinet-count]".into()))?;
    let cabinet_override = match args.next() {
        Some(raw) => Some(
            raw.parse::<usize>()
                .map_err(|_| cabinets::Error::ConfigInvalid(format!("cabinet count override {raw:?} is not an integer")))?,
        ),
        None => None,
    };

    let num_workers = std::env::var(WORKERS_ENV)
        .ok()
        .map(|raw| raw.parse::<usize>().unwrap_or(1))
        .unwrap_or(1);

    if num_workers <= 1 {
        run_single(&input_path, cabinet_override)
    } else {
        run_threaded(&input_path, cabinet_override, num_workers)
    }
}

/// Runs the whole pipeline — distribute, converge, gather — for one worker against one
/// collective backend. Shared by every backend: the only thing that differs between them is how
/// `collective` was built.
fn run_worker<C: Collective>(collective: C, input_path: &Path, cabinet_override: Option<usize>) -> Result<()> {
    let (config, shard) = input::distribute(&collective, input_path, cabinet_override)?;
    let mut run = Run::new(config, shard, collective);
    let iterations = controller::converge(&mut run)?;
    if run.is_coordinator() {
        tracing::info!(iterations, "converged");
    }
    output::gather_and_write(&run.collective, &run.shard, run.config.num_documents, input_path)
}

fn run_single(input_path: &Path, cabinet_override: Option<usize>) -> Result<()> {
    run_worker(SingleBackend, input_path, cabinet_override)
}

/// Spawns `num_workers` OS threads sharing one `ThreadTeam`, each running the full pipeline
/// against its own rank. The team's buffers must be sized before any thread starts, so the shell
/// peeks the header on its own thread first (§4.8's pre-sizing note in [`input::peek_header`]).
fn run_threaded(input_path: &Path, cabinet_override: Option<usize>, num_workers: usize) -> Result<()> {
    let (c_default, _d, s) = input::peek_header(input_path)?;
    let num_cabinets = cabinet_override.unwrap_or(c_default);

    let team = ThreadTeam::new(num_workers, num_cabinets * s, num_cabinets, 3);
    let results: Vec<Result<()>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..num_workers)
            .map(|rank| {
                let backend = team.handle(rank);
                scope.spawn(move || run_worker(backend, input_path, cabinet_override))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap_or_else(|_| {
            Err(cabinets::Error::CollectiveFailed { operation: "thread join", reason: "worker thread panicked".into() })
        })).collect()
    });

    results.into_iter().find(Result::is_err).unwrap_or(Ok(()))
}
