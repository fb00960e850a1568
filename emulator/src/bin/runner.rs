// Cosmos device app functional test harness
//
// Copyright (C) 2024 Alekos Filini
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use env_logger::Env;

use clap::{Args, Parser};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use emulator::scenarios::{Context, Scenario};
use emulator::utils::model::{
    init_models, HardwareVariant, ModelKind, NavigationConfig, SessionConfig,
};
use emulator::utils::report::HtmlReport;
use emulator::utils::snapshot::SnapshotStore;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    #[clap(flatten)]
    global_opts: GlobalOpts,
}

#[derive(Debug, Args)]
struct GlobalOpts {
    /// Path of the device emulator binary
    #[clap(long, short = 'e', env = "ZEMU_EMULATOR", default_value = "device-emulator")]
    emulator: PathBuf,

    /// Directory containing the app ELF of every model
    #[clap(long, short = 'a', env = "ZEMU_APP_DIR", default_value = "../app/build")]
    app_dir: PathBuf,

    /// Root of the reference snapshots
    #[clap(long, short = 's', env = "ZEMU_SNAPSHOTS_DIR", default_value = "snapshots")]
    snapshots: PathBuf,

    /// Record new reference snapshots instead of comparing against them
    #[clap(long, short = 'u', action = clap::ArgAction::SetTrue, default_value_t = false)]
    update_snapshots: bool,

    /// Number of pixels allowed to differ before a screen is a mismatch
    #[clap(long, default_value_t = 0)]
    tolerance: usize,

    /// Models to run on. Defaults to every model
    #[clap(long, short = 'm', value_enum)]
    model: Vec<ModelKind>,

    /// Scenarios to run. Defaults to every scenario
    #[clap(long, short = 't', value_enum)]
    scenario: Vec<Scenario>,

    /// Timeout of a single scenario, in seconds
    #[clap(long, default_value_t = 120)]
    timeout: u64,

    /// Number of emulators running at the same time. Defaults to one per
    /// selected model
    #[clap(long, short = 'j')]
    jobs: Option<usize>,

    /// Which runs produce an HTML report
    #[clap(long, value_enum, default_value_t = HtmlReport::OnlyFailing)]
    report: HtmlReport,

    /// Where reports are written. Defaults to `REPORT_TMP_DIR` or a temp directory
    #[clap(long)]
    report_dir: Option<PathBuf>,

    /// Show the emulator window instead of running headless
    #[clap(long, action = clap::ArgAction::SetTrue, default_value_t = false)]
    display: bool,

    /// Forward the emulator stderr to the log
    #[clap(long, action = clap::ArgAction::SetTrue, default_value_t = false)]
    join_logs: bool,
}

type Outcome = (
    &'static HardwareVariant,
    Scenario,
    Duration,
    Result<(), String>,
);

/// Emulators allowed to run at once: one per model unless told otherwise
fn permits(jobs: Option<usize>, models: usize) -> usize {
    jobs.unwrap_or(models).max(1)
}

/// Wait for every scenario and log its result. Returns the number of
/// failures, tasks that died without reporting included.
async fn summarize(handles: Vec<JoinHandle<Result<Outcome, emulator::Error>>>) -> usize {
    let mut failed = 0;
    for handle in handles {
        let (model, scenario, elapsed, result) = match handle.await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                failed += 1;
                log::error!("FAIL: {}", e);
                continue;
            }
            Err(e) => {
                failed += 1;
                log::error!("FAIL: scenario task died: {}", e);
                continue;
            }
        };
        match result {
            Ok(()) => log::info!("PASS {} on {} ({:.1}s)", scenario, model, elapsed.as_secs_f32()),
            Err(e) => {
                failed += 1;
                log::error!("FAIL {} on {}: {}", scenario, model, e);
            }
        }
    }

    failed
}

#[tokio::main]
async fn main() -> Result<(), emulator::Error> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = CliArgs::parse().global_opts;

    let registry = init_models(&args.app_dir);
    let models = if args.model.is_empty() {
        ModelKind::ALL.to_vec()
    } else {
        args.model.clone()
    };
    let scenarios = if args.scenario.is_empty() {
        Scenario::ALL.to_vec()
    } else {
        args.scenario.clone()
    };

    let ctx = Arc::new(Context {
        session: SessionConfig {
            emulator: args.emulator.clone(),
            headless: !args.display,
            join_logs: args.join_logs,
            ..Default::default()
        },
        store: SnapshotStore::new(&args.snapshots, args.update_snapshots, args.tolerance),
        navigation: NavigationConfig::default(),
        report: args.report,
        report_dir: args.report_dir.clone(),
    });
    log::debug!("Context: {:?}", ctx);

    let jobs = Arc::new(Semaphore::new(permits(args.jobs, models.len())));
    let timeout = Duration::from_secs(args.timeout);
    let mut handles = vec![];

    for kind in models {
        let model = match registry.iter().find(|m| m.kind == kind) {
            Some(model) => model,
            None => continue,
        };
        if let Err(e) = emulator::utils::check_elf(model) {
            log::warn!("Skipping {}: {}", model, e);
            continue;
        }

        for scenario in &scenarios {
            let scenario = *scenario;
            let ctx = Arc::clone(&ctx);
            let jobs = Arc::clone(&jobs);

            handles.push(tokio::spawn(async move {
                let _permit = jobs.acquire_owned().await?;

                let start = Instant::now();
                let result = match tokio::time::timeout(timeout, scenario.run(model, &ctx)).await {
                    Ok(result) => result.map_err(|e| e.to_string()),
                    Err(_) => Err(format!("timed out after {:?}", timeout)),
                };

                Ok::<_, emulator::Error>((model, scenario, start.elapsed(), result))
            }));
        }
    }

    let total = handles.len();
    let failed = summarize(handles).await;

    log::info!("{} passed, {} failed", total - failed, failed);
    if failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use emulator::utils::model::get_model;

    #[test]
    fn test_permits() {
        assert_eq!(permits(None, 5), 5);
        assert_eq!(permits(Some(2), 5), 2);
        assert_eq!(permits(Some(0), 5), 1);
        assert_eq!(permits(None, 0), 1);
    }

    #[tokio::test]
    async fn test_summary_counts_dead_tasks() {
        let model = get_model(ModelKind::Nanos);
        let outcome = |result: Result<(), String>| -> Result<Outcome, emulator::Error> {
            Ok((model, Scenario::GetVersion, Duration::from_millis(1), result))
        };

        let died: JoinHandle<Result<Outcome, emulator::Error>> =
            tokio::spawn(async { panic!("scenario task died") });
        let handles = vec![
            tokio::spawn(async move { outcome(Ok(())) }),
            tokio::spawn(async move { outcome(Err("status mismatch".into())) }),
            tokio::spawn(async { Err::<Outcome, emulator::Error>("no permit".into()) }),
            died,
            tokio::spawn(async move { outcome(Ok(())) }),
        ];

        assert_eq!(summarize(handles).await, 3);
    }
}
