use std::{path::PathBuf, process::ExitCode, sync::Arc};

use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};
use tokio::signal;
use trainer::{
    ConfigStore, ResumePolicy, RunConfiguration, Settings, TrackerParams, TrainErr,
    distribution::LaunchParams, launch,
};

/// Trains a visual object tracker and resolves its inference parameters.
#[derive(Parser, Debug)]
#[command(name = "tracker-train", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// The training script, checkpoints are named after it
    #[arg(long)]
    script: String,

    /// The experiment configuration name
    #[arg(long)]
    config: String,

    /// The YAML file overriding the default configuration
    #[arg(long)]
    cfg_file: PathBuf,

    /// The root directory for checkpoints and logs
    #[arg(long, default_value = ".")]
    save_dir: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train, resuming from the latest checkpoint unless told otherwise
    Train {
        #[command(flatten)]
        run: RunArgs,

        /// The amount of workers, overrides WORLD_SIZE and dist.world_size
        #[arg(long)]
        nproc: Option<usize>,

        /// Start from scratch even if checkpoints exist
        #[arg(long)]
        no_resume: bool,

        /// Abort on the first failing step instead of skipping it
        #[arg(long)]
        no_fail_safe: bool,
    },

    /// Print the inference parameters of a run as JSON
    Params {
        #[command(flatten)]
        run: RunArgs,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ TrainErr::Interrupted) => {
            warn!("{e}");
            ExitCode::from(e.exit_code())
        }
        Err(e) => {
            error!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(command: Command) -> trainer::Result<()> {
    match command {
        Command::Train {
            run,
            nproc,
            no_resume,
            no_fail_safe,
        } => {
            let config = Arc::new(load_config(&run)?);
            let settings = Settings::new(run.script, run.config, run.save_dir);

            let mut params = LaunchParams::from_env()?;
            if nproc.is_some() {
                params.world_size = nproc;
            }

            let policy = ResumePolicy {
                load_latest: !no_resume,
                fail_safe: !no_fail_safe,
            };

            tokio::select! {
                result = launch(config, settings, params, policy) => {
                    for worker in result? {
                        info!(
                            rank = worker.identity.rank(),
                            steps = worker.summary.global_step,
                            syncs = worker.summary.sync_count;
                            "{}",
                            worker.summary.status
                        );
                    }
                }
                _ = signal::ctrl_c() => return Err(TrainErr::Interrupted),
            }
        }
        Command::Params { run } => {
            let config = load_config(&run)?;
            let settings = Settings::new(run.script, run.config, run.save_dir);
            let params = TrackerParams::resolve(&config, &settings);

            let json = serde_json::to_string_pretty(&params)
                .map_err(|e| TrainErr::InvalidConfig(e.to_string()))?;
            println!("{json}");
        }
    }

    Ok(())
}

fn load_config(run: &RunArgs) -> trainer::Result<RunConfiguration> {
    let config = ConfigStore::apply_overrides(&ConfigStore::defaults(), &run.cfg_file)?;
    config.validate()?;

    info!(
        script = run.script.as_str(),
        config = run.config.as_str();
        "loaded configuration {}",
        run.cfg_file.display()
    );

    Ok(config)
}
