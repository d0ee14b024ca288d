mod launch;

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::info;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio::task::LocalSet;
use virtual_thing::{LocalThingFactory, ModelStateListener, VirtualThing, VirtualThingConfig};

#[derive(Parser)]
#[command(name = "vt")]
#[command(about = "Run simulated Web of Things devices from Virtual Thing Descriptions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Produce, expose and run virtual things
    Run {
        /// Descriptions or launch files
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Configuration file (.toml or .json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<f64>,
    },

    /// Build a description and resolve every pointer without running it
    Check {
        path: PathBuf,
    },

    /// Print the plain Thing Description
    Td {
        path: PathBuf,
    },
}

/// Forwards the first failure of any model to the runner.
struct FailureSignal {
    title: String,
    sender: UnboundedSender<String>,
}

impl ModelStateListener for FailureSignal {
    fn on_model_failed(&self, reason: &str) {
        let _ = self.sender.send(format!("{}: {reason}", self.title));
    }

    fn on_model_start_issued(&self) {}

    fn on_model_stop_issued(&self) {}
}

fn single(path: &Path) -> Result<VirtualThing> {
    let mut launches = launch::load(path)?;
    if launches.len() != 1 {
        bail!("{} holds {} descriptions, expected one", path.display(), launches.len());
    }
    let launch = launches.remove(0);
    VirtualThing::new(launch.vtd, None).with_context(|| format!("{}", launch.source.display()))
}

async fn run(paths: Vec<PathBuf>, config: Option<PathBuf>, duration: Option<f64>) -> Result<()> {
    let config = config.as_deref().map(VirtualThingConfig::load).transpose()?;
    let (sender, mut failures) = unbounded_channel();
    let mut things = Vec::new();
    for path in &paths {
        for launch in launch::load(path)? {
            let thing = VirtualThing::new(launch.vtd, config.as_ref())
                .with_context(|| format!("{}", launch.source.display()))?;
            let title = thing.td()["title"].as_str().unwrap_or_default().to_owned();
            thing.model().add_listener(Rc::new(FailureSignal {
                title: title.clone(),
                sender: sender.clone(),
            }));
            thing
                .produce(&LocalThingFactory)
                .await
                .with_context(|| format!("Starting \"{title}\" failed"))?;
            thing.expose().await?;
            info!("Exposed \"{title}\"");
            things.push(thing);
        }
    }

    let deadline = async {
        match duration {
            Some(seconds) => tokio::time::sleep(Duration::from_secs_f64(seconds.max(0.0))).await,
            None => std::future::pending().await,
        }
    };
    let outcome = tokio::select! {
        Some(reason) = failures.recv() => Err(anyhow::anyhow!("{reason}")),
        () = deadline => Ok(()),
        signal = tokio::signal::ctrl_c() => signal.context("Cannot listen for ctrl-c"),
    };
    for thing in &things {
        thing.model().stop().await;
    }
    // Let the detached teardown tasks finish.
    tokio::task::yield_now().await;
    outcome
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            paths,
            config,
            duration,
        } => {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
            LocalSet::new().block_on(&runtime, run(paths, config, duration))?;
        }

        Commands::Check { path } => {
            let thing = single(&path)?;
            thing.model().init_pointers()?;
            println!("{}: ok", path.display());
        }

        Commands::Td { path } => {
            let thing = single(&path)?;
            println!("{}", serde_json::to_string_pretty(thing.td())?);
        }
    }

    Ok(())
}
