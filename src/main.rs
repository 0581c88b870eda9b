use std::fs::File;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::{Args as ClapArgs, Parser, Subcommand};
use color_eyre::eyre::{eyre, WrapErr};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer};

use update_panel::bridge::ProcessBackend;
use update_panel::panel::render::render;
use update_panel::release::{ReleaseBackend, ReleaseConfig};
use update_panel::{host, UpdateBackend, UpdatePanel};

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Check for and install application updates")]
struct Args {
    #[command(subcommand)]
    mode: Option<Mode>,

    #[command(flatten)]
    release: ReleaseArgs,

    /// Run the update backend as a child process speaking the bridge protocol on its stdin/stdout
    #[arg(long, value_name = "PROGRAM", conflicts_with = "manifest_url")]
    backend: Option<String>,

    /// Argument passed to the backend program, can be repeated
    #[arg(
        long = "backend-arg",
        value_name = "ARG",
        requires = "backend",
        allow_hyphen_values = true
    )]
    backend_args: Vec<String>,

    /// How verbose the output should be, can be set up to 3 times. Has no effect if RUST_LOG is set
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to output a JSON log to
    #[arg(short, long, global = true)]
    log_path: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
enum Mode {
    /// Serve the release backend over stdin/stdout instead of showing the panel
    Serve,
}

#[derive(ClapArgs, Debug, Clone)]
struct ReleaseArgs {
    /// URL of the release manifest to check against
    #[arg(long, global = true)]
    manifest_url: Option<String>,

    /// Where a downloaded update is installed
    #[arg(long, global = true, default_value = "pending-update.bin")]
    install_path: PathBuf,

    /// Version to report and compare against, defaults to this build's version
    #[arg(long, global = true)]
    current_version: Option<String>,

    /// Environment to report, derived from the build and APP_ENV when unset
    #[arg(long, global = true)]
    environment: Option<String>,
}

impl ReleaseArgs {
    fn config(&self) -> color_eyre::Result<ReleaseConfig> {
        let manifest_url = self
            .manifest_url
            .clone()
            .ok_or_else(|| eyre!("--manifest-url is required unless --backend is given"))?;

        let mut config = ReleaseConfig::new(manifest_url, self.install_path.clone());
        if let Some(version) = &self.current_version {
            config.current_version = version.clone();
        }
        config.environment = self.environment.clone();
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UserCommand {
    Check,
    Install,
    Dismiss,
    Quit,
}

impl UserCommand {
    fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "c" | "check" => Some(Self::Check),
            "i" | "install" => Some(Self::Install),
            "d" | "dismiss" => Some(Self::Dismiss),
            "q" | "quit" | "exit" => Some(Self::Quit),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    tracing_init(&args)?;

    debug!(?args);

    match args.mode {
        Some(Mode::Serve) => {
            let backend = Arc::new(ReleaseBackend::new(args.release.config()?));
            host::serve(backend, tokio::io::stdin(), tokio::io::stdout())
                .await
                .wrap_err("update backend host failed")?;
        }
        None => {
            if let Some(program) = &args.backend {
                let backend = ProcessBackend::spawn(program, &args.backend_args)
                    .wrap_err_with(|| format!("failed to start backend {program}"))?;
                run_terminal(Arc::new(backend), spawn_stdin_reader()?, ctrlc_channel()?).await?;
            } else {
                let backend = ReleaseBackend::new(args.release.config()?);
                run_terminal(Arc::new(backend), spawn_stdin_reader()?, ctrlc_channel()?).await?;
            }
        }
    }

    Ok(())
}

/// Drive the panel from `input` lines until quit, end of input or a message on `quit`.
async fn run_terminal<B: UpdateBackend>(
    backend: Arc<B>,
    mut input: mpsc::UnboundedReceiver<String>,
    mut quit: mpsc::UnboundedReceiver<()>,
) -> color_eyre::Result<()> {
    let mut panel = UpdatePanel::mount(backend);

    println!("commands: (c)heck, (i)nstall, (d)ismiss, (q)uit");
    print!("{}", render(&panel.view()));

    loop {
        tokio::select! {
            Some(msg) = panel.next_message() => panel.process(msg),
            line = input.recv() => {
                let Some(line) = line else {
                    break;
                };
                match UserCommand::parse(&line) {
                    Some(UserCommand::Check) => panel.check_for_updates(),
                    Some(UserCommand::Install) => panel.download_and_install(),
                    Some(UserCommand::Dismiss) => panel.dismiss_notification(),
                    Some(UserCommand::Quit) => break,
                    None => {
                        if !line.trim().is_empty() {
                            println!("unknown command {:?}, expected c, i, d or q", line.trim());
                        }
                        continue;
                    }
                }
            }
            _ = quit.recv() => {
                info!("interrupted");
                break;
            }
        }

        println!();
        print!("{}", render(&panel.view()));
    }

    panel.unmount().await;
    Ok(())
}

/// Read stdin on a plain thread: a blocking read cannot be cancelled, and a
/// runtime blocking thread would hold up shutdown until the next line arrives.
fn spawn_stdin_reader() -> color_eyre::Result<mpsc::UnboundedReceiver<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new().name("stdin".to_string()).spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(%e, "failed to read stdin");
                    break;
                }
            }
        }
    })?;
    Ok(rx)
}

fn ctrlc_channel() -> color_eyre::Result<mpsc::UnboundedReceiver<()>> {
    let (tx, rx) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;
    Ok(rx)
}

/// Logs go to stderr: stdout carries the rendered panel, or bridge frames in serve mode.
fn tracing_init(args: &Args) -> color_eyre::Result<()> {
    tracing_log::LogTracer::init()?;

    let env_filter = EnvFilter::builder()
        .with_default_directive(
            match args.verbose {
                0 => "update_panel=info",
                1 => "info",
                2 => "debug",
                _ => "trace",
            }
            .parse()?,
        )
        .from_env_lossy();

    let stderr_log = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    let file_log = match &args.log_path {
        Some(log_path) => {
            let log_file = File::create(log_path)
                .wrap_err_with(|| format!("failed to create {}", log_path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(Mutex::new(log_file))
                    .with_filter(tracing::level_filters::LevelFilter::TRACE),
            )
        }
        None => None,
    };

    let subscriber = tracing_subscriber::registry().with(stderr_log).with(file_log);
    tracing::subscriber::set_global_default(subscriber).wrap_err("unable to set up logging")?;
    Ok(())
}
