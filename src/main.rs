use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::Context;
use clap::Parser;
use dicom_visualizer::{
    app,
    cli::{Cli, Commands},
    config::{DEFAULT_ISOVALUE, RenderSettings},
    enums::Processor,
    gpu_raycaster::GpuContext,
    session::{Command, Session},
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    match cli.command {
        Commands::Render { folder, options } => {
            let mut settings = options.settings().context("invalid settings")?;
            settings.isovalue.get_or_insert(DEFAULT_ISOVALUE);
            let mut session = open_session(settings).await?;
            session
                .select_folder(&folder)
                .with_context(|| format!("cannot use {}", folder.display()))?;
            session.visualize()?;
            write_viewport(&session, &options.output).await?;
        }
        Commands::Gui { folder, options } => {
            let mut session = open_session(options.settings().context("invalid settings")?).await?;
            if let Some(folder) = folder {
                session.select_folder(folder)?;
            }
            app::run(session).map_err(|err| anyhow::anyhow!("window failed: {err}"))?;
        }
        Commands::Interactive { folder, options } => {
            let mut session = open_session(options.settings().context("invalid settings")?).await?;
            if let Some(folder) = folder {
                session.select_folder(folder)?;
            }
            interactive(&mut session, &options.output).await?;
        }
    }
    Ok(())
}

async fn open_session(settings: RenderSettings) -> anyhow::Result<Session> {
    let wants_gpu = settings.processor == Processor::GPU;
    let mut session = Session::new(settings);

    if wants_gpu {
        match GpuContext::request().await {
            Ok(gpu) => session.set_gpu(Some(gpu)),
            Err(err) => warn!(%err, "GPU unavailable, volumes are composited on the CPU"),
        }
    }
    Ok(session)
}

async fn write_viewport(session: &Session, output: &Path) -> anyhow::Result<()> {
    session
        .save_snapshot(output)
        .await
        .with_context(|| format!("cannot write viewport {}", output.display()))
}

async fn interactive(session: &mut Session, viewport: &Path) -> anyhow::Result<()> {
    info!(viewport = %viewport.display(), "type `help` for commands");
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }

        let command: Command = match line.parse() {
            Ok(command) => command,
            Err(err) => {
                writeln!(stdout, "error: {err}")?;
                continue;
            }
        };

        match session.execute(command).await {
            Ok(outcome) => {
                if let Some(message) = outcome.message {
                    writeln!(stdout, "{message}")?;
                }
                if outcome.redraw {
                    if let Err(err) = write_viewport(session, viewport).await {
                        writeln!(stdout, "error: {err:#}")?;
                    }
                }
                if outcome.quit {
                    break;
                }
            }
            Err(err) => writeln!(stdout, "error: {err}")?,
        }
        stdout.flush()?;
    }
    Ok(())
}
