use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use ffmpeg_pipe::{ContainerOptions, PipelineReport};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{Args, TransportConfig},
    summary::RunSummary,
    transport::{Location, Transports},
};

mod config;
mod summary;
mod transport;

fn init_logging(level: log::LevelFilter) {
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .filter_module("ffmpeg_pipe", level)
        .init();
}

/// Cancel on Ctrl-C, or once `timeout` elapses.
fn watch_cancel(cancel: CancellationToken, timeout: Option<Duration>) {
    tokio::spawn(async move {
        let deadline = async {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = cancel.cancelled() => {},
            _ = tokio::signal::ctrl_c() => {
                log::warn!("interrupted, cancelling");
                cancel.cancel();
            },
            _ = deadline => {
                log::warn!("timeout reached, cancelling");
                cancel.cancel();
            },
        }
    });
}

async fn run(
    transports: &Transports,
    input: &Location,
    output: &Location,
    options: ContainerOptions,
    cancel: CancellationToken,
) -> anyhow::Result<PipelineReport> {
    let mut source = transports
        .open_read(input)
        .await
        .with_context(|| format!("open source {}", input))?;
    let destination = match transports.open_write(output).await {
        Ok(destination) => destination,
        Err(e) => {
            if let Err(close) = source.close() {
                log::warn!("source close failed: {}", close);
            }
            return Err(e.context(format!("open destination {}", output)));
        }
    };

    let report = tokio::task::spawn_blocking(move || {
        ffmpeg_pipe::transcode(source, destination, &options, &cancel)
    })
    .await
    .context("transcode task")?
    .with_context(|| format!("transcode {} -> {}", input, output))?;
    Ok(report)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_level);
    ffmpeg_pipe::init()?;

    let transports = Transports::new(TransportConfig::from_env())?;
    let input = Location::parse(&args.input).context("--input")?;
    let output = Location::parse(&args.output).context("--output")?;

    let mut options = ContainerOptions::new(args.format.as_str());
    if let Some(movflags) = &args.movflags {
        options = options.with_movflags(movflags.as_str());
    }

    let cancel = CancellationToken::new();
    watch_cancel(cancel.clone(), args.timeout.map(Duration::from_secs));

    log::info!("{} -> {} ({})", input, output, args.format);
    let started = Instant::now();
    let result = run(&transports, &input, &output, options, cancel.clone()).await;
    cancel.cancel();

    if args.json {
        let summary = RunSummary::new(&input, &output, started.elapsed(), &result);
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    let report = result?;
    log::info!(
        "finished in {:.1}s: video {} frames, audio {} frames",
        started.elapsed().as_secs_f64(),
        report.video.frames,
        report.audio.frames
    );
    Ok(())
}
