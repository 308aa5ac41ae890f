use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use crabview::{CameraId, ConnectionManager, CrabViewConfig, InMemoryStatusCache};
use tokio_util::sync::CancellationToken;

fn main() -> anyhow::Result<()> {
    crabview::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: crabview-cli <watch|probe> <camera_id>... [--config <path>] [--json]");
        std::process::exit(1);
    }

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;

    let command = &args[1];
    match command.as_str() {
        "watch" => runtime.block_on(cmd_watch(&args)),
        "probe" => runtime.block_on(cmd_probe(&args)),
        _ => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }
}

struct Options {
    cameras: Vec<CameraId>,
    config_path: PathBuf,
    json: bool,
}

fn parse_options(args: &[String]) -> anyhow::Result<Options> {
    let mut cameras = Vec::new();
    let mut config_path = CrabViewConfig::default_path();
    let mut json = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                let path = args.get(i).ok_or_else(|| anyhow!("--config needs a path"))?;
                config_path = PathBuf::from(path);
            }
            "--json" => json = true,
            other => {
                let camera = other
                    .parse::<CameraId>()
                    .with_context(|| format!("invalid camera id: {}", other))?;
                cameras.push(camera);
            }
        }
        i += 1;
    }

    if cameras.is_empty() {
        bail!("at least one camera id is required");
    }

    Ok(Options {
        cameras,
        config_path,
        json,
    })
}

fn load_config(options: &Options) -> anyhow::Result<CrabViewConfig> {
    CrabViewConfig::load_layered(&options.config_path)
        .with_context(|| format!("failed to load {}", options.config_path.display()))
}

async fn cmd_watch(args: &[String]) -> anyhow::Result<()> {
    // watch <camera_id>... [--config <path>] [--json]
    let options = parse_options(args)?;
    let config = load_config(&options)?;

    let manager = ConnectionManager::with_defaults(&config);
    let cache = Arc::new(InMemoryStatusCache::new());
    manager.status().attach(cache.clone());

    let stop = CancellationToken::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || handler_stop.cancel()).context("failed to install Ctrl-C handler")?;

    let mut changes = cache.subscribe();
    let json = options.json;
    let printer = tokio::spawn(async move {
        while let Ok(change) = changes.recv().await {
            if json {
                match serde_json::to_string(&change.record) {
                    Ok(record) => println!("{{\"cameraId\":{},\"record\":{}}}", change.camera_id, record),
                    Err(e) => log::warn!("Failed to encode status change: {}", e),
                }
            } else {
                println!("camera {}: {}", change.camera_id, change.record.status);
            }
        }
    });

    for camera in options.cameras.iter().copied() {
        let manager = manager.clone();
        tokio::spawn(async move {
            match manager.try_get_stream(camera).await {
                Ok(stream) => log::info!(
                    "Camera {}: streaming {} video track(s)",
                    camera,
                    stream.video_tracks().len()
                ),
                Err(e) => log::error!("Camera {}: {}", camera, e),
            }
        });
    }

    stop.cancelled().await;
    println!("Releasing {} stream(s)", manager.active_cameras().await.len());
    manager.release_all_streams().await;
    printer.abort();

    Ok(())
}

async fn cmd_probe(args: &[String]) -> anyhow::Result<()> {
    // probe <camera_id> [--config <path>] [--json]
    let options = parse_options(args)?;
    let config = load_config(&options)?;
    let camera = options.cameras[0];

    let manager = ConnectionManager::with_defaults(&config);
    let result = manager.try_get_stream(camera).await;
    let stats = manager.get_connection_stats(camera).await;
    manager.release_all_streams().await;

    let stream = result.with_context(|| format!("camera {} did not connect", camera))?;

    if options.json {
        println!("{}", serde_json::to_string(&stats)?);
    } else {
        println!("camera {}: stream {}", camera, stream.id());
        println!("  video tracks: {}", stream.video_tracks().len());
        match stats {
            Some(stats) => {
                println!("  state: {:?}", stats.state);
                println!("  packets received: {}", stats.packets_received);
                println!("  bytes received: {}", stats.bytes_received);
                if let Some(rtt) = stats.round_trip_time_ms {
                    println!("  round trip: {:.1} ms", rtt);
                }
            }
            None => println!("  no statistics available"),
        }
    }

    Ok(())
}
