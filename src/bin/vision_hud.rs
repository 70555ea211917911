//! vision_hud - live detection overlay client
//!
//! This binary:
//! 1. Resolves configuration (defaults, `VISION_CONFIG` file, env, flags)
//! 2. Starts the camera and opens an authenticated socket to the inference service
//! 3. Streams frames single-flight and renders the overlay until Ctrl-C or `quit`
//!
//! Control lines on stdin: `start`, `stop`, `status`, `quit`,
//! `mode <detect|segment|classify>`, `conf <0..1>`, `size <W>x<H>`.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use vision_hud::channel::{self, LoopbackServer, StaticToken};
use vision_hud::{
    CameraSource, ClientConfig, ClientStatus, Command, EventLoop, FrameSize, Mode,
    ServerEndpoint, VisionChannel, VisionClient,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Stream camera frames to a vision service and draw the detections as a HUD"
)]
struct Args {
    /// JSON or TOML config file. Overrides VISION_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,

    /// HTTP base URL of the inference service.
    #[arg(long)]
    server_url: Option<String>,

    /// Camera device path or stub://name.
    #[arg(long)]
    camera: Option<String>,

    /// Inference mode: detect, segment or classify.
    #[arg(long)]
    mode: Option<Mode>,

    /// Advisory confidence threshold in [0, 1].
    #[arg(long)]
    confidence: Option<f32>,

    /// Font used for HUD labels.
    #[arg(long)]
    font: Option<PathBuf>,

    /// Overlay container width.
    #[arg(long)]
    width: Option<u32>,

    /// Overlay container height.
    #[arg(long)]
    height: Option<u32>,

    /// Seconds between status log lines (0 disables).
    #[arg(long, env = "VISION_STATS_INTERVAL_SECS", default_value = "5")]
    stats_interval_secs: u64,

    /// Answer frames in-process with synthetic results instead of contacting a server.
    #[arg(long)]
    loopback: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ClientConfig::load_from(path)?,
        None => ClientConfig::load()?,
    };
    apply_args(&mut config, &args);
    config.validate()?;

    let now = Instant::now();
    let client = if args.loopback {
        loopback_client(&config, now)?
    } else {
        VisionClient::from_config(&config, now)?
    };

    let mut event_loop = EventLoop::new(client, config.poll_interval);
    if args.stats_interval_secs > 0 {
        event_loop = event_loop.with_stats_interval(Duration::from_secs(args.stats_interval_secs));
    }

    let handle = event_loop.handle();
    let signal_handle = handle.clone();
    ctrlc::set_handler(move || signal_handle.shutdown()).context("install Ctrl-C handler")?;

    let stdin_handle = handle.clone();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<Command>() {
                Ok(command) => {
                    if !stdin_handle.send(command) {
                        break;
                    }
                }
                Err(e) => log::warn!("stdin: {:#}", e),
            }
        }
    });

    let status = event_loop.client_mut().start(Instant::now());
    log::info!("vision_hud: {} (server {})", status, config.server.url);
    if let ClientStatus::CameraUnavailable(_) = status {
        log::warn!("vision_hud: type 'start' to retry the camera");
    }
    log::info!("vision_hud running. Ctrl-C or 'quit' to exit");

    let client = event_loop.run();
    let counters = client.counters();
    log::info!(
        "vision_hud: sent {} frames, accepted {} results, {} deadline expiries",
        counters.frames_sent,
        counters.results_accepted,
        counters.deadlines_expired
    );
    Ok(())
}

fn apply_args(config: &mut ClientConfig, args: &Args) {
    if let Some(url) = &args.server_url {
        config.server.url = url.clone();
    }
    if let Some(camera) = &args.camera {
        config.camera.device = camera.clone();
    }
    if let Some(mode) = args.mode {
        config.capture.mode = mode;
    }
    if let Some(confidence) = args.confidence {
        config.capture.confidence = confidence;
    }
    if let Some(font) = &args.font {
        config.hud.font_path = Some(font.clone());
    }
    config.hud.size = FrameSize::new(
        args.width.unwrap_or(config.hud.size.width),
        args.height.unwrap_or(config.hud.size.height),
    );
}

fn loopback_client(config: &ClientConfig, now: Instant) -> Result<VisionClient> {
    let (connector, server) = channel::loopback();
    let channel = VisionChannel::new(
        ServerEndpoint::parse(&config.server.url)?,
        Box::new(StaticToken::new("loopback")),
        Box::new(connector),
    );
    let camera = CameraSource::new(config.camera.clone()).context("configure camera")?;
    std::thread::spawn(move || serve_loopback(server));
    log::info!("vision_hud: loopback mode, no server will be contacted");
    VisionClient::new(config, Box::new(camera), channel, now)
}

/// Answer each frame with one detection (or class list) drifting across the view.
fn serve_loopback(server: LoopbackServer) {
    let mut peers = Vec::new();
    let mut tick: u64 = 0;
    loop {
        while let Some(peer) = server.accept() {
            peer.send_text(r#"{"type":"vision.connected"}"#);
            peers.push(peer);
        }
        for peer in &peers {
            for message in peer.drain() {
                let Ok(value) = serde_json::from_str::<serde_json::Value>(&message) else {
                    continue;
                };
                if value["type"] != "frame" {
                    continue;
                }
                tick += 1;
                let mode = value["mode"].as_str().unwrap_or("detect");
                peer.send_text(&synthetic_result(mode, tick).to_string());
            }
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn synthetic_result(mode: &str, tick: u64) -> serde_json::Value {
    let x = (tick % 50) as f64 / 100.0;
    if mode == "classify" {
        return serde_json::json!({
            "type": "vision.result",
            "mode": mode,
            "inference_ms": 12,
            "classifications": [
                {"class": "desk", "confidence": 0.62},
                {"class": "monitor", "confidence": 0.21},
            ],
        });
    }
    serde_json::json!({
        "type": "vision.result",
        "mode": mode,
        "inference_ms": 18,
        "detections": [{
            "class": "person",
            "confidence": 0.87,
            "bbox": [x, 0.2, x + 0.3, 0.8],
            "polygon": [[x, 0.2], [x + 0.3, 0.2], [x + 0.15, 0.8]],
        }],
    })
}
