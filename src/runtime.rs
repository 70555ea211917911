//! Single-threaded scheduler for `VisionClient`.
//!
//! The loop alternates between `client.turn(now)` and sleeping until the client's
//! next deadline, never longer than the poll interval so inbound socket messages
//! are picked up promptly. Other threads (stdin reader, Ctrl-C handler) talk to
//! the loop through a `LoopHandle`; their commands are applied between turns.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::client::VisionClient;
use crate::frame::FrameSize;
use crate::mode::Mode;

/// Control requests accepted between turns.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Start,
    Stop,
    SetMode(Mode),
    SetConfidence(f32),
    Resize(FrameSize),
    Status,
    Shutdown,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    /// Parse one control line: `start`, `stop`, `status`, `quit`,
    /// `mode <detect|segment|classify>`, `conf <0..1>`, `size <W>x<H>`.
    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let verb = words
            .next()
            .ok_or_else(|| anyhow!("empty command"))?
            .to_ascii_lowercase();
        let arg = words.next();
        let command = match (verb.as_str(), arg) {
            ("start", None) => Command::Start,
            ("stop", None) => Command::Stop,
            ("status", None) => Command::Status,
            ("quit" | "exit", None) => Command::Shutdown,
            ("mode", Some(mode)) => Command::SetMode(mode.parse()?),
            ("conf" | "confidence", Some(value)) => Command::SetConfidence(
                value
                    .parse()
                    .map_err(|_| anyhow!("confidence must be a number, got '{}'", value))?,
            ),
            ("size", Some(value)) => Command::Resize(parse_size(value)?),
            _ => return Err(anyhow!("unrecognised command '{}'", line.trim())),
        };
        if words.next().is_some() {
            return Err(anyhow!("trailing input in '{}'", line.trim()));
        }
        Ok(command)
    }
}

fn parse_size(value: &str) -> Result<FrameSize> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("size must look like 640x480"))?;
    let size = FrameSize::new(
        w.parse().map_err(|_| anyhow!("bad width '{}'", w))?,
        h.parse().map_err(|_| anyhow!("bad height '{}'", h))?,
    );
    if size.is_empty() {
        return Err(anyhow!("size {} has a zero dimension", size));
    }
    Ok(size)
}

/// Cloneable handle for feeding commands to a running loop.
#[derive(Clone)]
pub struct LoopHandle {
    commands: Sender<Command>,
    shutdown: Arc<AtomicBool>,
}

impl LoopHandle {
    /// Returns false once the loop has exited.
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Ask the loop to tear the client down and return. Safe from a signal handler thread.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// Periodic status line.
pub struct StatsReporter {
    interval: Duration,
    last: Instant,
}

impl StatsReporter {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last: now,
        }
    }

    fn maybe_report(&mut self, client: &VisionClient, now: Instant) {
        if now.saturating_duration_since(self.last) < self.interval {
            return;
        }
        self.last = now;
        if client.is_active() {
            log_status(client);
        }
    }
}

pub fn log_status(client: &VisionClient) {
    let stats = client.stats();
    let gate = client.gate_stats();
    let counters = client.counters();
    log::info!(
        "status: {} | mode {} conf {:.2} | {} fps, {} ms, {} objects, avg {:.0}% | sent {} skipped {} expired {}",
        client.status(),
        client.mode(),
        client.confidence(),
        stats.fps,
        stats.last_inference_ms,
        stats.object_count,
        stats.avg_confidence * 100.0,
        counters.frames_sent,
        gate.skipped,
        counters.deadlines_expired
    );
}

pub struct EventLoop {
    client: VisionClient,
    commands: Receiver<Command>,
    handle: LoopHandle,
    poll_interval: Duration,
    reporter: Option<StatsReporter>,
}

impl EventLoop {
    pub fn new(client: VisionClient, poll_interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            client,
            commands: rx,
            handle: LoopHandle {
                commands: tx,
                shutdown: Arc::new(AtomicBool::new(false)),
            },
            poll_interval,
            reporter: None,
        }
    }

    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.reporter = Some(StatsReporter::new(interval, Instant::now()));
        self
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    pub fn client(&self) -> &VisionClient {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut VisionClient {
        &mut self.client
    }

    /// Apply one command. Returns false when the loop should exit.
    pub fn apply(&mut self, command: Command, now: Instant) -> bool {
        match command {
            Command::Start => {
                let status = self.client.start(now);
                log::info!("client: {}", status);
            }
            Command::Stop => self.client.stop(now),
            Command::SetMode(mode) => {
                self.client.set_mode(mode);
            }
            Command::SetConfidence(value) => match self.client.set_confidence(value) {
                Ok(applied) => log::info!("mode: confidence threshold {:.2}", applied),
                Err(e) => log::warn!("mode: {:#}", e),
            },
            Command::Resize(size) => self.client.resize(size),
            Command::Status => log_status(&self.client),
            Command::Shutdown => return false,
        }
        true
    }

    /// Run one turn and then wait for the next deadline or command.
    /// Returns false when the loop should exit.
    pub fn step(&mut self) -> bool {
        if self.handle.shutdown.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        self.client.turn(now);
        if let Some(reporter) = self.reporter.as_mut() {
            reporter.maybe_report(&self.client, now);
        }

        let wait = self
            .client
            .next_deadline()
            .map(|at| at.saturating_duration_since(Instant::now()))
            .unwrap_or(self.poll_interval)
            .min(self.poll_interval);

        match self.commands.recv_timeout(wait) {
            Ok(command) => {
                if !self.apply(command, Instant::now()) {
                    return false;
                }
                while let Ok(command) = self.commands.try_recv() {
                    if !self.apply(command, Instant::now()) {
                        return false;
                    }
                }
                true
            }
            // The loop owns a sender, so the queue never disconnects.
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }

    /// Drive the client until shutdown, then tear it down.
    pub fn run(mut self) -> VisionClient {
        while self.step() {}
        log::info!("runtime: shutting down");
        self.client.stop(Instant::now());
        self.client
    }
}
