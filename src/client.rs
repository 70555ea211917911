//! The vision client: camera, socket, gate, state and HUD under one owner.
//!
//! Everything runs on the thread that calls `turn(now)`. One turn, in order:
//!
//! 1. drain the socket and apply results
//! 2. expire an outstanding request that outlived its deadline
//! 3. let the supervisor reopen the channel if a retry is due
//! 4. run the capture tick if due
//! 5. run the render tick if due
//!
//! `stop()` is the only teardown path and is safe to call in any state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::capture::{CameraSource, FrameSource};
use crate::channel::{
    ChannelEvent, ChannelFault, ChannelState, ChannelStats, HttpTokenProvider, ServerEndpoint,
    VisionChannel, WsConnector,
};
use crate::config::ClientConfig;
use crate::encode::FrameEncoder;
use crate::frame::FrameSize;
use crate::gate::{BackpressureGate, GateStats, Permit};
use crate::hud::{HudRenderer, OverlayPlan, OverlaySurface};
use crate::mode::{Mode, ModeController};
use crate::protocol::{OutboundMessage, VisionResult};
use crate::state::{DetectionState, Snapshot};
use crate::stats::{Stats, StatsAggregator};
use crate::supervisor::{ConnectionSupervisor, SupervisorState};

/// What the client is doing, as shown to the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientStatus {
    Idle,
    /// The camera could not be started. Not retried until the next `start()`.
    CameraUnavailable(String),
    Connecting,
    Streaming,
    Reconnecting { attempt: u32 },
    /// Reconnect budget spent. `stop()` then `start()` to try again.
    ConnectionFailed { attempts: u32 },
}

impl std::fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientStatus::Idle => f.write_str("idle"),
            ClientStatus::CameraUnavailable(reason) => write!(f, "camera unavailable: {}", reason),
            ClientStatus::Connecting => f.write_str("connecting"),
            ClientStatus::Streaming => f.write_str("streaming"),
            ClientStatus::Reconnecting { attempt } => write!(f, "reconnecting (attempt {})", attempt),
            ClientStatus::ConnectionFailed { attempts } => {
                write!(f, "connection failed after {} attempt(s)", attempts)
            }
        }
    }
}

/// Client-level counters, complementing the gate and channel ones.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientCounters {
    pub frames_sent: u64,
    pub ticks_without_channel: u64,
    pub capture_failures: u64,
    pub results_accepted: u64,
    /// Results that arrived for a mode no longer selected.
    pub results_discarded: u64,
    pub deadlines_expired: u64,
    pub renders: u64,
}

/// Fixed-interval timer polled by the event loop.
#[derive(Debug)]
struct Cadence {
    interval: Duration,
    next_due: Option<Instant>,
}

impl Cadence {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    /// First tick fires immediately.
    fn arm(&mut self, now: Instant) {
        self.next_due = Some(now);
    }

    fn disarm(&mut self) {
        self.next_due = None;
    }

    fn is_armed(&self) -> bool {
        self.next_due.is_some()
    }

    /// True when a tick is due; schedules the next one. Missed ticks are dropped.
    fn poll(&mut self, now: Instant) -> bool {
        match self.next_due {
            Some(due) if now >= due => {
                let mut next = due + self.interval;
                if next <= now {
                    next = now + self.interval;
                }
                self.next_due = Some(next);
                true
            }
            _ => false,
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.next_due
    }
}

pub struct VisionClient {
    camera: Box<dyn FrameSource>,
    encoder: FrameEncoder,
    gate: BackpressureGate,
    permit: Option<Permit>,
    channel: VisionChannel,
    supervisor: ConnectionSupervisor,
    modes: ModeController,
    detections: DetectionState,
    stats: StatsAggregator,
    hud: HudRenderer,
    surface: OverlaySurface,
    container: FrameSize,
    last_plan: Option<OverlayPlan>,
    capture: Cadence,
    render: Cadence,
    active: bool,
    camera_error: Option<String>,
    counters: ClientCounters,
}

impl VisionClient {
    /// Assemble a client around an explicit camera and channel.
    pub fn new(
        config: &ClientConfig,
        camera: Box<dyn FrameSource>,
        channel: VisionChannel,
        now: Instant,
    ) -> Result<Self> {
        let encoder = FrameEncoder::new(config.capture.size, config.capture.jpeg_quality)?;
        let modes = ModeController::new(config.capture.mode, config.capture.confidence)?;
        let mut surface = OverlaySurface::new(config.hud.size);
        if let Some(path) = &config.hud.font_path {
            surface.load_font(path)?;
        }
        Ok(Self {
            camera,
            encoder,
            gate: BackpressureGate::new(config.capture.request_timeout),
            permit: None,
            channel,
            supervisor: ConnectionSupervisor::new(config.reconnect.clone()),
            detections: DetectionState::new(modes.mode()),
            modes,
            stats: StatsAggregator::new(now),
            hud: HudRenderer::new(config.hud.style.clone(), now),
            surface,
            container: config.hud.size,
            last_plan: None,
            capture: Cadence::new(config.capture.interval),
            render: Cadence::new(config.hud.render_interval),
            active: false,
            camera_error: None,
            counters: ClientCounters::default(),
        })
    }

    /// Client wired to the configured camera device and the live service.
    pub fn from_config(config: &ClientConfig, now: Instant) -> Result<Self> {
        let camera = CameraSource::new(config.camera.clone()).context("configure camera")?;
        let endpoint = ServerEndpoint::parse(&config.server.url)?;
        let channel = VisionChannel::new(
            endpoint,
            Box::new(HttpTokenProvider::new(config.server.token_timeout)),
            Box::new(WsConnector::new(config.server.connect_timeout)),
        );
        Self::new(config, Box::new(camera), channel, now)
    }

    /// Start the camera, arm both cadences and open the first session.
    ///
    /// A camera failure is reported as `CameraUnavailable` and leaves the client
    /// idle. Channel failures are handed to the supervisor.
    pub fn start(&mut self, now: Instant) -> ClientStatus {
        if self.active {
            return self.status();
        }
        self.camera_error = None;
        if let Err(e) = self.camera.start() {
            let reason = format!("{:#}", e);
            log::error!("client: camera {} unavailable: {}", self.camera.name(), reason);
            self.camera_error = Some(reason);
            return self.status();
        }

        self.active = true;
        self.permit = None;
        self.gate.reset();
        self.stats.reset(now);
        self.detections.clear(self.modes.mode());
        self.supervisor.activate();
        self.capture.arm(now);
        self.render.arm(now);
        log::info!(
            "client: started (camera {}, mode {}, confidence {:.2})",
            self.camera.name(),
            self.modes.mode(),
            self.modes.confidence()
        );

        self.supervise(now);
        self.status()
    }

    /// Tear everything down. Each step runs whether or not its part was active.
    pub fn stop(&mut self, now: Instant) {
        let was_active = self.active;
        self.active = false;
        self.capture.disarm();
        self.render.disarm();
        self.camera.stop();
        self.channel.close();
        self.permit = None;
        self.gate.reset();
        self.supervisor.deactivate();
        self.stats.reset(now);
        self.detections.clear(self.modes.mode());
        self.surface.clear();
        self.last_plan = None;
        self.camera_error = None;
        if was_active {
            log::info!("client: stopped");
        }
    }

    /// Run one cooperative turn. A no-op while stopped.
    pub fn turn(&mut self, now: Instant) {
        if !self.active {
            return;
        }
        self.drain_channel(now);
        self.enforce_deadline(now);
        self.supervise(now);
        if self.capture.poll(now) {
            self.capture_tick(now);
        }
        if self.render.poll(now) {
            self.render_tick(now);
        }
    }

    fn drain_channel(&mut self, now: Instant) {
        for event in self.channel.poll() {
            match event {
                ChannelEvent::Result(result) => {
                    self.supervisor.on_confirmed();
                    self.complete_request(now);
                    self.accept_result(result, now);
                }
                ChannelEvent::Malformed(_) => self.complete_request(now),
                ChannelEvent::Connected => self.supervisor.on_confirmed(),
                ChannelEvent::ServiceError(_) => {}
                ChannelEvent::Closed(fault) => self.on_fault(fault, now),
            }
        }
    }

    fn complete_request(&mut self, now: Instant) {
        if let Some(permit) = self.permit.take() {
            let seq = permit.seq();
            if let Some(rtt) = self.gate.release(permit, now) {
                log::debug!("client: request {} answered in {} ms", seq, rtt.as_millis());
            }
        }
    }

    fn accept_result(&mut self, result: VisionResult, now: Instant) {
        if result.mode != self.modes.mode() {
            self.counters.results_discarded += 1;
            log::debug!(
                "client: discarding {} result under mode {}",
                result.mode,
                self.modes.mode()
            );
            return;
        }
        self.stats.record(&result, now);
        self.detections.replace(result, now);
        self.counters.results_accepted += 1;
    }

    fn enforce_deadline(&mut self, now: Instant) {
        if self.gate.is_expired(now) {
            self.counters.deadlines_expired += 1;
            log::warn!(
                "client: no answer within {} ms, dropping session",
                self.gate.deadline().as_millis()
            );
            self.on_fault(ChannelFault::Deadline, now);
        }
    }

    fn supervise(&mut self, now: Instant) {
        if self.channel.is_open() || !self.supervisor.should_attempt(now) {
            return;
        }
        match self.channel.open(now) {
            Ok(()) => self.supervisor.on_opened(),
            Err(fault) => self.on_fault(fault, now),
        }
    }

    fn on_fault(&mut self, fault: ChannelFault, now: Instant) {
        self.permit = None;
        self.gate.reset();
        self.channel.abort(&fault);
        if let SupervisorState::Failed { attempts } = self.supervisor.on_failure(now) {
            log::error!(
                "client: giving up on {} after {} attempt(s): {}",
                self.channel.endpoint().base(),
                attempts,
                fault
            );
        }
    }

    fn capture_tick(&mut self, now: Instant) {
        if !self.channel.is_open() {
            self.counters.ticks_without_channel += 1;
            return;
        }
        let Some(permit) = self.gate.try_acquire(now) else {
            log::debug!("capture: request in flight, tick skipped");
            return;
        };

        let encoded = self
            .camera
            .current_frame()
            .and_then(|frame| self.encoder.encode(&frame));
        let encoded = match encoded {
            Ok(encoded) => encoded,
            Err(e) => {
                self.counters.capture_failures += 1;
                log::warn!("capture: frame unavailable: {:#}", e);
                self.gate.release(permit, now);
                return;
            }
        };

        let sequence = encoded.sequence;
        let jpeg_bytes = encoded.jpeg_bytes;
        let message = OutboundMessage::Frame {
            data: encoded.data,
            mode: self.modes.mode(),
            confidence: self.modes.confidence(),
        };
        match self.channel.send_frame(&message) {
            Ok(()) => {
                log::debug!(
                    "capture: frame {} sent as request {} ({} bytes jpeg)",
                    sequence,
                    permit.seq(),
                    jpeg_bytes
                );
                self.permit = Some(permit);
                self.counters.frames_sent += 1;
            }
            Err(fault) => {
                self.gate.release(permit, now);
                self.on_fault(fault, now);
            }
        }
    }

    fn render_tick(&mut self, now: Instant) {
        self.stats.roll(now);
        let snapshot = self.detections.snapshot();
        let plan = self.hud.plan(
            &snapshot,
            self.modes.mode(),
            &self.stats.current(),
            self.container,
            now,
        );
        self.surface.paint(&plan);
        self.last_plan = Some(plan);
        self.counters.renders += 1;
    }

    /// Switch mode. Clears whatever was drawn for the previous mode.
    pub fn set_mode(&mut self, mode: Mode) -> bool {
        if !self.modes.set_mode(mode) {
            return false;
        }
        self.detections.clear(mode);
        self.stats.clear_result();
        true
    }

    /// Applies from the next outgoing frame.
    pub fn set_confidence(&mut self, confidence: f32) -> Result<f32> {
        self.modes.set_confidence(confidence)
    }

    /// Overlay container size; the surface follows on the next render tick.
    pub fn resize(&mut self, size: FrameSize) {
        self.container = size;
    }

    pub fn status(&self) -> ClientStatus {
        if let Some(reason) = &self.camera_error {
            return ClientStatus::CameraUnavailable(reason.clone());
        }
        if !self.active {
            return ClientStatus::Idle;
        }
        match self.supervisor.state() {
            SupervisorState::Failed { attempts } => ClientStatus::ConnectionFailed { attempts },
            SupervisorState::Backoff { attempt, .. } => ClientStatus::Reconnecting { attempt },
            _ if self.channel.is_open() => ClientStatus::Streaming,
            _ => ClientStatus::Connecting,
        }
    }

    /// Earliest instant at which `turn` has work to do, if any timer is armed.
    pub fn next_deadline(&self) -> Option<Instant> {
        if !self.active {
            return None;
        }
        [
            self.capture.next_due(),
            self.render.next_due(),
            self.gate.expires_at(),
            self.supervisor.next_attempt_at(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// True while a frame request is outstanding.
    pub fn is_awaiting(&self) -> bool {
        self.gate.is_awaiting()
    }

    pub fn timers_armed(&self) -> bool {
        self.capture.is_armed() || self.render.is_armed()
    }

    pub fn mode(&self) -> Mode {
        self.modes.mode()
    }

    pub fn confidence(&self) -> f32 {
        self.modes.confidence()
    }

    pub fn stats(&self) -> Stats {
        self.stats.current()
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.detections.snapshot()
    }

    pub fn last_plan(&self) -> Option<&OverlayPlan> {
        self.last_plan.as_ref()
    }

    pub fn surface(&self) -> &OverlaySurface {
        &self.surface
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn channel_stats(&self) -> ChannelStats {
        self.channel.stats()
    }

    pub fn gate_stats(&self) -> GateStats {
        self.gate.stats()
    }

    pub fn counters(&self) -> ClientCounters {
        self.counters
    }
}

impl Drop for VisionClient {
    fn drop(&mut self) {
        if self.active {
            self.stop(Instant::now());
        }
    }
}
