use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};

use vision_hud::capture::{CameraConfig, CameraSource, CaptureStats, FrameSource};
use vision_hud::channel::{loopback, LoopbackPeer, LoopbackServer, StaticToken};
use vision_hud::frame::{Frame, FrameSize};
use vision_hud::hud::PixelRect;
use vision_hud::{
    ChannelState, ClientConfig, ClientStatus, Mode, ReconnectPolicy, ServerEndpoint,
    VisionChannel, VisionClient,
};

struct Harness {
    client: VisionClient,
    server: LoopbackServer,
    t0: Instant,
}

impl Harness {
    fn at(&self, ms: u64) -> Instant {
        self.t0 + Duration::from_millis(ms)
    }

    fn turn(&mut self, ms: u64) {
        let now = self.at(ms);
        self.client.turn(now);
    }

    /// Accept the pending connection and consume its auth message.
    fn accept(&self) -> LoopbackPeer {
        let peer = self.server.accept().expect("client connected");
        let auth = peer.recv().expect("auth message");
        assert!(auth.contains(r#""type":"auth""#), "first message was {}", auth);
        peer
    }
}

fn test_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.camera.device = "stub://test".to_string();
    config.camera.size = FrameSize::new(64, 48);
    config.capture.size = FrameSize::new(64, 48);
    config.hud.size = FrameSize::new(640, 480);
    config.capture.request_timeout = Duration::from_millis(500);
    config.reconnect = ReconnectPolicy {
        initial_backoff: Duration::from_millis(100),
        max_backoff: Duration::from_millis(1000),
        multiplier: 2.0,
        jitter: 0.0,
        max_attempts: 2,
    };
    config
}

fn harness(config: ClientConfig) -> Harness {
    let (connector, server) = loopback();
    let channel = VisionChannel::new(
        ServerEndpoint::parse("http://127.0.0.1:8000").unwrap(),
        Box::new(StaticToken::new("test-token")),
        Box::new(connector),
    );
    let camera = CameraSource::new(config.camera.clone()).unwrap();
    let t0 = Instant::now();
    let client = VisionClient::new(&config, Box::new(camera), channel, t0).unwrap();
    Harness { client, server, t0 }
}

fn started(config: ClientConfig) -> (Harness, LoopbackPeer) {
    let mut h = harness(config);
    let status = h.client.start(h.t0);
    assert_eq!(status, ClientStatus::Streaming);
    let peer = h.accept();
    (h, peer)
}

fn detect_result(boxes: &[[f64; 4]]) -> String {
    let detections: Vec<serde_json::Value> = boxes
        .iter()
        .map(|b| serde_json::json!({"class": "person", "confidence": 0.8, "bbox": b}))
        .collect();
    serde_json::json!({
        "type": "vision.result",
        "mode": "detect",
        "inference_ms": 30,
        "detections": detections,
    })
    .to_string()
}

fn frames_in(messages: &[String]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| serde_json::from_str::<serde_json::Value>(m).unwrap())
        .filter(|v| v["type"] == "frame")
        .collect()
}

#[test]
fn first_tick_sends_a_jpeg_frame_request() -> Result<()> {
    let (mut h, peer) = started(test_config());
    h.turn(0);

    let frames = frames_in(&peer.drain());
    assert_eq!(frames.len(), 1);
    let frame = &frames[0];
    assert_eq!(frame["mode"], "detect");
    assert!((frame["confidence"].as_f64().unwrap() - 0.25).abs() < 1e-6);

    let data = frame["data"]
        .as_str()
        .ok_or_else(|| anyhow!("data is not a string"))?;
    let jpeg = BASE64_STANDARD.decode(data)?;
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    assert!(h.client.is_awaiting());
    Ok(())
}

#[test]
fn ticks_while_awaiting_send_nothing() {
    let (mut h, peer) = started(test_config());
    h.turn(0);
    assert_eq!(frames_in(&peer.drain()).len(), 1);

    h.turn(125);
    h.turn(250);
    assert!(peer.drain().is_empty());
    assert_eq!(h.client.gate_stats().skipped, 2);
    assert!(h.client.is_awaiting());
}

#[test]
fn result_releases_the_permit_before_next_tick() {
    let (mut h, peer) = started(test_config());
    h.turn(0);
    peer.drain();

    peer.send_text(&detect_result(&[[0.1, 0.1, 0.5, 0.6]]));
    h.turn(60);
    assert!(!h.client.is_awaiting());
    assert_eq!(h.client.counters().results_accepted, 1);

    h.turn(125);
    assert_eq!(frames_in(&peer.drain()).len(), 1);
}

#[test]
fn accepted_result_is_drawn_at_surface_scale() {
    let (mut h, peer) = started(test_config());
    h.turn(0);
    peer.send_text(&detect_result(&[[0.1, 0.1, 0.5, 0.6]]));
    h.turn(20);

    let plan = h.client.last_plan().expect("render tick ran");
    assert_eq!(plan.detection_boxes(), vec![PixelRect::new(64, 48, 320, 288)]);
    assert_eq!(h.client.surface().size(), FrameSize::new(640, 480));
    assert_eq!(h.client.stats().object_count, 1);
    assert_eq!(h.client.stats().last_inference_ms, 30);
}

#[test]
fn undecodable_detection_leaves_the_others_drawn() {
    let (mut h, peer) = started(test_config());
    h.turn(0);
    peer.send_text(
        r#"{"type":"vision.result","mode":"detect","inference_ms":25,"detections":[
            {"class":"person","confidence":0.8,"bbox":[0.1,0.1,0.5,0.6]},
            {"class":"cup","confidence":0.6,"bbox":[0.2,null,0.3,0.3]}
        ]}"#,
    );
    h.turn(20);

    assert!(!h.client.is_awaiting());
    assert_eq!(h.client.counters().results_accepted, 1);
    assert_eq!(h.client.channel_stats().malformed, 0);
    let plan = h.client.last_plan().expect("render tick ran");
    assert_eq!(plan.detection_boxes(), vec![PixelRect::new(64, 48, 320, 288)]);
    assert_eq!(h.client.stats().object_count, 1);
}

#[test]
fn mode_change_clears_boxes_and_drops_late_results() {
    let (mut h, peer) = started(test_config());
    h.turn(0);
    peer.send_text(&detect_result(&[
        [0.1, 0.1, 0.2, 0.2],
        [0.3, 0.3, 0.4, 0.4],
        [0.5, 0.5, 0.6, 0.6],
    ]));
    h.turn(20);
    assert_eq!(h.client.last_plan().unwrap().detection_boxes().len(), 3);

    h.turn(125);
    assert!(h.client.is_awaiting());
    assert!(h.client.set_mode(Mode::Classify));
    assert!(h.client.snapshot().is_empty());

    // Answer to the request sent under detect.
    peer.send_text(&detect_result(&[[0.1, 0.1, 0.2, 0.2]]));
    h.turn(150);
    let plan = h.client.last_plan().unwrap();
    assert!(plan.detection_boxes().is_empty());
    assert_eq!(h.client.counters().results_discarded, 1);
    assert!(!h.client.is_awaiting());

    peer.drain();
    h.turn(250);
    let frames = frames_in(&peer.drain());
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["mode"], "classify");
}

#[test]
fn malformed_message_completes_the_exchange() {
    let (mut h, peer) = started(test_config());
    h.turn(0);
    peer.send_text("{not json");
    h.turn(10);

    assert!(!h.client.is_awaiting());
    assert_eq!(h.client.channel_stats().malformed, 1);
    assert_eq!(h.client.status(), ClientStatus::Streaming);
}

#[test]
fn unrelated_messages_keep_the_request_outstanding() {
    let (mut h, peer) = started(test_config());
    h.turn(0);
    peer.send_text(r#"{"type":"vision.connected"}"#);
    peer.send_text(r#"{"type":"chat.delta","text":"hi"}"#);
    h.turn(10);

    assert!(h.client.is_awaiting());
    assert_eq!(h.client.channel_state(), ChannelState::Ready);
}

#[test]
fn stop_while_awaiting_tears_everything_down() {
    let (mut h, peer) = started(test_config());
    h.turn(0);
    assert!(h.client.is_awaiting());

    let t = h.at(50);
    h.client.stop(t);
    assert!(!h.client.is_awaiting());
    assert!(!h.client.timers_armed());
    assert_eq!(h.client.channel_state(), ChannelState::Disconnected);
    assert_eq!(h.client.status(), ClientStatus::Idle);
    peer.drain();
    assert!(peer.is_client_closed());

    // Stop is idempotent.
    let t = h.at(60);
    h.client.stop(t);

    let t = h.at(100);
    assert_eq!(h.client.start(t), ClientStatus::Streaming);
    let fresh = h.accept();
    h.turn(100);
    assert_eq!(frames_in(&fresh.drain()).len(), 1);
}

#[test]
fn expired_request_drops_session_and_reconnects() {
    let (mut h, peer) = started(test_config());
    h.turn(0);
    peer.drain();

    h.turn(499);
    assert!(h.client.is_awaiting());

    h.turn(500);
    assert!(!h.client.is_awaiting());
    assert_eq!(h.client.counters().deadlines_expired, 1);
    assert_eq!(h.client.channel_state(), ChannelState::Closed);
    assert_eq!(h.client.status(), ClientStatus::Reconnecting { attempt: 1 });
    assert!(peer.is_client_closed());

    h.turn(600);
    assert_eq!(h.client.status(), ClientStatus::Streaming);
    let fresh = h.accept();
    h.turn(625);
    assert_eq!(frames_in(&fresh.drain()).len(), 1);
}

#[test]
fn reconnect_gives_up_after_budget_then_recovers_on_restart() {
    let (mut h, peer) = started(test_config());
    h.turn(0);
    h.server.set_refusing(true);
    peer.close(1011, "internal error");

    h.turn(10);
    assert_eq!(h.client.status(), ClientStatus::Reconnecting { attempt: 1 });
    assert!(!h.client.is_awaiting());

    h.turn(110);
    assert_eq!(h.client.status(), ClientStatus::Reconnecting { attempt: 2 });

    h.turn(310);
    assert_eq!(
        h.client.status(),
        ClientStatus::ConnectionFailed { attempts: 2 }
    );
    h.turn(5000);
    assert!(h.server.accept().is_none());

    let t = h.at(5000);
    h.client.stop(t);
    h.server.set_refusing(false);
    let t = h.at(5100);
    assert_eq!(h.client.start(t), ClientStatus::Streaming);
}

fn reject_auth(peer: &LoopbackPeer) {
    peer.send_text(r#"{"type":"error","message":"Authentication required."}"#);
    peer.close(4001, "Authentication failed");
}

#[test]
fn rejected_auth_on_every_attempt_spends_the_budget() {
    let (mut h, peer) = started(test_config());
    reject_auth(&peer);
    h.turn(10);
    assert_eq!(h.client.status(), ClientStatus::Reconnecting { attempt: 1 });

    h.turn(110);
    reject_auth(&h.accept());
    h.turn(120);
    assert_eq!(h.client.status(), ClientStatus::Reconnecting { attempt: 2 });

    // Second retry waits the doubled backoff.
    h.turn(319);
    assert!(h.server.accept().is_none());
    h.turn(320);
    reject_auth(&h.accept());
    h.turn(330);
    assert_eq!(
        h.client.status(),
        ClientStatus::ConnectionFailed { attempts: 2 }
    );

    h.turn(5000);
    assert!(h.server.accept().is_none());
}

#[test]
fn acknowledged_session_restarts_the_budget() {
    let (mut h, peer) = started(test_config());
    reject_auth(&peer);
    h.turn(10);
    assert_eq!(h.client.status(), ClientStatus::Reconnecting { attempt: 1 });

    h.turn(110);
    let peer = h.accept();
    peer.send_text(r#"{"type":"vision.connected"}"#);
    h.turn(115);
    assert_eq!(h.client.status(), ClientStatus::Streaming);

    peer.close(1011, "internal error");
    h.turn(120);
    assert_eq!(h.client.status(), ClientStatus::Reconnecting { attempt: 1 });
}

#[test]
fn ten_results_in_a_second_show_ten_fps() {
    let mut config = test_config();
    config.capture.interval = Duration::from_millis(90);
    let (mut h, peer) = started(config);

    for i in 0..10 {
        h.turn(i * 90);
        assert_eq!(frames_in(&peer.drain()).len(), 1, "tick {}", i);
        peer.send_text(&detect_result(&[]));
        h.turn(i * 90 + 5);
    }
    assert_eq!(h.client.counters().results_accepted, 10);
    assert_eq!(h.client.stats().avg_confidence, 0.0);

    h.turn(1000);
    assert_eq!(h.client.stats().fps, 10);
}

struct BrokenCamera;

impl FrameSource for BrokenCamera {
    fn name(&self) -> &str {
        "/dev/video9"
    }

    fn start(&mut self) -> Result<()> {
        Err(anyhow!("permission denied"))
    }

    fn current_frame(&mut self) -> Result<Frame> {
        Err(anyhow!("not started"))
    }

    fn stop(&mut self) {}

    fn is_active(&self) -> bool {
        false
    }

    fn stats(&self) -> CaptureStats {
        CaptureStats::default()
    }
}

#[test]
fn camera_failure_is_reported_without_touching_the_network() {
    let config = test_config();
    let (connector, server) = loopback();
    let channel = VisionChannel::new(
        ServerEndpoint::parse("http://127.0.0.1:8000").unwrap(),
        Box::new(StaticToken::new("t")),
        Box::new(connector),
    );
    let now = Instant::now();
    let mut client = VisionClient::new(&config, Box::new(BrokenCamera), channel, now).unwrap();

    let status = client.start(now);
    assert!(matches!(status, ClientStatus::CameraUnavailable(ref r) if r.contains("permission denied")));
    assert!(!client.is_active());
    assert!(server.accept().is_none());
    assert_eq!(client.next_deadline(), None);
}

#[test]
fn unknown_stub_free_device_needs_capture_feature() {
    let config = CameraConfig {
        device: "/dev/video0".to_string(),
        ..CameraConfig::default()
    };
    let source = CameraSource::new(config);
    if cfg!(feature = "ingest-v4l2") {
        assert!(source.is_ok());
    } else {
        assert!(source.is_err());
    }
}
