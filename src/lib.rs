//! Vision HUD client
//!
//! Streams camera frames to a remote inference service over an authenticated
//! WebSocket and draws the returned detections as a heads-up overlay.
//!
//! # Architecture
//!
//! Three activities run on independent clocks and must not stall each other:
//!
//! 1. **Capture**: a fixed-interval tick grabs the current frame, downsamples and
//!    JPEG/base64-encodes it, and sends it only if no request is in flight.
//! 2. **Inference round trip**: at most one frame request is outstanding per
//!    session. Its answer (or a deadline) frees the slot again.
//! 3. **Rendering**: a display-paced tick paints the latest accepted result,
//!    whatever its age.
//!
//! # Module Structure
//!
//! - `capture`: frame sources (`stub://` synthetic camera, V4L2 behind `ingest-v4l2`)
//! - `encode`: downsampling and JPEG/base64 encoding
//! - `gate`: single-permit admission control for frame requests
//! - `channel`: token fetch, socket handshake and message dispatch
//! - `supervisor`: reconnect backoff
//! - `state`, `stats`, `mode`: latest result, HUD figures, user selections
//! - `hud`: overlay planning and rasterisation
//! - `client`, `runtime`: the owner of all of the above and the loop that drives it

pub mod capture;
pub mod channel;
pub mod client;
pub mod config;
pub mod encode;
pub mod frame;
pub mod gate;
pub mod hud;
pub mod mode;
pub mod protocol;
pub mod runtime;
pub mod state;
pub mod stats;
pub mod supervisor;

pub use capture::{CameraConfig, CameraSource, FrameSource};
pub use channel::{ChannelFault, ChannelState, ServerEndpoint, VisionChannel};
pub use client::{ClientStatus, VisionClient};
pub use config::ClientConfig;
pub use encode::{EncodedFrame, FrameEncoder};
pub use frame::{Frame, FrameSize};
pub use gate::{BackpressureGate, Permit};
pub use hud::{HudRenderer, HudStyle, OverlayPlan, OverlaySurface};
pub use mode::{Mode, ModeController};
pub use protocol::{Classification, Detection, VisionResult};
pub use runtime::{Command, EventLoop, LoopHandle};
pub use state::{DetectionState, Snapshot};
pub use stats::{Stats, StatsAggregator};
pub use supervisor::{ConnectionSupervisor, ReconnectPolicy};
