//! Wire messages exchanged with the inference service.
//!
//! Outbound (client → service), JSON text frames:
//! - `{ "type": "auth", "token": "..." }`
//! - `{ "type": "frame", "data": "<base64 jpeg>", "mode": "detect", "confidence": 0.25 }`
//!
//! Inbound (service → client):
//! - `{ "type": "vision.result", "mode": "...", "inference_ms": 12, "detections": [...] }`
//! - `{ "type": "vision.connected" }`
//! - `{ "type": "error", "message": "..." }`
//!
//! Result items are decoded one at a time: an item that does not decode (missing
//! `class`, non-numeric coordinates) is dropped and the rest of the result is kept.
//! `bbox` and `polygon` accept numeric arrays of any length; shape validation
//! happens when the overlay is drawn.

use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::mode::Mode;

pub const TYPE_RESULT: &str = "vision.result";
pub const TYPE_CONNECTED: &str = "vision.connected";
pub const TYPE_ERROR: &str = "error";

/// Client → service message.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    Auth {
        token: String,
    },
    Frame {
        data: String,
        mode: Mode,
        confidence: f32,
    },
}

impl OutboundMessage {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| anyhow!("serialize outbound message: {}", e))
    }
}

/// One located object.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Detection {
    pub class: String,
    #[serde(default)]
    pub confidence: f64,
    /// `[x1, y1, x2, y2]`, normalized to the capture frame.
    #[serde(default)]
    pub bbox: Vec<f64>,
    /// Ordered `[x, y]` points, normalized to the capture frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polygon: Option<Vec<Vec<f64>>>,
}

/// One whole-frame class score.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Classification {
    pub class: String,
    #[serde(default)]
    pub confidence: f64,
}

/// Result items; a result carries one kind or the other, selected by its mode.
#[derive(Clone, Debug, PartialEq)]
pub enum ResultItems {
    Detections(Vec<Detection>),
    Classifications(Vec<Classification>),
}

impl ResultItems {
    pub fn len(&self) -> usize {
        match self {
            ResultItems::Detections(items) => items.len(),
            ResultItems::Classifications(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-item confidences in arrival order.
    pub fn confidences(&self) -> Vec<f64> {
        match self {
            ResultItems::Detections(items) => items.iter().map(|d| d.confidence).collect(),
            ResultItems::Classifications(items) => items.iter().map(|c| c.confidence).collect(),
        }
    }
}

/// A complete inference result for one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct VisionResult {
    pub mode: Mode,
    pub inference_ms: u64,
    pub items: ResultItems,
}

impl VisionResult {
    pub fn empty(mode: Mode) -> Self {
        let items = if mode.is_classification() {
            ResultItems::Classifications(Vec::new())
        } else {
            ResultItems::Detections(Vec::new())
        };
        Self {
            mode,
            inference_ms: 0,
            items,
        }
    }

    pub fn detections(&self) -> &[Detection] {
        match &self.items {
            ResultItems::Detections(items) => items,
            ResultItems::Classifications(_) => &[],
        }
    }

    pub fn classifications(&self) -> &[Classification] {
        match &self.items {
            ResultItems::Classifications(items) => items,
            ResultItems::Detections(_) => &[],
        }
    }
}

/// Service → client message, after classification by `type`.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundMessage {
    Result(VisionResult),
    Connected,
    ServiceError(String),
    /// Well-formed JSON object with a type this client does not handle.
    Other(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ResultWire {
    mode: Mode,
    #[serde(default)]
    inference_ms: u64,
    #[serde(default)]
    detections: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    classifications: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct ErrorWire {
    #[serde(default)]
    message: String,
}

/// Parse one inbound text frame. Errors mean the message is malformed.
pub fn parse_inbound(text: &str) -> Result<InboundMessage> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| anyhow!("parse error: {}", e))?;
    let envelope: Envelope = serde_json::from_value(value.clone())
        .map_err(|e| anyhow!("missing message type: {}", e))?;

    match envelope.kind.as_str() {
        TYPE_RESULT => {
            let wire: ResultWire = serde_json::from_value(value)
                .map_err(|e| anyhow!("invalid vision.result: {}", e))?;
            Ok(InboundMessage::Result(result_from_wire(wire)?))
        }
        TYPE_CONNECTED => Ok(InboundMessage::Connected),
        TYPE_ERROR => {
            let wire: ErrorWire = serde_json::from_value(value)
                .map_err(|e| anyhow!("invalid error message: {}", e))?;
            Ok(InboundMessage::ServiceError(wire.message))
        }
        other => Ok(InboundMessage::Other(other.to_string())),
    }
}

fn result_from_wire(wire: ResultWire) -> Result<VisionResult> {
    let items = if wire.mode.is_classification() {
        if wire.detections.as_ref().is_some_and(|d| !d.is_empty()) {
            return Err(anyhow!("classify result carries detections"));
        }
        ResultItems::Classifications(decode_items(wire.classifications, "classification"))
    } else {
        if wire.classifications.as_ref().is_some_and(|c| !c.is_empty()) {
            return Err(anyhow!("{} result carries classifications", wire.mode));
        }
        ResultItems::Detections(decode_items(wire.detections, "detection"))
    };
    Ok(VisionResult {
        mode: wire.mode,
        inference_ms: wire.inference_ms,
        items,
    })
}

fn decode_items<T: DeserializeOwned>(items: Option<Vec<serde_json::Value>>, kind: &str) -> Vec<T> {
    items
        .unwrap_or_default()
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                log::debug!("protocol: skipping {}: {}", kind, e);
                None
            }
        })
        .collect()
}
