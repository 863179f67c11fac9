//! Replay a recorded detection stream through a [`FaceSession`].
//!
//! Input is JSON lines, one frame each:
//! `{"t_ms": 0, "faces": [{"bbox": {"x":..,"y":..,"width":..,"height":..}, "descriptor": [..]}]}`.

use anyhow::{Context, Result};
use recordai_core::session::{Detection, FaceSession, IdentityClient, SessionConfig, SessionEvent};
use recordai_core::{BoundingBox, Embedding};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Deserialize)]
pub struct Frame {
    /// Offset from the start of the recording.
    pub t_ms: u64,
    #[serde(default)]
    pub faces: Vec<RecordedFace>,
}

#[derive(Debug, Deserialize)]
pub struct RecordedFace {
    pub bbox: BoundingBox,
    #[serde(default)]
    pub descriptor: Option<Vec<f32>>,
}

impl From<RecordedFace> for Detection {
    fn from(face: RecordedFace) -> Self {
        Detection {
            bbox: face.bbox,
            descriptor: face.descriptor.map(Embedding::new),
        }
    }
}

pub fn parse_frames(raw: &str) -> Result<Vec<Frame>> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("frame on line {}", i + 1))
        })
        .collect()
}

pub async fn read_frames(path: &Path) -> Result<Vec<Frame>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    parse_frames(&raw)
}

/// Feed `frames` to a session and return every event in order.
///
/// With `realtime` the frames are paced by their timestamps and results are
/// collected as they land. Without it, each frame waits for all requests it
/// started to settle, which makes the run deterministic.
pub async fn replay<C: IdentityClient>(
    client: Arc<C>,
    config: SessionConfig,
    frames: Vec<Frame>,
    realtime: bool,
) -> Vec<SessionEvent> {
    let mut session = FaceSession::new(client, config);
    let mut events = Vec::new();
    let start = Instant::now();
    let wall_start = tokio::time::Instant::now();

    for frame in frames {
        let offset = Duration::from_millis(frame.t_ms);
        if realtime {
            tokio::time::sleep_until(wall_start + offset).await;
        }
        let detections: Vec<Detection> = frame.faces.into_iter().map(Detection::from).collect();
        events.extend(session.observe(start + offset, &detections));

        if realtime {
            while let Some(event) = session.try_next_event() {
                events.push(event);
            }
        } else {
            while let Some(event) = session.next_event().await {
                events.push(event);
            }
        }
    }

    while let Some(event) = session.next_event().await {
        events.push(event);
    }
    tracing::info!(events = events.len(), greeted = session.greetings().len(), "replay finished");
    session.end();
    events
}

pub fn describe(event: &SessionEvent) -> String {
    match event {
        SessionEvent::Identified {
            track,
            person,
            outcome,
            greet,
        } => {
            let distance = outcome.best.as_ref().map(|b| b.distance).unwrap_or_default();
            let mut line = format!(
                "face {track}: {} (distance {distance:.4}, {})",
                person.full_name,
                outcome
                    .confidence
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".into())
            );
            if *greet {
                line.push_str(&format!("\n  Hello, {}!", person.full_name));
            }
            line
        }
        SessionEvent::NotIdentified { track, reason, .. } => {
            format!("face {track}: not identified ({reason})")
        }
        SessionEvent::Lost { track } => format!("face {track}: left the frame"),
    }
}
