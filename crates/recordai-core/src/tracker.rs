//! Face tracking across frames and the re-identification policy.
//!
//! Tracks follow bounding boxes by spatial proximity only. Two boxes in
//! consecutive frames are "the same face" when their centres are close; this
//! is a visual heuristic and says nothing about identity.

use crate::types::BoundingBox;
use std::time::{Duration, Instant};

pub type TrackId = u64;

pub const DEFAULT_MAX_FACES: usize = 3;
pub const DEFAULT_MAX_CENTROID_DISTANCE: f32 = 80.0;
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    /// Maximum number of faces tracked at once.
    pub max_faces: usize,
    /// Maximum centre displacement, in pixels, between frames for one track.
    pub max_centroid_distance: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_faces: DEFAULT_MAX_FACES,
            max_centroid_distance: DEFAULT_MAX_CENTROID_DISTANCE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    pub bbox: BoundingBox,
    pub first_seen: Instant,
    pub last_seen: Instant,
}

/// What one call to [`FaceTracker::update`] did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FrameUpdate {
    /// `(detection index, track)` for every detection that belongs to a track.
    pub assignments: Vec<(usize, TrackId)>,
    /// Tracks opened in this frame (also present in `assignments`).
    pub created: Vec<TrackId>,
    /// Tracks whose face was not seen in this frame.
    pub dropped: Vec<TrackId>,
    /// Detections left out because the face cap was reached.
    pub ignored: Vec<usize>,
}

impl FrameUpdate {
    pub fn track_for(&self, detection: usize) -> Option<TrackId> {
        self.assignments
            .iter()
            .find(|(d, _)| *d == detection)
            .map(|(_, t)| *t)
    }
}

/// Nearest-centroid tracker.
#[derive(Debug)]
pub struct FaceTracker {
    config: TrackerConfig,
    tracks: Vec<Track>,
    next_id: TrackId,
}

impl FaceTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    /// Associate this frame's detections with existing tracks.
    ///
    /// Closest (track, detection) pairs within the distance limit are matched
    /// first. Tracks left without a detection are dropped. Remaining
    /// detections open new tracks, most confident first, up to the face cap.
    pub fn update(&mut self, now: Instant, detections: &[BoundingBox]) -> FrameUpdate {
        let mut pairs: Vec<(usize, usize, f32)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (di, det) in detections.iter().enumerate() {
                let d = track.bbox.center_distance(det);
                if d <= self.config.max_centroid_distance {
                    pairs.push((ti, di, d));
                }
            }
        }
        pairs.sort_by(|a, b| a.2.total_cmp(&b.2));

        let mut track_used = vec![false; self.tracks.len()];
        let mut det_used = vec![false; detections.len()];
        let mut update = FrameUpdate::default();

        for (ti, di, _) in pairs {
            if track_used[ti] || det_used[di] {
                continue;
            }
            track_used[ti] = true;
            det_used[di] = true;
            let track = &mut self.tracks[ti];
            track.bbox = detections[di];
            track.last_seen = now;
            update.assignments.push((di, track.id));
        }

        let mut kept = Vec::with_capacity(self.tracks.len());
        for (track, used) in self.tracks.drain(..).zip(track_used) {
            if used {
                kept.push(track);
            } else {
                tracing::debug!(track = track.id, "face left the frame");
                update.dropped.push(track.id);
            }
        }
        self.tracks = kept;

        let mut fresh: Vec<usize> = (0..detections.len()).filter(|&i| !det_used[i]).collect();
        fresh.sort_by(|&a, &b| detections[b].confidence.total_cmp(&detections[a].confidence));

        for di in fresh {
            if self.tracks.len() >= self.config.max_faces {
                update.ignored.push(di);
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            self.tracks.push(Track {
                id,
                bbox: detections[di],
                first_seen: now,
                last_seen: now,
            });
            tracing::debug!(track = id, "new face tracked");
            update.assignments.push((di, id));
            update.created.push(id);
        }

        update.ignored.sort_unstable();
        update
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}

/// Identification state of one tracked face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatus {
    /// Never queried.
    New,
    /// Collecting samples for the next query.
    Sampling,
    /// A request is outstanding.
    InFlight { since: Instant },
    /// Identified; not queried again while tracked.
    Matched,
    /// Last attempt failed or found nobody.
    Unmatched { last_attempt: Instant },
}

/// When a tracked face may be (re)queried.
#[derive(Debug, Clone, Copy)]
pub struct ReidentifyPolicy {
    pub retry_interval: Duration,
}

impl Default for ReidentifyPolicy {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

impl ReidentifyPolicy {
    pub fn new(retry_interval: Duration) -> Self {
        Self { retry_interval }
    }

    /// Whether a new identification attempt should start now.
    ///
    /// An in-flight request is never superseded here; it ends with its
    /// result, the request timeout or the face leaving the frame.
    pub fn should_query(&self, status: &TrackStatus, now: Instant) -> bool {
        match *status {
            TrackStatus::New => true,
            TrackStatus::Sampling | TrackStatus::InFlight { .. } | TrackStatus::Matched => false,
            TrackStatus::Unmatched { last_attempt } => {
                now.saturating_duration_since(last_attempt) >= self.retry_interval
            }
        }
    }
}
