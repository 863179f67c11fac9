//! Per-face identification session.
//!
//! Drives an [`IdentityClient`] from a stream of detections: tracks faces,
//! collects descriptor samples per face, averages them and issues at most one
//! request per face at a time. A request ends with its result, the request
//! timeout or the face leaving the frame; the retry window only paces new
//! attempts after a miss. Each request carries a generation number and a
//! result whose generation is no longer current is discarded.
//!
//! Requests are spawned on the ambient tokio runtime, so [`FaceSession::observe`]
//! must be called from within one.

use crate::greeting::GreetingSession;
use crate::sampling::{self, SamplingError, SamplingPlan};
use crate::tracker::{FaceTracker, ReidentifyPolicy, TrackId, TrackStatus, TrackerConfig};
use crate::types::{BoundingBox, Embedding, MatchOutcome, PersonProfile};
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Capability used by a session to identify one (averaged) descriptor.
pub trait IdentityClient: Send + Sync + 'static {
    type Error: Display + Send + 'static;

    fn identify(
        &self,
        query: Embedding,
    ) -> impl Future<Output = Result<MatchOutcome, Self::Error>> + Send;
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("identification failed: {0}")]
    Client(String),
    #[error("identification timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Sampling(#[from] SamplingError),
}

/// One detected face in a frame.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Descriptor computed for this face, if the detector produced one.
    pub descriptor: Option<Embedding>,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub tracker: TrackerConfig,
    pub policy: ReidentifyPolicy,
    pub sampling: SamplingPlan,
    pub request_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            policy: ReidentifyPolicy::default(),
            sampling: SamplingPlan::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Identified {
        track: TrackId,
        person: PersonProfile,
        outcome: MatchOutcome,
        /// First identification of this person in the session.
        greet: bool,
    },
    NotIdentified {
        track: TrackId,
        outcome: Option<MatchOutcome>,
        reason: String,
    },
    Lost {
        track: TrackId,
    },
}

struct Completion {
    track: TrackId,
    generation: u64,
    result: Result<MatchOutcome, SessionError>,
}

struct FaceSlot {
    status: TrackStatus,
    samples: Vec<Embedding>,
    last_sample_at: Option<Instant>,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl FaceSlot {
    fn new() -> Self {
        Self {
            status: TrackStatus::New,
            samples: Vec::new(),
            last_sample_at: None,
            generation: 0,
            task: None,
        }
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

pub struct FaceSession<C: IdentityClient> {
    client: Arc<C>,
    config: SessionConfig,
    tracker: FaceTracker,
    slots: HashMap<TrackId, FaceSlot>,
    greetings: GreetingSession,
    tx: mpsc::UnboundedSender<Completion>,
    rx: mpsc::UnboundedReceiver<Completion>,
}

impl<C: IdentityClient> FaceSession<C> {
    pub fn new(client: Arc<C>, config: SessionConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            client,
            tracker: FaceTracker::new(config.tracker),
            config,
            slots: HashMap::new(),
            greetings: GreetingSession::new(),
            tx,
            rx,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn status(&self, track: TrackId) -> Option<TrackStatus> {
        self.slots.get(&track).map(|s| s.status)
    }

    pub fn tracked(&self) -> usize {
        self.slots.len()
    }

    /// Number of faces with an outstanding request.
    pub fn in_flight(&self) -> usize {
        self.slots.values().filter(|s| s.task.is_some()).count()
    }

    pub fn greetings(&self) -> &GreetingSession {
        &self.greetings
    }

    /// Feed one frame's detections.
    ///
    /// Returns results that completed since the last call, then the faces
    /// that left the frame.
    pub fn observe(&mut self, now: Instant, detections: &[Detection]) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_next_event() {
            events.push(event);
        }

        let boxes: Vec<BoundingBox> = detections.iter().map(|d| d.bbox).collect();
        let update = self.tracker.update(now, &boxes);

        for track in &update.dropped {
            if let Some(mut slot) = self.slots.remove(track) {
                slot.cancel();
            }
            events.push(SessionEvent::Lost { track: *track });
        }
        if !update.ignored.is_empty() {
            tracing::debug!(ignored = update.ignored.len(), "face cap reached; detections ignored");
        }

        for (di, track) in update.assignments {
            let slot = self.slots.entry(track).or_insert_with(FaceSlot::new);
            let policy = self.config.policy;
            let plan = self.config.sampling;

            if policy.should_query(&slot.status, now) {
                slot.status = TrackStatus::Sampling;
                slot.samples.clear();
                slot.last_sample_at = None;
            }

            if slot.status != TrackStatus::Sampling {
                continue;
            }

            let Some(descriptor) = detections[di].descriptor.as_ref() else {
                continue;
            };
            let due = slot
                .last_sample_at
                .map_or(true, |at| now.saturating_duration_since(at) >= plan.interval);
            if due {
                slot.samples.push(descriptor.clone());
                slot.last_sample_at = Some(now);
            }

            if slot.samples.len() >= plan.count.max(1) {
                let samples = std::mem::take(&mut slot.samples);
                match sampling::average(&samples) {
                    Ok(query) => {
                        Self::dispatch(
                            &self.client,
                            &self.tx,
                            self.config.request_timeout,
                            track,
                            slot,
                            query,
                            now,
                        );
                    }
                    Err(e) => {
                        tracing::warn!(track, error = %e, "discarding inconsistent samples");
                        slot.status = TrackStatus::Unmatched { last_attempt: now };
                        events.push(SessionEvent::NotIdentified {
                            track,
                            outcome: None,
                            reason: SessionError::from(e).to_string(),
                        });
                    }
                }
            }
        }

        events
    }

    fn dispatch(
        client: &Arc<C>,
        tx: &mpsc::UnboundedSender<Completion>,
        timeout: Duration,
        track: TrackId,
        slot: &mut FaceSlot,
        query: Embedding,
        now: Instant,
    ) {
        slot.cancel();
        slot.generation += 1;
        let generation = slot.generation;
        let client = Arc::clone(client);
        let tx = tx.clone();

        tracing::debug!(track, generation, dims = query.len(), "dispatching identification");
        slot.task = Some(tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, client.identify(query)).await {
                Ok(Ok(outcome)) => Ok(outcome),
                Ok(Err(e)) => Err(SessionError::Client(e.to_string())),
                Err(_) => Err(SessionError::Timeout(timeout)),
            };
            let _ = tx.send(Completion {
                track,
                generation,
                result,
            });
        }));
        slot.status = TrackStatus::InFlight { since: now };
    }

    /// Apply the next already-completed request, if any, without waiting.
    pub fn try_next_event(&mut self) -> Option<SessionEvent> {
        while let Ok(completion) = self.rx.try_recv() {
            if let Some(event) = self.apply(completion) {
                return Some(event);
            }
        }
        None
    }

    /// Wait for the next request to complete. `None` once nothing is in flight.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            if let Some(event) = self.try_next_event() {
                return Some(event);
            }
            if self.in_flight() == 0 {
                return None;
            }
            let completion = self.rx.recv().await?;
            if let Some(event) = self.apply(completion) {
                return Some(event);
            }
        }
    }

    fn apply(&mut self, completion: Completion) -> Option<SessionEvent> {
        let Completion {
            track,
            generation,
            result,
        } = completion;

        let Some(slot) = self.slots.get_mut(&track) else {
            tracing::debug!(track, generation, "discarding result for lost face");
            return None;
        };
        if slot.generation != generation {
            tracing::debug!(
                track,
                generation,
                current = slot.generation,
                "discarding stale result"
            );
            return None;
        }

        slot.task = None;
        let started = match slot.status {
            TrackStatus::InFlight { since } => since,
            _ => Instant::now(),
        };

        match result {
            Ok(outcome) => match outcome.matched().cloned() {
                Some(person) => {
                    slot.status = TrackStatus::Matched;
                    let greet = self.greetings.should_greet(&person.id);
                    tracing::info!(track, person = %person.full_name, greet, "face identified");
                    Some(SessionEvent::Identified {
                        track,
                        person,
                        outcome,
                        greet,
                    })
                }
                None => {
                    slot.status = TrackStatus::Unmatched {
                        last_attempt: started,
                    };
                    let reason = outcome.message.clone();
                    Some(SessionEvent::NotIdentified {
                        track,
                        outcome: Some(outcome),
                        reason,
                    })
                }
            },
            Err(e) => {
                tracing::warn!(track, error = %e, "identification attempt failed");
                slot.status = TrackStatus::Unmatched {
                    last_attempt: started,
                };
                Some(SessionEvent::NotIdentified {
                    track,
                    outcome: None,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// End the session: cancel every request and forget faces and greetings.
    pub fn end(&mut self) {
        for slot in self.slots.values_mut() {
            slot.cancel();
        }
        self.slots.clear();
        self.tracker.clear();
        self.greetings.clear();
        while self.rx.try_recv().is_ok() {}
    }
}

impl<C: IdentityClient> Drop for FaceSession<C> {
    fn drop(&mut self) {
        for slot in self.slots.values_mut() {
            slot.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MatchCandidate;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedClient {
        responses: Mutex<VecDeque<(Duration, Result<MatchOutcome, String>)>>,
        queries: Mutex<Vec<Embedding>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<(Duration, Result<MatchOutcome, String>)>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                queries: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.queries.lock().unwrap().len()
        }
    }

    impl IdentityClient for ScriptedClient {
        type Error = String;

        fn identify(
            &self,
            query: Embedding,
        ) -> impl Future<Output = Result<MatchOutcome, String>> + Send {
            self.queries.lock().unwrap().push(query);
            let next = self.responses.lock().unwrap().pop_front();
            async move {
                let (delay, result) = next.unwrap_or((Duration::ZERO, Ok(miss())));
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                result
            }
        }
    }

    fn hit(id: &str, name: &str) -> MatchOutcome {
        let candidate = MatchCandidate {
            person: PersonProfile {
                id: id.into(),
                full_name: name.into(),
                ..Default::default()
            },
            distance: 0.1,
        };
        MatchOutcome {
            found: true,
            best: Some(candidate.clone()),
            confidence: Some(crate::types::Confidence::High),
            runner_ups: vec![candidate],
            threshold: 0.6,
            skipped: 0,
            message: format!("Match found: {name}"),
        }
    }

    fn miss() -> MatchOutcome {
        MatchOutcome::not_found(0.6, "No known people available for matching")
    }

    fn single_sample_config() -> SessionConfig {
        SessionConfig {
            sampling: SamplingPlan::single(),
            ..Default::default()
        }
    }

    fn face(x: f32, descriptor: &[f32]) -> Detection {
        Detection {
            bbox: BoundingBox { x, y: 0.0, width: 40.0, height: 40.0, confidence: 0.9 },
            descriptor: Some(Embedding::new(descriptor.to_vec())),
        }
    }

    #[tokio::test]
    async fn test_first_detection_queries_and_match_sticks() {
        let client = ScriptedClient::new(vec![(Duration::ZERO, Ok(hit("p1", "Alice")))]);
        let mut session = FaceSession::new(client.clone(), single_sample_config());
        let t0 = Instant::now();

        session.observe(t0, &[face(0.0, &[0.1, 0.2])]);
        assert_eq!(client.calls(), 1);

        match session.next_event().await {
            Some(SessionEvent::Identified { person, greet, .. }) => {
                assert_eq!(person.full_name, "Alice");
                assert!(greet);
            }
            other => panic!("expected identification, got {other:?}"),
        }

        // Same face keeps being tracked: no more requests, however long.
        session.observe(t0 + Duration::from_secs(30), &[face(2.0, &[0.1, 0.2])]);
        assert_eq!(client.calls(), 1);
        assert_eq!(session.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_unmatched_face_retries_after_window() {
        let client = ScriptedClient::new(vec![
            (Duration::ZERO, Ok(miss())),
            (Duration::ZERO, Ok(hit("p1", "Alice"))),
        ]);
        let mut session = FaceSession::new(client.clone(), single_sample_config());
        let t0 = Instant::now();

        session.observe(t0, &[face(0.0, &[0.1])]);
        assert!(matches!(
            session.next_event().await,
            Some(SessionEvent::NotIdentified { .. })
        ));

        session.observe(t0 + Duration::from_millis(500), &[face(0.0, &[0.1])]);
        session.observe(t0 + Duration::from_millis(1500), &[face(0.0, &[0.1])]);
        assert_eq!(client.calls(), 1);

        session.observe(t0 + Duration::from_secs(2), &[face(0.0, &[0.1])]);
        assert_eq!(client.calls(), 2);
        assert!(matches!(
            session.next_event().await,
            Some(SessionEvent::Identified { .. })
        ));
    }

    #[tokio::test]
    async fn test_completed_result_applied_by_late_frame() {
        let client = ScriptedClient::new(vec![(Duration::ZERO, Ok(hit("p1", "Alice")))]);
        let mut session = FaceSession::new(client.clone(), single_sample_config());
        let t0 = Instant::now();

        session.observe(t0, &[face(0.0, &[0.1])]);
        // Let the request finish without polling the session.
        tokio::time::sleep(Duration::from_millis(10)).await;

        // The next frame lands well past the retry window.
        let events = session.observe(t0 + Duration::from_secs(3), &[face(0.0, &[0.1])]);
        match events.as_slice() {
            [SessionEvent::Identified { person, greet, .. }] => {
                assert_eq!(person.full_name, "Alice");
                assert!(*greet);
            }
            other => panic!("expected identification, got {other:?}"),
        }
        assert_eq!(client.calls(), 1);
        assert!(session.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_completed_result_applied_before_face_leaves() {
        let client = ScriptedClient::new(vec![(Duration::ZERO, Ok(hit("p1", "Alice")))]);
        let mut session = FaceSession::new(client, single_sample_config());
        let t0 = Instant::now();

        session.observe(t0, &[face(0.0, &[0.1])]);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let events = session.observe(t0 + Duration::from_millis(250), &[]);
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::Identified { .. }, SessionEvent::Lost { .. }]
        ));
        assert_eq!(session.greetings().len(), 1);
    }

    #[tokio::test]
    async fn test_slow_backend_within_timeout_identifies() {
        let client = ScriptedClient::new(vec![(Duration::from_millis(60), Ok(hit("p1", "Alice")))]);
        let config = SessionConfig {
            policy: ReidentifyPolicy::new(Duration::from_millis(20)),
            request_timeout: Duration::from_secs(1),
            ..single_sample_config()
        };
        let mut session = FaceSession::new(client.clone(), config);

        let mut events = Vec::new();
        for _ in 0..30 {
            events.extend(session.observe(Instant::now(), &[face(0.0, &[0.1])]));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        while let Some(event) = session.next_event().await {
            events.push(event);
        }

        assert_eq!(client.calls(), 1);
        let identified = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::Identified { .. }))
            .count();
        assert_eq!(identified, 1);
    }

    #[tokio::test]
    async fn test_lost_face_cancels_request() {
        let client = ScriptedClient::new(vec![(Duration::from_millis(50), Ok(hit("p1", "Alice")))]);
        let mut session = FaceSession::new(client.clone(), single_sample_config());
        let t0 = Instant::now();

        session.observe(t0, &[face(0.0, &[0.1])]);
        let events = session.observe(t0 + Duration::from_millis(100), &[]);
        assert!(matches!(events.as_slice(), [SessionEvent::Lost { .. }]));
        assert_eq!(session.tracked(), 0);
        assert!(session.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_timeout_is_a_failed_attempt() {
        let client = ScriptedClient::new(vec![(Duration::from_millis(200), Ok(hit("p1", "Alice")))]);
        let config = SessionConfig {
            request_timeout: Duration::from_millis(20),
            ..single_sample_config()
        };
        let mut session = FaceSession::new(client, config);
        let t0 = Instant::now();

        session.observe(t0, &[face(0.0, &[0.1])]);
        let track = session.tracker.tracks()[0].id;
        match session.next_event().await {
            Some(SessionEvent::NotIdentified { reason, outcome, .. }) => {
                assert!(reason.contains("timed out"));
                assert!(outcome.is_none());
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(
            session.status(track),
            Some(TrackStatus::Unmatched { last_attempt: t0 })
        );
    }

    #[tokio::test]
    async fn test_samples_spaced_and_averaged() {
        let client = ScriptedClient::new(vec![(Duration::ZERO, Ok(miss()))]);
        let config = SessionConfig {
            sampling: SamplingPlan {
                count: 3,
                interval: Duration::from_millis(150),
            },
            ..Default::default()
        };
        let mut session = FaceSession::new(client.clone(), config);
        let t0 = Instant::now();

        session.observe(t0, &[face(0.0, &[0.0, 3.0])]);
        session.observe(t0 + Duration::from_millis(50), &[face(0.0, &[100.0, 100.0])]);
        session.observe(t0 + Duration::from_millis(150), &[face(0.0, &[3.0, 6.0])]);
        assert_eq!(client.calls(), 0);
        session.observe(t0 + Duration::from_millis(300), &[face(0.0, &[6.0, 0.0])]);
        assert_eq!(client.calls(), 1);

        let queries = client.queries.lock().unwrap().clone();
        assert_eq!(queries[0], Embedding::new(vec![3.0, 3.0]));
    }

    #[tokio::test]
    async fn test_mixed_sample_lengths_fail_without_request() {
        let client = ScriptedClient::new(vec![]);
        let config = SessionConfig {
            sampling: SamplingPlan {
                count: 2,
                interval: Duration::ZERO,
            },
            ..Default::default()
        };
        let mut session = FaceSession::new(client.clone(), config);
        let t0 = Instant::now();

        session.observe(t0, &[face(0.0, &[0.0, 1.0])]);
        let events = session.observe(t0, &[face(0.0, &[0.0])]);
        assert!(matches!(events.as_slice(), [SessionEvent::NotIdentified { .. }]));
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_faces_are_independent_and_greeted_once() {
        let client = ScriptedClient::new(vec![
            (Duration::ZERO, Ok(hit("p1", "Alice"))),
            (Duration::ZERO, Ok(hit("p1", "Alice"))),
        ]);
        let mut session = FaceSession::new(client.clone(), single_sample_config());
        let t0 = Instant::now();

        session.observe(t0, &[face(0.0, &[0.1]), face(400.0, &[0.1])]);
        assert_eq!(client.calls(), 2);
        assert_eq!(session.in_flight(), 2);

        let mut greets = Vec::new();
        while let Some(event) = session.next_event().await {
            if let SessionEvent::Identified { greet, .. } = event {
                greets.push(greet);
            }
        }
        greets.sort();
        assert_eq!(greets, vec![false, true]);
    }

    #[tokio::test]
    async fn test_end_resets_everything() {
        let client = ScriptedClient::new(vec![(Duration::from_millis(50), Ok(hit("p1", "Alice")))]);
        let mut session = FaceSession::new(client, single_sample_config());
        session.observe(Instant::now(), &[face(0.0, &[0.1])]);
        session.end();
        assert_eq!(session.tracked(), 0);
        assert_eq!(session.in_flight(), 0);
        assert!(session.next_event().await.is_none());
    }
}
