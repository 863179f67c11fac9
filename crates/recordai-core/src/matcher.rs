//! Nearest-neighbour identity matching with confidence tiering.

use crate::types::{Embedding, EmbeddingSpace, KnownPerson, MatchCandidate, MatchOutcome};
use thiserror::Error;

/// Number of lowest-distance candidates reported with every outcome.
pub const RUNNER_UP_COUNT: usize = 3;

#[derive(Error, Debug, PartialEq)]
pub enum MatchError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

/// Scores a query embedding against known people within one embedding space.
///
/// Pure: the caller fetches the candidates and averages samples beforehand.
#[derive(Debug, Clone, Copy)]
pub struct IdentityMatcher {
    space: EmbeddingSpace,
}

impl IdentityMatcher {
    pub fn new(space: EmbeddingSpace) -> Self {
        Self { space }
    }

    pub fn space(&self) -> EmbeddingSpace {
        self.space
    }

    /// Find the closest known person and decide whether it is under `threshold`.
    ///
    /// Candidates whose embedding length differs from the query are skipped
    /// and counted, never scored. An empty or fully-skipped candidate list is
    /// a normal "not found" outcome.
    pub fn identify(
        &self,
        query: &Embedding,
        candidates: &[KnownPerson],
        threshold: f32,
    ) -> Result<MatchOutcome, MatchError> {
        if query.is_empty() {
            return Err(MatchError::InvalidQuery("query embedding is empty".into()));
        }
        if !query.is_finite() {
            return Err(MatchError::InvalidQuery(
                "query embedding contains NaN or infinite values".into(),
            ));
        }

        if candidates.is_empty() {
            return Ok(MatchOutcome::not_found(
                threshold,
                "No known people available for matching",
            ));
        }

        let metric = self.space.metric();
        let mut scored: Vec<MatchCandidate> = Vec::with_capacity(candidates.len());
        let mut skipped = 0usize;

        for person in candidates {
            match metric.distance(query, &person.embedding) {
                Some(distance) if distance.is_finite() => scored.push(MatchCandidate {
                    person: person.profile.clone(),
                    distance,
                }),
                Some(_) => {
                    tracing::warn!(person = %person.profile.id, "non-finite distance; skipping candidate");
                    skipped += 1;
                }
                None => {
                    tracing::warn!(
                        person = %person.profile.id,
                        query_len = query.len(),
                        candidate_len = person.embedding.len(),
                        "embedding length mismatch; skipping candidate"
                    );
                    skipped += 1;
                }
            }
        }

        // Stable: equal distances keep input order.
        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));

        let Some(best) = scored.first().cloned() else {
            let mut outcome = MatchOutcome::not_found(
                threshold,
                format!(
                    "No profiles with comparable embeddings (query has {} dimensions)",
                    query.len()
                ),
            );
            outcome.skipped = skipped;
            return Ok(outcome);
        };

        let found = best.distance < threshold;
        let confidence = self.space.confidence(best.distance);
        let message = MatchOutcome::scored_message(&best, found);

        tracing::debug!(
            space = %self.space,
            scored = scored.len(),
            skipped,
            best = %best.person.full_name,
            distance = best.distance,
            found,
            "identity match scored"
        );

        scored.truncate(RUNNER_UP_COUNT);

        Ok(MatchOutcome {
            found,
            best: Some(best),
            confidence: Some(confidence),
            runner_ups: scored,
            threshold,
            skipped,
            message,
        })
    }
}
