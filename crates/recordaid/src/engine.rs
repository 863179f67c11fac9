use recordai_core::{Embedding, EmbeddingSpace, IdentityMatcher, KnownPerson, MatchError, MatchOutcome};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error("failed to spawn matcher thread: {0}")]
    Spawn(std::io::Error),
    #[error("matcher thread exited")]
    ChannelClosed,
}

/// Messages sent from request handlers to the matcher thread.
enum EngineRequest {
    Identify {
        space: EmbeddingSpace,
        query: Embedding,
        people: Vec<KnownPerson>,
        threshold: f32,
        reply: oneshot::Sender<Result<MatchOutcome, MatchError>>,
    },
}

/// Clone-safe handle to the matcher thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Rank `people` against `query` off the async runtime.
    pub async fn identify(
        &self,
        space: EmbeddingSpace,
        query: Embedding,
        people: Vec<KnownPerson>,
        threshold: f32,
    ) -> Result<MatchOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Identify {
                space,
                query,
                people,
                threshold,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        let outcome = reply_rx.await.map_err(|_| EngineError::ChannelClosed)??;
        Ok(outcome)
    }
}

/// Spawn the matcher on a dedicated OS thread.
///
/// Distance computation over a few thousand 512-d vectors is CPU-bound, so
/// it runs here rather than on a runtime worker. Requests queue up to
/// `queue_depth` before senders wait.
pub fn spawn_engine(queue_depth: usize) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));

    std::thread::Builder::new()
        .name("recordai-matcher".into())
        .spawn(move || {
            tracing::info!("matcher thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Identify {
                        space,
                        query,
                        people,
                        threshold,
                        reply,
                    } => {
                        let started = std::time::Instant::now();
                        let result = IdentityMatcher::new(space).identify(&query, &people, threshold);
                        tracing::debug!(
                            space = %space,
                            candidates = people.len(),
                            elapsed_us = started.elapsed().as_micros() as u64,
                            "matcher: ranked candidates"
                        );
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("matcher thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
