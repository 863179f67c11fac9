//! recordaid: identification daemon.
//!
//! Serves `POST /api/match` over three matching backends, reading known
//! people from SQLite or Supabase and ranking them on a dedicated matcher
//! thread.

pub mod api;
pub mod backend;
pub mod config;
pub mod embedder;
pub mod engine;
pub mod external;
pub mod images;

/// Matcher requests allowed to queue before handlers wait.
pub const ENGINE_QUEUE_DEPTH: usize = 64;
