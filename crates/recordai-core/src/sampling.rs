//! Multi-sample embedding averaging.
//!
//! A single frame's embedding is noisy, so several samples taken a short
//! interval apart are averaged element-wise before matching.

use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SAMPLE_COUNT: usize = 3;
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(150);

#[derive(Error, Debug, PartialEq)]
pub enum SamplingError {
    #[error("no samples to average")]
    Empty,
    #[error("sample {index} has {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
}

/// Element-wise mean of `samples`.
///
/// All samples must share one length. A single sample is returned as is.
pub fn average(samples: &[Embedding]) -> Result<Embedding, SamplingError> {
    let (first, rest) = samples.split_first().ok_or(SamplingError::Empty)?;
    if rest.is_empty() {
        return Ok(first.clone());
    }

    let expected = first.len();
    let mut sums: Vec<f64> = first.values.iter().map(|&v| v as f64).collect();

    for (i, sample) in rest.iter().enumerate() {
        if sample.len() != expected {
            return Err(SamplingError::DimensionMismatch {
                index: i + 1,
                expected,
                actual: sample.len(),
            });
        }
        for (sum, v) in sums.iter_mut().zip(sample.values.iter()) {
            *sum += *v as f64;
        }
    }

    let n = samples.len() as f64;
    Ok(Embedding::new(sums.into_iter().map(|s| (s / n) as f32).collect()))
}

/// How many samples to take per identification attempt and how far apart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingPlan {
    pub count: usize,
    #[serde(with = "millis")]
    pub interval: Duration,
}

impl SamplingPlan {
    pub fn single() -> Self {
        Self {
            count: 1,
            interval: Duration::ZERO,
        }
    }
}

impl Default for SamplingPlan {
    fn default() -> Self {
        Self {
            count: DEFAULT_SAMPLE_COUNT,
            interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
