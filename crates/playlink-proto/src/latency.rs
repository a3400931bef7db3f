//! Per-action latency traces.
//!
//! A trace is started once per logical user action (one key press, one
//! aggregated mouse tick) and every hop that touches the message appends a
//! `(stage, time)` sample. Samples are append-only and never go backwards in
//! time, even if the wall clock does.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Stage recorded by the client right before a message is encoded.
pub const STAGE_CLIENT_SEND: &str = "client_send";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStamp {
    pub stage: String,
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyTrace {
    pub sequence_id: String,
    timestamps: Vec<StageStamp>,
}

impl LatencyTrace {
    /// Starts a trace with a freshly generated sequence id.
    pub fn start(prefix: &str) -> Self {
        Self::with_sequence_id(format!("{prefix}-{}", Uuid::new_v4().simple()))
    }

    pub fn with_sequence_id(sequence_id: impl Into<String>) -> Self {
        Self {
            sequence_id: sequence_id.into(),
            timestamps: Vec::new(),
        }
    }

    pub(crate) fn from_parts(sequence_id: String, timestamps: Vec<StageStamp>) -> Self {
        Self {
            sequence_id,
            timestamps,
        }
    }

    pub fn add_timestamp(&mut self, stage: &str) {
        self.add_timestamp_at(stage, OffsetDateTime::now_utc());
    }

    /// Appends a sample, clamped to the previous sample so the trace stays
    /// non-decreasing.
    pub fn add_timestamp_at(&mut self, stage: &str, time: OffsetDateTime) {
        let time = match self.timestamps.last() {
            Some(last) if last.time > time => last.time,
            _ => time,
        };
        self.timestamps.push(StageStamp {
            stage: stage.to_string(),
            time,
        });
    }

    pub fn timestamps(&self) -> &[StageStamp] {
        &self.timestamps
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Time between the earliest and the latest sample.
    pub fn total_latency(&self) -> Duration {
        if self.timestamps.len() < 2 {
            return Duration::ZERO;
        }
        let min = self.timestamps.iter().map(|s| s.time).min();
        let max = self.timestamps.iter().map(|s| s.time).max();
        match (min, max) {
            (Some(min), Some(max)) => (max - min).try_into().unwrap_or(Duration::ZERO),
            _ => Duration::ZERO,
        }
    }

    /// Time between the last occurrences of two stages, if both were recorded.
    pub fn stage_latency(&self, start: &str, end: &str) -> Option<Duration> {
        let find = |stage: &str| {
            self.timestamps
                .iter()
                .rev()
                .find(|s| s.stage == stage)
                .map(|s| s.time)
        };
        let (start, end) = (find(start)?, find(end)?);
        (end - start).try_into().ok()
    }

    /// Consecutive stage pairs whose gap exceeds `threshold`, as `"a -> b"`.
    pub fn pain_points(&self, threshold: Duration) -> Vec<String> {
        self.timestamps
            .windows(2)
            .filter(|pair| {
                let gap: Duration = (pair[1].time - pair[0].time)
                    .try_into()
                    .unwrap_or(Duration::ZERO);
                gap > threshold
            })
            .map(|pair| format!("{} -> {}", pair[0].stage, pair[1].stage))
            .collect()
    }
}
