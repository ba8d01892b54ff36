//! Latency and token metrics.
//!
//! A [`MetricsTimer`] is a short-lived value owned by a single timed
//! operation. It is started, stopped, fed token counts and then turned into
//! an immutable [`Metrics`] snapshot. Snapshots from several steps combine
//! with [`Metrics::merge`].

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Metrics for one timed operation, or the merge of several.
///
/// Fields are optional: a step that was never timed has no latency, and a
/// step whose backend reported no usage has no token counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Wall-clock latency in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,

    /// Prompt tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,

    /// Generated tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,

    /// input + output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,

    /// Output tokens per second of latency, rounded to 2 decimals
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_second: Option<f64>,
}

impl Metrics {
    /// Build a snapshot from raw values, deriving `total_tokens` and
    /// `tokens_per_second`.
    pub fn from_parts(latency_ms: u64, input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            latency_ms: Some(latency_ms),
            input_tokens: Some(input_tokens),
            output_tokens: Some(output_tokens),
            total_tokens: Some(input_tokens + output_tokens),
            tokens_per_second: tokens_per_second(latency_ms, output_tokens),
        }
    }

    /// Merge several snapshots.
    ///
    /// Latency and token counts are summed (absent fields count as zero).
    /// `tokens_per_second` is recomputed from the merged totals, never
    /// summed. An empty input yields `None` so that "no metrics" stays
    /// distinct from "zero metrics".
    pub fn merge<'a, I>(metrics: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Metrics>,
    {
        let mut iter = metrics.into_iter().peekable();
        iter.peek()?;

        let (mut latency, mut input, mut output, mut total) = (0u64, 0u64, 0u64, 0u64);
        for m in iter {
            latency += m.latency_ms.unwrap_or(0);
            input += m.input_tokens.unwrap_or(0);
            output += m.output_tokens.unwrap_or(0);
            total += m
                .total_tokens
                .unwrap_or_else(|| m.input_tokens.unwrap_or(0) + m.output_tokens.unwrap_or(0));
        }

        Some(Self {
            latency_ms: Some(latency),
            input_tokens: Some(input),
            output_tokens: Some(output),
            total_tokens: Some(total),
            tokens_per_second: tokens_per_second(latency, output),
        })
    }

    /// True when no field is populated.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Derived throughput, only when both inputs are positive.
fn tokens_per_second(latency_ms: u64, output_tokens: u64) -> Option<f64> {
    if latency_ms == 0 || output_tokens == 0 {
        return None;
    }
    let tps = output_tokens as f64 / (latency_ms as f64 / 1000.0);
    Some((tps * 100.0).round() / 100.0)
}

/// Per-operation collector.
///
/// Tracks one in-flight interval at a time. Use a fresh timer (or
/// [`reset`](Self::reset)) for each logically distinct operation.
#[derive(Debug, Clone, Default)]
pub struct MetricsTimer {
    started: Option<Instant>,
    current: Metrics,
}

impl MetricsTimer {
    /// Create an idle timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a timer that is already running.
    pub fn started() -> Self {
        let mut timer = Self::new();
        timer.start();
        timer
    }

    /// Begin timing. Restarts the interval if one is already running.
    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Stop timing and return the elapsed milliseconds.
    ///
    /// Without a prior `start` this is a no-op returning 0.
    pub fn stop(&mut self) -> u64 {
        let Some(started) = self.started.take() else {
            tracing::debug!("MetricsTimer::stop called without start");
            return 0;
        };
        let elapsed = started.elapsed().as_millis() as u64;
        self.current.latency_ms = Some(elapsed);
        self.refresh_throughput();
        elapsed
    }

    /// Record token counts for the current operation.
    pub fn record_tokens(&mut self, input_tokens: u64, output_tokens: u64) {
        self.current.input_tokens = Some(input_tokens);
        self.current.output_tokens = Some(output_tokens);
        self.current.total_tokens = Some(input_tokens + output_tokens);
        self.refresh_throughput();
    }

    /// Snapshot of what has been recorded so far.
    pub fn get(&self) -> Metrics {
        self.current.clone()
    }

    /// Consume the timer and return its snapshot.
    pub fn finish(self) -> Metrics {
        self.current
    }

    /// Forget any running interval and recorded values.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Whether an interval is in flight.
    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    fn refresh_throughput(&mut self) {
        self.current.tokens_per_second = match (self.current.latency_ms, self.current.output_tokens)
        {
            (Some(latency), Some(output)) => tokens_per_second(latency, output),
            _ => None,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn partial(latency_ms: u64, output_tokens: u64) -> Metrics {
        Metrics {
            latency_ms: Some(latency_ms),
            output_tokens: Some(output_tokens),
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_recomputes_throughput() {
        let merged = Metrics::merge(&[partial(100, 50), partial(200, 50)]).unwrap();
        assert_eq!(merged.latency_ms, Some(300));
        assert_eq!(merged.output_tokens, Some(100));
        assert_eq!(merged.tokens_per_second, Some(333.33));
    }

    #[test]
    fn test_merge_empty_is_none() {
        assert!(Metrics::merge(&[]).is_none());
    }

    #[test]
    fn test_merge_sums_totals() {
        let merged = Metrics::merge(&[
            Metrics::from_parts(10, 5, 7),
            Metrics::from_parts(20, 1, 1),
        ])
        .unwrap();
        assert_eq!(merged.input_tokens, Some(6));
        assert_eq!(merged.total_tokens, Some(14));
    }

    #[test]
    fn test_no_throughput_without_latency() {
        let merged = Metrics::merge(&[partial(0, 40)]).unwrap();
        assert_eq!(merged.tokens_per_second, None);
        assert_eq!(Metrics::from_parts(100, 10, 0).tokens_per_second, None);
    }

    #[test]
    fn test_stop_without_start() {
        let mut timer = MetricsTimer::new();
        assert_eq!(timer.stop(), 0);
        assert!(timer.get().latency_ms.is_none());
    }

    #[test]
    fn test_timer_lifecycle() {
        let mut timer = MetricsTimer::started();
        assert!(timer.is_running());
        std::thread::sleep(std::time::Duration::from_millis(5));
        let elapsed = timer.stop();
        assert!(elapsed >= 5);
        assert!(!timer.is_running());

        timer.record_tokens(12, 30);
        let metrics = timer.get();
        assert_eq!(metrics.total_tokens, Some(42));
        assert!(metrics.tokens_per_second.is_some());

        timer.reset();
        assert!(timer.get().is_empty());
    }

    #[test]
    fn test_serialization_skips_absent_fields() {
        let json = serde_json::to_value(partial(5, 1)).unwrap();
        assert_eq!(json, serde_json::json!({"latency_ms": 5, "output_tokens": 1}));
    }

    proptest! {
        #[test]
        fn prop_merge_is_order_independent(
            values in proptest::collection::vec((0u64..10_000, 0u64..5_000, 0u64..5_000), 1..8)
        ) {
            let metrics: Vec<Metrics> = values
                .iter()
                .map(|(l, i, o)| Metrics::from_parts(*l, *i, *o))
                .collect();
            let mut reversed = metrics.clone();
            reversed.reverse();

            let forward = Metrics::merge(&metrics).unwrap();
            let backward = Metrics::merge(&reversed).unwrap();
            prop_assert_eq!(&forward, &backward);

            let latency: u64 = values.iter().map(|(l, _, _)| l).sum();
            prop_assert_eq!(forward.latency_ms, Some(latency));
        }
    }
}
