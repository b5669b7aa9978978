#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Development-only frame telemetry.
//!
//! A small fraction of frames is sampled into a buffer. At most once per
//! flush interval the buffer is summarised into a [`TelemetryReport`], handed
//! to a [`TelemetrySink`], and cleared. Sink failures are logged and
//! swallowed; they never reach the render loop. Builds without debug
//! assertions compile the sampler down to a no-op.

use std::{collections::BTreeMap, time::Duration};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Default fraction of frames that are sampled.
pub const DEFAULT_SAMPLE_RATE: f64 = 0.01;
/// Default minimum time between two flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);
/// Default number of samples buffered between flushes.
pub const DEFAULT_CAPACITY: usize = 512;

/// Sampler configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Config {
    sample_rate: f64,
    flush_interval: Duration,
    capacity: usize,
    seed: u64,
}

impl Config {
    /// Creates a configuration; the rate is clamped to `0.0..=1.0`.
    #[must_use]
    pub fn new(sample_rate: f64, flush_interval: Duration, capacity: usize, seed: u64) -> Self {
        let sample_rate = if sample_rate.is_finite() {
            sample_rate.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            sample_rate,
            flush_interval,
            capacity,
            seed,
        }
    }

    /// Fraction of frames that are sampled.
    #[must_use]
    pub const fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Minimum time between two flushes.
    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        self.flush_interval
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(
            DEFAULT_SAMPLE_RATE,
            DEFAULT_FLUSH_INTERVAL,
            DEFAULT_CAPACITY,
            0x5eed_f1e1_d000_0001,
        )
    }
}

/// Coarse classification of what a frame did.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FrameStatus {
    /// Nothing was drawn.
    Idle,
    /// At least one overlay produced draw data.
    Rendering,
    /// Every overlay was gated off by zoom.
    Gated,
}

impl FrameStatus {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Rendering => "rendering",
            Self::Gated => "gated",
        }
    }
}

/// Measurements of a single frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameSample {
    /// Number of events the frame emitted.
    pub event_count: usize,
    /// Classification of the frame.
    pub status: FrameStatus,
    /// Wall-clock time spent inside the frame in milliseconds.
    pub frame_spent_ms: f32,
}

/// Summary of the samples collected between two flushes.
#[derive(Clone, Debug, PartialEq)]
pub struct TelemetryReport {
    /// Number of samples summarised.
    pub samples: usize,
    /// Median frame time in milliseconds.
    pub p50_ms: f32,
    /// 95th percentile frame time in milliseconds.
    pub p95_ms: f32,
    /// Mean number of events per sampled frame.
    pub mean_event_count: f32,
    /// Number of samples per frame status.
    pub statuses: BTreeMap<FrameStatus, usize>,
}

/// Destination of telemetry reports, typically a fire-and-forget uploader.
pub trait TelemetrySink {
    /// Publishes a report.
    fn publish(&mut self, report: &TelemetryReport) -> anyhow::Result<()>;
}

/// Sink that drops every report.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn publish(&mut self, _report: &TelemetryReport) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Low-rate frame sampler with periodic flush.
#[derive(Debug)]
pub struct TelemetrySampler {
    enabled: bool,
    config: Config,
    rng: ChaCha8Rng,
    buffer: Vec<FrameSample>,
    last_flush: Duration,
}

impl TelemetrySampler {
    /// Creates a sampler that is active only in builds with debug assertions.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_enabled(config, cfg!(debug_assertions))
    }

    /// Creates a sampler that never records anything.
    #[must_use]
    pub fn disabled() -> Self {
        Self::with_enabled(Config::default(), false)
    }

    fn with_enabled(config: Config, enabled: bool) -> Self {
        Self {
            enabled,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            buffer: Vec::new(),
            last_flush: Duration::ZERO,
            config,
        }
    }

    /// Reports whether the sampler records anything.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of buffered samples.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Offers a frame to the sampler; returns whether it was kept.
    pub fn record(&mut self, sample: FrameSample) -> bool {
        if !self.enabled || self.buffer.len() >= self.config.capacity {
            return false;
        }
        if !self.rng.gen_bool(self.config.sample_rate) {
            return false;
        }
        self.buffer.push(sample);
        true
    }

    /// Flushes the buffer into `sink` when the flush interval has elapsed.
    ///
    /// `now` is the host clock. Returns the published report, if any. The
    /// buffer is cleared even when the sink fails.
    pub fn maybe_flush(
        &mut self,
        now: Duration,
        sink: &mut dyn TelemetrySink,
    ) -> Option<TelemetryReport> {
        if !self.enabled {
            return None;
        }
        if now.saturating_sub(self.last_flush) < self.config.flush_interval {
            return None;
        }
        if self.buffer.is_empty() {
            return None;
        }

        self.last_flush = now;
        let report = summarize(&self.buffer);
        self.buffer.clear();

        if let Err(error) = sink.publish(&report) {
            log::warn!("telemetry flush failed: {error:#}");
        }
        Some(report)
    }
}

/// Summarises a non-empty set of samples.
#[must_use]
pub fn summarize(samples: &[FrameSample]) -> TelemetryReport {
    let mut frame_times: Vec<f32> = samples.iter().map(|sample| sample.frame_spent_ms).collect();
    frame_times.sort_by(f32::total_cmp);

    let mut statuses = BTreeMap::new();
    for sample in samples {
        *statuses.entry(sample.status).or_insert(0) += 1;
    }

    let total_events: usize = samples.iter().map(|sample| sample.event_count).sum();
    let mean_event_count = if samples.is_empty() {
        0.0
    } else {
        total_events as f32 / samples.len() as f32
    };

    TelemetryReport {
        samples: samples.len(),
        p50_ms: percentile(&frame_times, 0.50),
        p95_ms: percentile(&frame_times, 0.95),
        mean_event_count,
        statuses,
    }
}

/// Nearest-rank percentile of an ascending slice; zero when empty.
#[must_use]
pub fn percentile(sorted: &[f32], fraction: f32) -> f32 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (fraction.clamp(0.0, 1.0) * sorted.len() as f32).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
