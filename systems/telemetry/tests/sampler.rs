use std::time::Duration;

use anyhow::anyhow;
use crowd_field_system_telemetry::{
    Config, FrameSample, FrameStatus, TelemetryReport, TelemetrySampler, TelemetrySink,
};

#[derive(Default)]
struct CollectingSink {
    reports: Vec<TelemetryReport>,
}

impl TelemetrySink for CollectingSink {
    fn publish(&mut self, report: &TelemetryReport) -> anyhow::Result<()> {
        self.reports.push(report.clone());
        Ok(())
    }
}

struct FailingSink;

impl TelemetrySink for FailingSink {
    fn publish(&mut self, _report: &TelemetryReport) -> anyhow::Result<()> {
        Err(anyhow!("uplink offline"))
    }
}

fn sample(ms: f32, status: FrameStatus) -> FrameSample {
    FrameSample {
        event_count: 2,
        status,
        frame_spent_ms: ms,
    }
}

fn always_sampling() -> TelemetrySampler {
    TelemetrySampler::new(Config::new(1.0, Duration::from_secs(60), 1_024, 7))
}

#[test]
fn flushes_at_most_once_per_interval() {
    let mut sampler = always_sampling();
    assert!(sampler.is_enabled(), "tests run with debug assertions");
    let mut sink = CollectingSink::default();

    for index in 0..20 {
        assert!(sampler.record(sample(index as f32, FrameStatus::Rendering)));
    }
    assert!(sampler.maybe_flush(Duration::from_secs(59), &mut sink).is_none());

    let report = sampler
        .maybe_flush(Duration::from_secs(60), &mut sink)
        .expect("interval elapsed");
    assert_eq!(report.samples, 20);
    assert_eq!(sampler.pending(), 0, "flush clears the buffer");

    let _ = sampler.record(sample(1.0, FrameStatus::Idle));
    assert!(sampler.maybe_flush(Duration::from_secs(90), &mut sink).is_none());
    assert!(sampler.maybe_flush(Duration::from_secs(120), &mut sink).is_some());
    assert_eq!(sink.reports.len(), 2);
}

#[test]
fn report_carries_percentiles_and_status_distribution() {
    let mut sampler = always_sampling();
    let mut sink = CollectingSink::default();

    for ms in 1..=100 {
        let status = if ms % 4 == 0 {
            FrameStatus::Gated
        } else {
            FrameStatus::Rendering
        };
        let _ = sampler.record(sample(ms as f32, status));
    }

    let report = sampler
        .maybe_flush(Duration::from_secs(61), &mut sink)
        .expect("flush due");
    assert_eq!(report.p50_ms, 50.0);
    assert_eq!(report.p95_ms, 95.0);
    assert_eq!(report.mean_event_count, 2.0);
    assert_eq!(report.statuses.get(&FrameStatus::Gated), Some(&25));
    assert_eq!(report.statuses.get(&FrameStatus::Rendering), Some(&75));
    assert_eq!(report.statuses.get(&FrameStatus::Idle), None);
}

#[test]
fn sink_failures_are_swallowed() {
    let mut sampler = always_sampling();
    let _ = sampler.record(sample(3.0, FrameStatus::Idle));

    let report = sampler.maybe_flush(Duration::from_secs(60), &mut FailingSink);

    assert!(report.is_some());
    assert_eq!(sampler.pending(), 0);
}

#[test]
fn default_rate_samples_roughly_one_percent() {
    let mut sampler = TelemetrySampler::new(Config::default());
    let kept = (0..20_000)
        .filter(|_| sampler.record(sample(1.0, FrameStatus::Idle)))
        .count();

    assert!((100..=300).contains(&kept), "kept {kept} of 20000 frames");
}

#[test]
fn buffer_is_bounded_by_capacity() {
    let mut sampler = TelemetrySampler::new(Config::new(1.0, Duration::from_secs(60), 4, 1));
    let kept = (0..10)
        .filter(|_| sampler.record(sample(1.0, FrameStatus::Idle)))
        .count();

    assert_eq!(kept, 4);
    assert_eq!(sampler.pending(), 4);
}
