#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Spatial bucketing of trajectory-convergence predictions into hotspots.
//!
//! The arithmetic lives in standalone functions ([`bucket_key`],
//! [`cascade_weight`], [`detect_hotspots`]) so it can be exercised directly.
//! [`CascadeDetector`] wraps the same steps with buffers that are reused across
//! frames.

use std::collections::HashMap;

use crowd_field_core::{BucketKey, CascadeHotspot, ConvergencePrediction, EntityId};
use glam::Vec2;

/// Default grid spacing in screen pixels.
pub const DEFAULT_MAX_DIST_PX: f32 = 80.0;
/// Default minimum number of predictions a bucket needs to become a hotspot.
pub const DEFAULT_MIN_ACTORS: u32 = 3;
/// Default horizon beyond which predictions are ignored.
pub const DEFAULT_MAX_ETA_MS: u64 = 120_000;
/// Default member count at which a fully confident bucket saturates.
pub const DEFAULT_SATURATION_MEMBERS: f32 = 5.0;

/// Prefix of every hotspot identifier.
pub const HOTSPOT_ID_PREFIX: &str = "CAS_";

/// Tuning parameters of the detector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Config {
    max_dist_px: f32,
    min_actors: u32,
    max_eta_ms: u64,
    saturation_members: f32,
}

impl Config {
    /// Creates a configuration from the provided spacing, member floor and horizon.
    ///
    /// Non-positive or non-finite spacing falls back to [`DEFAULT_MAX_DIST_PX`]
    /// and a zero member floor is raised to one.
    #[must_use]
    pub fn new(max_dist_px: f32, min_actors: u32, max_eta_ms: u64) -> Self {
        let max_dist_px = if max_dist_px.is_finite() && max_dist_px > 0.0 {
            max_dist_px
        } else {
            DEFAULT_MAX_DIST_PX
        };
        Self {
            max_dist_px,
            min_actors: min_actors.max(1),
            max_eta_ms,
            saturation_members: DEFAULT_SATURATION_MEMBERS,
        }
    }

    /// Overrides the member count at which the weight saturates.
    #[must_use]
    pub fn with_saturation_members(mut self, members: f32) -> Self {
        if members.is_finite() && members > 0.0 {
            self.saturation_members = members;
        }
        self
    }

    /// Grid spacing in screen pixels.
    #[must_use]
    pub const fn max_dist_px(&self) -> f32 {
        self.max_dist_px
    }

    /// Minimum number of predictions per hotspot.
    #[must_use]
    pub const fn min_actors(&self) -> u32 {
        self.min_actors
    }

    /// Horizon beyond which predictions are ignored.
    #[must_use]
    pub const fn max_eta_ms(&self) -> u64 {
        self.max_eta_ms
    }

    /// Member count at which a fully confident bucket saturates.
    #[must_use]
    pub const fn saturation_members(&self) -> f32 {
        self.saturation_members
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DIST_PX, DEFAULT_MIN_ACTORS, DEFAULT_MAX_ETA_MS)
    }
}

/// Maps a point onto its grid bucket.
///
/// Identical coordinates always map to the same bucket. Points exactly
/// halfway between two buckets go to the one toward positive infinity, on
/// both sides of the origin.
#[must_use]
pub fn bucket_key(point: Vec2, max_dist_px: f32) -> BucketKey {
    BucketKey::new(
        round_half_up(point.x / max_dist_px),
        round_half_up(point.y / max_dist_px),
    )
}

fn round_half_up(value: f32) -> i64 {
    (value + 0.5).floor() as i64
}

/// Identifier of the hotspot derived from a bucket.
#[must_use]
pub fn hotspot_id(bucket: BucketKey) -> EntityId {
    EntityId::new(format!("{HOTSPOT_ID_PREFIX}{bucket}"))
}

/// Weight of a bucket: `min(1, (members / saturation) * mean_confidence)`.
#[must_use]
pub fn cascade_weight(members: u32, mean_confidence: f32, saturation_members: f32) -> f32 {
    (members as f32 / saturation_members * mean_confidence).clamp(0.0, 1.0)
}

/// Derives hotspots from the provided predictions.
///
/// The output buffer is cleared before it is populated. Hotspots are sorted
/// by bucket.
pub fn detect_hotspots(
    predictions: &[ConvergencePrediction],
    config: &Config,
    out: &mut Vec<CascadeHotspot>,
) {
    let mut buckets = HashMap::new();
    accumulate(predictions, config, &mut buckets);
    emit(&buckets, config, out);
}

/// Hotspot detector that reuses its bucket table between frames.
#[derive(Debug, Default)]
pub struct CascadeDetector {
    config: Config,
    buckets: HashMap<BucketKey, Bucket>,
}

impl CascadeDetector {
    /// Creates a detector using the supplied configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            buckets: HashMap::new(),
        }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Derives this frame's hotspots into `out`, replacing its contents.
    pub fn handle(&mut self, predictions: &[ConvergencePrediction], out: &mut Vec<CascadeHotspot>) {
        self.buckets.clear();
        accumulate(predictions, &self.config, &mut self.buckets);
        emit(&self.buckets, &self.config, out);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Bucket {
    position_sum: Vec2,
    members: u32,
    participants: u32,
    eta_sum_ms: u64,
    confidence_sum: f32,
}

fn accumulate(
    predictions: &[ConvergencePrediction],
    config: &Config,
    buckets: &mut HashMap<BucketKey, Bucket>,
) {
    for prediction in predictions {
        if prediction.eta_ms > config.max_eta_ms {
            continue;
        }
        if !prediction.meeting_point.is_finite() || !prediction.confidence.is_finite() {
            continue;
        }

        let key = bucket_key(prediction.meeting_point, config.max_dist_px);
        let bucket = buckets.entry(key).or_default();
        bucket.position_sum += prediction.meeting_point;
        bucket.members += 1;
        bucket.participants = bucket.participants.saturating_add(prediction.participants);
        bucket.eta_sum_ms = bucket.eta_sum_ms.saturating_add(prediction.eta_ms);
        bucket.confidence_sum += prediction.confidence.clamp(0.0, 1.0);
    }
}

fn emit(buckets: &HashMap<BucketKey, Bucket>, config: &Config, out: &mut Vec<CascadeHotspot>) {
    out.clear();

    for (key, bucket) in buckets {
        if bucket.members < config.min_actors {
            continue;
        }

        let members = bucket.members as f32;
        let mean_confidence = bucket.confidence_sum / members;
        out.push(CascadeHotspot {
            id: hotspot_id(*key),
            bucket: *key,
            centroid: bucket.position_sum / members,
            weight: cascade_weight(bucket.members, mean_confidence, config.saturation_members),
            members: bucket.members,
            participants: bucket.participants,
            mean_eta_ms: bucket.eta_sum_ms / u64::from(bucket.members),
            mean_confidence,
        });
    }

    out.sort_by_key(|hotspot| hotspot.bucket);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_key_rounds_to_nearest_cell() {
        assert_eq!(bucket_key(Vec2::new(100.0, 100.0), 80.0), BucketKey::new(1, 1));
        assert_eq!(bucket_key(Vec2::new(119.0, 121.0), 80.0), BucketKey::new(1, 2));
        assert_eq!(bucket_key(Vec2::new(-50.0, 0.0), 80.0), BucketKey::new(-1, 0));
    }

    #[test]
    fn weight_saturates_at_one() {
        assert!((cascade_weight(3, 0.8, 5.0) - 0.48).abs() < 1e-6);
        assert_eq!(cascade_weight(12, 1.0, 5.0), 1.0);
        assert_eq!(cascade_weight(0, 1.0, 5.0), 0.0);
    }

    #[test]
    fn invalid_spacing_falls_back_to_default() {
        assert_eq!(Config::new(0.0, 3, 10).max_dist_px(), DEFAULT_MAX_DIST_PX);
        assert_eq!(Config::new(f32::NAN, 3, 10).max_dist_px(), DEFAULT_MAX_DIST_PX);
        assert_eq!(Config::new(40.0, 0, 10).min_actors(), 1);
    }

    #[test]
    fn hotspot_ids_embed_the_bucket() {
        assert_eq!(hotspot_id(BucketKey::new(1, -3)).as_str(), "CAS_1:-3");
    }
}
