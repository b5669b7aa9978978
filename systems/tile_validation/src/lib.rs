#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Pure validation of inbound crowd-density tile batches.
//!
//! Validation is per record: a malformed record is dropped and reported on its
//! own while the rest of the batch still passes. Optional enrichment that a
//! producer leaves out is filled with the following defaults and nothing else:
//!
//! | Field | Default |
//! |---|---|
//! | `movement_mode` | `stationary` |
//! | `momentum`, `cohesion`, `afterglow_intensity` | `0.0` |
//! | `velocity` | absent (no momentum arrow is drawn) |
//! | `velocity.magnitude`, `velocity.heading` | derived from `vx`/`vy` |
//! | `history`, `trail` | empty |
//!
//! History and trail buffers longer than their capacity keep only the most
//! recent entries.

use std::collections::HashSet;

use crowd_field_core::{
    GeoPoint, Mood, MovementMode, Tile, TileError, TileErrorKind, TileRecord, Velocity,
    VelocityRecord, HISTORY_CAPACITY, K_ANONYMITY_MIN, TRAIL_CAPACITY,
};
use thiserror::Error;

/// Outcome of validating a batch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValidationReport {
    /// Records that passed validation, in batch order.
    pub tiles: Vec<Tile>,
    /// One entry per rejected record, in batch order.
    pub errors: Vec<TileError>,
}

impl ValidationReport {
    /// Reports whether every record passed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Failures that make a whole JSON document unusable.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The document is not JSON.
    #[error("tile batch is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The document is JSON but not an array of records.
    #[error("tile batch must be a JSON array")]
    NotAnArray,
}

/// Validates every record of the batch independently.
#[must_use]
pub fn validate(batch: &[TileRecord]) -> ValidationReport {
    let mut report = ValidationReport::default();
    let mut seen = HashSet::with_capacity(batch.len());

    for (index, record) in batch.iter().enumerate() {
        accept(index, record, &mut seen, &mut report);
    }

    report
}

/// Decodes a JSON array of tile records and validates each element.
///
/// Elements that cannot be decoded as records are rejected individually.
pub fn validate_json(document: &str) -> Result<ValidationReport, BatchError> {
    let value: serde_json::Value = serde_json::from_str(document)?;
    let serde_json::Value::Array(elements) = value else {
        return Err(BatchError::NotAnArray);
    };

    let mut report = ValidationReport::default();
    let mut seen = HashSet::with_capacity(elements.len());

    for (index, element) in elements.into_iter().enumerate() {
        let cell = element
            .get("cell")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned);
        match serde_json::from_value::<TileRecord>(element) {
            Ok(record) => accept(index, &record, &mut seen, &mut report),
            Err(error) => report.errors.push(TileError::new(
                index,
                cell,
                TileErrorKind::Malformed {
                    message: error.to_string(),
                },
            )),
        }
    }

    Ok(report)
}

fn accept(
    index: usize,
    record: &TileRecord,
    seen: &mut HashSet<String>,
    report: &mut ValidationReport,
) {
    match validate_record(index, record) {
        Ok(tile) => {
            if seen.insert(tile.cell.as_str().to_owned()) {
                report.tiles.push(tile);
            } else {
                report.errors.push(TileError::new(
                    index,
                    record.cell.clone(),
                    TileErrorKind::DuplicateCell,
                ));
            }
        }
        Err(error) => report.errors.push(error),
    }
}

/// Validates a single record, applying the documented defaults.
pub fn validate_record(index: usize, record: &TileRecord) -> Result<Tile, TileError> {
    build_tile(record).map_err(|kind| TileError::new(index, record.cell.clone(), kind))
}

fn build_tile(record: &TileRecord) -> Result<Tile, TileErrorKind> {
    let cell = match record.cell.as_deref().map(str::trim) {
        Some(cell) if !cell.is_empty() => cell,
        _ => return Err(TileErrorKind::MissingField { field: "cell" }),
    };

    let centroid = record
        .centroid
        .ok_or(TileErrorKind::MissingField { field: "centroid" })?;
    let centroid = geo_point("centroid", centroid)?;

    let crowd_count = crowd_count(record.crowd_count)?;
    let avg_mood = mood(record.avg_mood.as_deref())?;

    let velocity = record.velocity.as_ref().map(velocity).transpose()?;

    let movement_mode = match record.movement_mode.as_deref() {
        None => MovementMode::default(),
        Some(name) => {
            MovementMode::parse(name).ok_or_else(|| TileErrorKind::UnknownMovementMode {
                value: name.to_owned(),
            })?
        }
    };

    let momentum = unit_interval("momentum", record.momentum)?;
    let cohesion = unit_interval("cohesion", record.cohesion)?;
    let afterglow_intensity = unit_interval("afterglow_intensity", record.afterglow_intensity)?;

    let history = record
        .history
        .as_deref()
        .map(|samples| most_recent(samples, HISTORY_CAPACITY).to_vec())
        .unwrap_or_default();

    let trail = match record.trail.as_deref() {
        None => Vec::new(),
        Some(points) => most_recent(points, TRAIL_CAPACITY)
            .iter()
            .map(|point| geo_point("trail", *point))
            .collect::<Result<Vec<_>, _>>()?,
    };

    Ok(Tile {
        cell: cell.into(),
        centroid,
        crowd_count,
        avg_mood,
        velocity,
        movement_mode,
        momentum,
        cohesion,
        afterglow_intensity,
        history,
        trail,
    })
}

fn most_recent<T>(items: &[T], capacity: usize) -> &[T] {
    &items[items.len().saturating_sub(capacity)..]
}

fn geo_point(field: &'static str, [lng, lat]: [f64; 2]) -> Result<GeoPoint, TileErrorKind> {
    let lng = finite(field, lng)?;
    let lat = finite(field, lat)?;
    let point = GeoPoint::new(lng, lat);
    if !(-180.0..=180.0).contains(&lng) {
        return Err(TileErrorKind::OutOfRange { field, value: lng });
    }
    if !point.is_projectable() {
        return Err(TileErrorKind::OutOfRange { field, value: lat });
    }
    Ok(point)
}

fn crowd_count(count: Option<i64>) -> Result<u32, TileErrorKind> {
    let count = count.ok_or(TileErrorKind::MissingField {
        field: "crowd_count",
    })?;
    if count < i64::from(K_ANONYMITY_MIN) {
        return Err(TileErrorKind::BelowAnonymityMinimum {
            count,
            minimum: K_ANONYMITY_MIN,
        });
    }
    u32::try_from(count).map_err(|_| TileErrorKind::OutOfRange {
        field: "crowd_count",
        value: count as f64,
    })
}

fn mood(components: Option<&[f64]>) -> Result<Mood, TileErrorKind> {
    let components = components.ok_or(TileErrorKind::MissingField { field: "avg_mood" })?;
    let [valence, arousal, dominance] = components else {
        return Err(TileErrorKind::OutOfRange {
            field: "avg_mood",
            value: components.len() as f64,
        });
    };
    Ok(Mood::new(
        signed_unit("avg_mood.valence", *valence)?,
        signed_unit("avg_mood.arousal", *arousal)?,
        signed_unit("avg_mood.dominance", *dominance)?,
    ))
}

fn velocity(record: &VelocityRecord) -> Result<Velocity, TileErrorKind> {
    let vx = required("velocity.vx", record.vx)?;
    let vy = required("velocity.vy", record.vy)?;

    let magnitude = match record.magnitude {
        Some(magnitude) => finite("velocity.magnitude", magnitude)?,
        None => vx.hypot(vy),
    };
    if magnitude < 0.0 {
        return Err(TileErrorKind::OutOfRange {
            field: "velocity.magnitude",
            value: magnitude,
        });
    }

    let heading = match record.heading {
        Some(heading) => finite("velocity.heading", heading)?,
        None => vy.atan2(vx),
    };

    let confidence = required("velocity.confidence", record.confidence)?;
    if !(0.0..=1.0).contains(&confidence) {
        return Err(TileErrorKind::OutOfRange {
            field: "velocity.confidence",
            value: confidence,
        });
    }

    Ok(Velocity {
        vx: vx as f32,
        vy: vy as f32,
        magnitude: magnitude as f32,
        heading: heading as f32,
        confidence: confidence as f32,
    })
}

fn required(field: &'static str, value: Option<f64>) -> Result<f64, TileErrorKind> {
    finite(field, value.ok_or(TileErrorKind::MissingField { field })?)
}

fn finite(field: &'static str, value: f64) -> Result<f64, TileErrorKind> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(TileErrorKind::NonFinite { field })
    }
}

fn unit_interval(field: &'static str, value: Option<f64>) -> Result<f32, TileErrorKind> {
    let Some(value) = value else {
        return Ok(0.0);
    };
    let value = finite(field, value)?;
    if !(0.0..=1.0).contains(&value) {
        return Err(TileErrorKind::OutOfRange { field, value });
    }
    Ok(value as f32)
}

fn signed_unit(field: &'static str, value: f64) -> Result<f32, TileErrorKind> {
    let value = finite(field, value)?;
    if !(-1.0..=1.0).contains(&value) {
        return Err(TileErrorKind::OutOfRange { field, value });
    }
    Ok(value as f32)
}
