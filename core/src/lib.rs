#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Core contracts shared across the Crowd Field engine.
//!
//! This crate defines the data model and the message surface that connects
//! hosts to the frame engine and its pure systems. Hosts submit [`Command`]
//! values carrying already-anonymized tiles and trajectory predictions. The
//! engine executes them via its `apply` entry point and broadcasts [`Event`]
//! values describing what changed. Systems consume immutable inputs
//! and write their results into caller-provided buffers.

use std::{borrow::Borrow, fmt, time::Duration};

use glam::Vec2;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Smallest cohort that may ever be turned into draw data.
pub const K_ANONYMITY_MIN: u32 = 5;

/// Maximum number of history samples retained per tile.
pub const HISTORY_CAPACITY: usize = 12;

/// Maximum number of trail points retained per tile.
pub const TRAIL_CAPACITY: usize = 24;

/// Latitude bound of the Web Mercator projection in degrees.
pub const MAX_MERCATOR_LATITUDE: f64 = 85.051_128_78;

/// Stable identifier of anything that may own a pooled primitive.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Creates a new identifier from the provided value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrows the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for EntityId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Geographic coordinate expressed in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Longitude in degrees within `-180.0..=180.0`.
    pub lng: f64,
    /// Latitude in degrees within the Web Mercator bounds.
    pub lat: f64,
}

impl GeoPoint {
    /// Creates a new coordinate.
    #[must_use]
    pub const fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    /// Reports whether the coordinate is finite and lies within projectable bounds.
    #[must_use]
    pub fn is_projectable(&self) -> bool {
        self.lng.is_finite()
            && self.lat.is_finite()
            && (-180.0..=180.0).contains(&self.lng)
            && (-MAX_MERCATOR_LATITUDE..=MAX_MERCATOR_LATITUDE).contains(&self.lat)
    }
}

/// Aggregate mood of a tile as valence, arousal and dominance components.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Mood {
    /// Pleasantness component within `-1.0..=1.0`.
    pub valence: f32,
    /// Energy component within `-1.0..=1.0`.
    pub arousal: f32,
    /// Control component within `-1.0..=1.0`.
    pub dominance: f32,
}

impl Mood {
    /// Creates a new mood triple.
    #[must_use]
    pub const fn new(valence: f32, arousal: f32, dominance: f32) -> Self {
        Self {
            valence,
            arousal,
            dominance,
        }
    }
}

/// Aggregate crowd velocity of a tile.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    /// Eastward component in metres per second.
    pub vx: f32,
    /// Northward component in metres per second.
    pub vy: f32,
    /// Speed in metres per second.
    pub magnitude: f32,
    /// Heading in radians, counter-clockwise from east.
    pub heading: f32,
    /// Producer confidence within `0.0..=1.0`.
    pub confidence: f32,
}

/// Dominant way the crowd in a tile is moving.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementMode {
    /// The crowd is not going anywhere.
    #[default]
    Stationary,
    /// The crowd moves on foot.
    Walking,
    /// The crowd moves by bicycle.
    Cycling,
    /// The crowd moves by car.
    Driving,
    /// The crowd rides public transport.
    Transit,
}

impl MovementMode {
    /// Parses the lowercase wire name of a movement mode.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "stationary" => Some(Self::Stationary),
            "walking" => Some(Self::Walking),
            "cycling" => Some(Self::Cycling),
            "driving" => Some(Self::Driving),
            "transit" => Some(Self::Transit),
            _ => None,
        }
    }

    /// Lowercase wire name of the movement mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stationary => "stationary",
            Self::Walking => "walking",
            Self::Cycling => "cycling",
            Self::Driving => "driving",
            Self::Transit => "transit",
        }
    }
}

/// Crowd count observed for a tile at a past refresh.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySample {
    /// Producer timestamp in milliseconds.
    pub ts_ms: u64,
    /// Crowd count observed at that time.
    pub crowd_count: u32,
}

/// Validated, anonymized crowd-density tile.
///
/// Tiles are read-only once validated. The absence of a tile means there is no
/// signal for its cell, never that the cell is empty.
#[derive(Clone, Debug, PartialEq)]
pub struct Tile {
    /// Identifier of the spatial cell covered by the tile.
    pub cell: EntityId,
    /// Centroid of the cell.
    pub centroid: GeoPoint,
    /// Number of people represented, never below [`K_ANONYMITY_MIN`].
    pub crowd_count: u32,
    /// Average mood of the crowd.
    pub avg_mood: Mood,
    /// Aggregate velocity, absent when the producer supplied none.
    pub velocity: Option<Velocity>,
    /// Dominant movement mode.
    pub movement_mode: MovementMode,
    /// Momentum within `0.0..=1.0`.
    pub momentum: f32,
    /// Cohesion within `0.0..=1.0`.
    pub cohesion: f32,
    /// Afterglow intensity within `0.0..=1.0`.
    pub afterglow_intensity: f32,
    /// Most recent crowd counts, oldest first, bounded by [`HISTORY_CAPACITY`].
    pub history: Vec<HistorySample>,
    /// Most recent trail points, oldest first, bounded by [`TRAIL_CAPACITY`].
    pub trail: Vec<GeoPoint>,
}

impl Tile {
    /// Returns the velocity when the tile carries a usable movement signal.
    ///
    /// Stationary tiles and tiles without velocity degrade to `None`.
    #[must_use]
    pub fn moving_velocity(&self) -> Option<&Velocity> {
        if self.movement_mode == MovementMode::Stationary {
            return None;
        }
        self.velocity.as_ref()
    }
}

/// Unvalidated velocity record as delivered by a producer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VelocityRecord {
    /// Eastward component.
    pub vx: Option<f64>,
    /// Northward component.
    pub vy: Option<f64>,
    /// Speed; derived from the components when absent.
    pub magnitude: Option<f64>,
    /// Heading in radians; derived from the components when absent.
    pub heading: Option<f64>,
    /// Producer confidence.
    pub confidence: Option<f64>,
}

/// Unvalidated tile record as delivered by a producer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileRecord {
    /// Cell identifier.
    pub cell: Option<String>,
    /// Centroid as `[lng, lat]`.
    pub centroid: Option<[f64; 2]>,
    /// Crowd count.
    pub crowd_count: Option<i64>,
    /// Average mood as `[valence, arousal, dominance]`.
    pub avg_mood: Option<Vec<f64>>,
    /// Aggregate velocity.
    pub velocity: Option<VelocityRecord>,
    /// Lowercase movement mode name.
    pub movement_mode: Option<String>,
    /// Momentum.
    pub momentum: Option<f64>,
    /// Cohesion.
    pub cohesion: Option<f64>,
    /// Afterglow intensity.
    pub afterglow_intensity: Option<f64>,
    /// Crowd count history, oldest first.
    pub history: Option<Vec<HistorySample>>,
    /// Trail points as `[lng, lat]`, oldest first.
    pub trail: Option<Vec<[f64; 2]>>,
}

/// Reasons a single tile record is rejected.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum TileErrorKind {
    /// A required field was not supplied.
    #[error("missing required field `{field}`")]
    MissingField {
        /// Name of the missing field.
        field: &'static str,
    },
    /// A numeric field was NaN or infinite.
    #[error("field `{field}` is not a finite number")]
    NonFinite {
        /// Name of the offending field.
        field: &'static str,
    },
    /// A numeric field lies outside its permitted range.
    #[error("field `{field}` is out of range (received {value})")]
    OutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// Value that failed validation.
        value: f64,
    },
    /// The movement mode name is not recognised.
    #[error("unknown movement mode `{value}`")]
    UnknownMovementMode {
        /// Name supplied by the producer.
        value: String,
    },
    /// The tile represents fewer people than the anonymity minimum.
    #[error("crowd count {count} is below the anonymity minimum of {minimum}")]
    BelowAnonymityMinimum {
        /// Crowd count supplied by the producer.
        count: i64,
        /// Minimum that applies.
        minimum: u32,
    },
    /// Another record in the same batch already claimed the cell.
    #[error("duplicate cell within batch")]
    DuplicateCell,
    /// The record could not be decoded at all.
    #[error("malformed record: {message}")]
    Malformed {
        /// Decoder message.
        message: String,
    },
}

/// Rejection of a single record within a tile batch.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("tile record #{index} ({}) rejected: {kind}", .cell.as_deref().unwrap_or("unknown cell"))]
pub struct TileError {
    /// Position of the record within its batch.
    pub index: usize,
    /// Cell identifier, when the record carried one.
    pub cell: Option<String>,
    /// Reason for the rejection.
    pub kind: TileErrorKind,
}

impl TileError {
    /// Creates a new record rejection.
    #[must_use]
    pub fn new(index: usize, cell: Option<String>, kind: TileErrorKind) -> Self {
        Self { index, cell, kind }
    }
}

/// Predicted meeting of independent trajectories, expressed in screen space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConvergencePrediction {
    /// Producer identifier of the prediction.
    pub id: String,
    /// Predicted meeting point in screen pixels.
    pub meeting_point: Vec2,
    /// Time until the meeting in milliseconds.
    pub eta_ms: u64,
    /// Producer confidence within `0.0..=1.0`.
    pub confidence: f32,
    /// Number of people taking part in the predicted meeting.
    pub participants: u32,
}

impl ConvergencePrediction {
    /// Creates a new prediction.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        meeting_point: Vec2,
        eta_ms: u64,
        confidence: f32,
        participants: u32,
    ) -> Self {
        Self {
            id: id.into(),
            meeting_point,
            eta_ms,
            confidence,
            participants,
        }
    }
}

/// Spatial bucket coordinate used to group convergence predictions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketKey {
    /// Bucket column.
    pub column: i64,
    /// Bucket row.
    pub row: i64,
}

impl BucketKey {
    /// Creates a new bucket key.
    #[must_use]
    pub const fn new(column: i64, row: i64) -> Self {
        Self { column, row }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.column, self.row)
    }
}

/// Spatial cluster of convergence predictions.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CascadeHotspot {
    /// Identifier derived from the bucket, stable while the cluster persists.
    pub id: EntityId,
    /// Bucket the hotspot was derived from.
    pub bucket: BucketKey,
    /// Mean meeting point of the members in screen pixels.
    pub centroid: Vec2,
    /// Strength within `0.0..=1.0`.
    pub weight: f32,
    /// Number of predictions in the bucket.
    pub members: u32,
    /// Total participants across the member predictions.
    pub participants: u32,
    /// Mean time until the meeting in milliseconds.
    pub mean_eta_ms: u64,
    /// Mean producer confidence of the members.
    pub mean_confidence: f32,
}

/// Lifecycle phase of a storm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StormState {
    /// Newly observed and not yet confirmed.
    Forming,
    /// Confirmed and supported.
    Active,
    /// Lost support and fading out.
    Dissipating,
}

/// Emergent, reinforcing spatial event.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Storm {
    /// Stable identifier.
    pub id: EntityId,
    /// Position in screen pixels.
    pub position: Vec2,
    /// Intensity within `0.0..=1.0`.
    pub intensity: f32,
    /// Lifecycle phase.
    pub state: StormState,
    /// Engine clock in milliseconds when the storm was created.
    pub born_ms: u64,
    /// Lifetime in milliseconds after which the storm is removed.
    pub ttl_ms: u64,
    /// Milliseconds since the storm was last reinforced.
    pub last_support_ms: u64,
    /// Size of the cohort backing the storm.
    pub cohort: u32,
}

/// Observation that creates or reinforces a storm.
#[derive(Clone, Debug, PartialEq)]
pub struct StormInput {
    /// Identifier of the storm being reinforced.
    pub id: EntityId,
    /// Observed position in screen pixels.
    pub position: Vec2,
    /// Observed intensity within `0.0..=1.0`.
    pub intensity: f32,
    /// Size of the observed cohort.
    pub cohort: u32,
}

/// Reasons a storm leaves the machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StormRemoval {
    /// A weak forming storm never received support.
    Stillborn,
    /// A dissipating storm faded below the floor.
    Faded,
    /// The storm outlived its time to live.
    Expired,
}

/// Lifecycle transitions reported by the storm machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StormEvent {
    /// A storm was created in the forming state.
    Formed {
        /// Identifier of the storm.
        id: EntityId,
    },
    /// A storm became active.
    Activated {
        /// Identifier of the storm.
        id: EntityId,
    },
    /// An active storm lost support and started dissipating.
    Dissipating {
        /// Identifier of the storm.
        id: EntityId,
    },
    /// A storm was removed.
    Removed {
        /// Identifier of the storm.
        id: EntityId,
        /// Why the storm was removed.
        reason: StormRemoval,
    },
}

/// Overlay layers drawn by the renderers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayKind {
    /// Per-tile momentum arrows.
    Momentum,
    /// Storm halos.
    Storm,
    /// Convergence hotspots.
    Convergence,
    /// Ripple bursts spawned by new hotspots.
    Ripple,
    /// Aurora bursts spawned by storm activation.
    Aurora,
}

impl OverlayKind {
    /// Every overlay kind in draw order.
    pub const ALL: [Self; 5] = [
        Self::Momentum,
        Self::Storm,
        Self::Convergence,
        Self::Ripple,
        Self::Aurora,
    ];

    /// Stable lowercase name of the overlay.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Momentum => "momentum",
            Self::Storm => "storm",
            Self::Convergence => "convergence",
            Self::Ripple => "ripple",
            Self::Aurora => "aurora",
        }
    }
}

/// Why an overlay dropped all of its draw state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClearReason {
    /// The current zoom is below the overlay's minimum.
    ZoomBelowMinimum,
    /// The engine is shutting down.
    Shutdown,
}

/// RGB colour carried by configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    red: u8,
    green: u8,
    blue: u8,
}

impl Rgb {
    /// Creates a new colour from byte components.
    #[must_use]
    pub const fn from_rgb(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    /// Red component of the colour.
    #[must_use]
    pub const fn red(&self) -> u8 {
        self.red
    }

    /// Green component of the colour.
    #[must_use]
    pub const fn green(&self) -> u8 {
        self.green
    }

    /// Blue component of the colour.
    #[must_use]
    pub const fn blue(&self) -> u8 {
        self.blue
    }
}

/// Visual configuration shared by every renderer attached to a scene.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverlayControls {
    /// Draw every overlay in a single colour.
    pub monochrome: bool,
    /// Colour used while `monochrome` is enabled.
    pub monochrome_token: Rgb,
    /// Use per-overlay colours; when disabled colours are desaturated.
    pub colorize: bool,
    /// Reduce overlay opacity.
    pub dim: bool,
    /// Opacity multiplier applied while `dim` is enabled.
    pub dim_factor: f32,
    /// Draw halo rings around tracked entities.
    pub friend_halo: bool,
    /// Identifier of the viewing user, forwarded to layer managers.
    pub current_user_id: Option<String>,
}

impl Default for OverlayControls {
    fn default() -> Self {
        Self {
            monochrome: false,
            monochrome_token: Rgb::from_rgb(0xe6, 0xe6, 0xe6),
            colorize: true,
            dim: false,
            dim_factor: 0.5,
            friend_halo: false,
            current_user_id: None,
        }
    }
}

impl OverlayControls {
    /// Merges the provided patch into the controls.
    ///
    /// `dim_factor` is clamped to `0.0..=1.0`; non-finite factors are ignored.
    pub fn merge(&mut self, patch: OverlayControlsPatch) {
        if let Some(monochrome) = patch.monochrome {
            self.monochrome = monochrome;
        }
        if let Some(token) = patch.monochrome_token {
            self.monochrome_token = token;
        }
        if let Some(colorize) = patch.colorize {
            self.colorize = colorize;
        }
        if let Some(dim) = patch.dim {
            self.dim = dim;
        }
        if let Some(factor) = patch.dim_factor {
            if factor.is_finite() {
                self.dim_factor = factor.clamp(0.0, 1.0);
            }
        }
        if let Some(friend_halo) = patch.friend_halo {
            self.friend_halo = friend_halo;
        }
        if let Some(user) = patch.current_user_id {
            self.current_user_id = user;
        }
    }
}

/// Partial update of [`OverlayControls`]; absent fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayControlsPatch {
    /// New `monochrome` value.
    pub monochrome: Option<bool>,
    /// New `monochrome_token` value.
    pub monochrome_token: Option<Rgb>,
    /// New `colorize` value.
    pub colorize: Option<bool>,
    /// New `dim` value.
    pub dim: Option<bool>,
    /// New `dim_factor` value.
    pub dim_factor: Option<f32>,
    /// New `friend_halo` value.
    pub friend_halo: Option<bool>,
    /// New `current_user_id`; `Some(None)` clears it.
    ///
    /// An explicit JSON `null` decodes to `Some(None)` and an absent key to
    /// `None`.
    #[serde(
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_user_id: Option<Option<String>>,
}

/// Wraps every present value in `Some`, `null` included.
fn present_or_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// Commands that express everything a host may ask of the engine.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Replaces the current tiles with a freshly delivered batch.
    IngestTiles {
        /// Unvalidated records.
        batch: Vec<TileRecord>,
    },
    /// Replaces the current convergence predictions.
    IngestPredictions {
        /// Predictions for the upcoming frames.
        predictions: Vec<ConvergencePrediction>,
    },
    /// Updates the map zoom used by the visibility gate.
    SetZoom {
        /// Map zoom level.
        zoom: f32,
    },
    /// Merges a patch into the scene's overlay controls.
    SetOverlayControls {
        /// Fields to change.
        patch: OverlayControlsPatch,
    },
    /// Runs a single animation frame.
    Tick {
        /// Wall-clock time elapsed since the previous frame.
        dt: Duration,
    },
    /// Tears down every overlay and releases all primitives.
    Shutdown,
}

/// Events broadcast by the engine after processing commands.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Indicates that the engine clock advanced.
    TimeAdvanced {
        /// Elapsed time.
        dt: Duration,
    },
    /// Reports how many records of a batch were accepted.
    TilesAccepted {
        /// Number of tiles now held by the engine.
        count: usize,
    },
    /// Reports a record that failed validation.
    TileRejected {
        /// Details of the rejection.
        error: TileError,
    },
    /// Reports the hotspots derived during a frame.
    HotspotsDetected {
        /// Number of hotspots.
        count: usize,
    },
    /// Reports a storm lifecycle transition.
    Storm(StormEvent),
    /// Reports that an overlay dropped all of its draw state.
    OverlayCleared {
        /// Overlay that was cleared.
        kind: OverlayKind,
        /// Why it was cleared.
        reason: ClearReason,
    },
    /// Confirms that a frame finished.
    FrameCompleted {
        /// Sequence number of the frame, starting at one.
        frame: u64,
        /// Wall-clock time spent inside the frame.
        spent: Duration,
    },
}
