#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Rendering contracts and overlay renderers for Crowd Field.
//!
//! Renderers never talk to a drawing library directly. They manipulate
//! retained primitives through the [`Scene`] capability and push geometry
//! that lives outside the scene to a [`LayerManager`]. The scene and the
//! [`StyleBus`] are shared, single-threaded handles owned by the frame loop.

mod layers;
mod overlays;
mod pool;
mod scene;
mod style;

pub use layers::{
    Feature, FeatureCollection, Geometry, HotspotProperties, LayerManager, SharedLayers,
};
pub use overlays::{
    ConvergenceRenderer, MomentumRenderer, OverlayFrame, OverlayOutcome, OverlayRegistry,
    OverlayRenderer, OverlayReport, SpawnEffect, SpawnEffectRenderer, StormHaloRenderer,
    CONVERGENCE_LAYER_ID, DEFAULT_AURORA_TTL_MS, DEFAULT_MOMENTUM_THRESHOLD,
    DEFAULT_RIPPLE_TTL_MS,
};
pub use pool::PrimitivePool;
pub use scene::{
    share, DrawState, PrimitiveHandle, PrimitiveKind, Scene, SceneError, SharedScene,
};
pub use style::{styled, StyleBus, SubscriptionId};

/// RGBA color used when presenting overlays.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Color {
    /// Red channel intensity in the range 0.0..=1.0.
    pub red: f32,
    /// Green channel intensity in the range 0.0..=1.0.
    pub green: f32,
    /// Blue channel intensity in the range 0.0..=1.0.
    pub blue: f32,
    /// Alpha channel intensity in the range 0.0..=1.0.
    pub alpha: f32,
}

impl Color {
    /// Creates a new color from floating point channels.
    #[must_use]
    pub const fn new(red: f32, green: f32, blue: f32, alpha: f32) -> Self {
        Self {
            red,
            green,
            blue,
            alpha,
        }
    }

    /// Creates an opaque color from byte RGB values.
    #[must_use]
    pub const fn from_rgb_u8(red: u8, green: u8, blue: u8) -> Self {
        Self {
            red: red as f32 / 255.0,
            green: green as f32 / 255.0,
            blue: blue as f32 / 255.0,
            alpha: 1.0,
        }
    }

    /// Returns the color with its alpha replaced, clamped to 0.0..=1.0.
    #[must_use]
    pub fn with_alpha(self, alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            ..self
        }
    }

    /// Linearly interpolates every channel towards `other`.
    #[must_use]
    pub fn lerp(self, other: Self, amount: f32) -> Self {
        let amount = amount.clamp(0.0, 1.0);
        let mix = |from: f32, to: f32| from + (to - from) * amount;

        Self {
            red: mix(self.red, other.red),
            green: mix(self.green, other.green),
            blue: mix(self.blue, other.blue),
            alpha: mix(self.alpha, other.alpha),
        }
    }
}
