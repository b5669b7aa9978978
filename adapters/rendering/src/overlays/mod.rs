use std::collections::BTreeMap;

use crowd_field_core::{CascadeHotspot, OverlayKind, Storm, StormEvent, Tile};

use crate::scene::SceneError;

mod convergence;
mod momentum;
mod spawn;
mod storm;

pub use convergence::{ConvergenceRenderer, CONVERGENCE_LAYER_ID};
pub use momentum::{MomentumRenderer, DEFAULT_MOMENTUM_THRESHOLD};
pub use spawn::{SpawnEffect, SpawnEffectRenderer, DEFAULT_AURORA_TTL_MS, DEFAULT_RIPPLE_TTL_MS};
pub use storm::StormHaloRenderer;

/// Everything the overlays may read while drawing a frame.
#[derive(Clone, Copy, Debug)]
pub struct OverlayFrame<'a> {
    /// Map zoom level.
    pub zoom: f32,
    /// Engine clock in milliseconds.
    pub now_ms: u64,
    /// Validated tiles.
    pub tiles: &'a [Tile],
    /// Hotspots detected this frame, sorted by bucket.
    pub hotspots: &'a [CascadeHotspot],
    /// Storms alive after this frame's update, sorted by id.
    pub storms: &'a [Storm],
    /// Storm transitions that happened this frame.
    pub storm_events: &'a [StormEvent],
}

/// What an overlay did with a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlayOutcome {
    /// The overlay is eligible at this zoom and shows `primitives` primitives.
    Drawn {
        /// Number of primitives on screen after the update.
        primitives: usize,
    },
    /// The zoom is below the overlay minimum; all draw state was cleared.
    Gated,
}

/// A tagged overlay driven once per frame.
pub trait OverlayRenderer {
    /// Overlay drawn by this renderer.
    fn kind(&self) -> OverlayKind;

    /// Reconciles the scene with the frame.
    fn update(&mut self, frame: &OverlayFrame<'_>) -> Result<OverlayOutcome, SceneError>;

    /// Drops all draw state while staying usable.
    fn clear(&mut self);

    /// Releases every resource. Safe to call repeatedly.
    fn destroy(&mut self);
}

/// Result of updating a single overlay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverlayReport {
    /// Overlay that was updated.
    pub kind: OverlayKind,
    /// What the overlay did.
    pub outcome: Result<OverlayOutcome, SceneError>,
}

/// Overlay renderers keyed and updated by [`OverlayKind`].
#[derive(Default)]
pub struct OverlayRegistry {
    renderers: BTreeMap<OverlayKind, Box<dyn OverlayRenderer>>,
}

impl OverlayRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a renderer, returning the one previously registered for the
    /// same kind.
    pub fn register(
        &mut self,
        renderer: Box<dyn OverlayRenderer>,
    ) -> Option<Box<dyn OverlayRenderer>> {
        self.renderers.insert(renderer.kind(), renderer)
    }

    /// Removes the renderer of `kind` without destroying it.
    pub fn unregister(&mut self, kind: OverlayKind) -> Option<Box<dyn OverlayRenderer>> {
        self.renderers.remove(&kind)
    }

    /// Reports whether a renderer is registered for `kind`.
    #[must_use]
    pub fn contains(&self, kind: OverlayKind) -> bool {
        self.renderers.contains_key(&kind)
    }

    /// Registered kinds in draw order.
    pub fn kinds(&self) -> impl Iterator<Item = OverlayKind> + '_ {
        self.renderers.keys().copied()
    }

    /// Number of registered renderers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.renderers.len()
    }

    /// Reports whether no renderer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.renderers.is_empty()
    }

    /// Updates every renderer in draw order, appending one report per renderer.
    ///
    /// A failing renderer does not prevent the others from drawing.
    pub fn update(&mut self, frame: &OverlayFrame<'_>, out: &mut Vec<OverlayReport>) {
        for (kind, renderer) in &mut self.renderers {
            out.push(OverlayReport {
                kind: *kind,
                outcome: renderer.update(frame),
            });
        }
    }

    /// Clears every renderer.
    pub fn clear(&mut self) {
        for renderer in self.renderers.values_mut() {
            renderer.clear();
        }
    }

    /// Destroys every renderer.
    pub fn destroy(&mut self) {
        for renderer in self.renderers.values_mut() {
            renderer.destroy();
        }
    }
}

impl std::fmt::Debug for OverlayRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayRegistry")
            .field("kinds", &self.renderers.keys().collect::<Vec<_>>())
            .finish()
    }
}
