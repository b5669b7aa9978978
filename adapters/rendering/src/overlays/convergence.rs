use std::collections::BTreeSet;

use crowd_field_core::{CascadeHotspot, EntityId, OverlayKind};
use crowd_field_system_visibility::LodGate;

use super::{OverlayFrame, OverlayOutcome, OverlayRenderer};
use crate::{
    layers::{Feature, FeatureCollection, Geometry, HotspotProperties, SharedLayers},
    pool::PrimitivePool,
    scene::{DrawState, PrimitiveKind, Scene, SceneError, SharedScene},
    style::StyleBus,
    Color,
};

/// Layer identifier used when mounting hotspot features.
pub const CONVERGENCE_LAYER_ID: &str = "crowd-field-convergence";

const MARKER_BASE_RADIUS: f32 = 8.0;
const MARKER_WEIGHT_RADIUS: f32 = 16.0;
const MARKER_COLOR: Color = Color::from_rgb_u8(0xff, 0xd5, 0x4f);

/// Convergence hotspots drawn as pooled sprites plus an external feature layer.
pub struct ConvergenceRenderer<S: Scene> {
    style: StyleBus,
    gate: LodGate,
    pool: PrimitivePool<S>,
    layers: SharedLayers,
    mounted: bool,
    features: FeatureCollection,
    active: BTreeSet<EntityId>,
}

impl<S: Scene> ConvergenceRenderer<S> {
    /// Creates a renderer drawing sprites on `scene` and features on `layers`.
    #[must_use]
    pub fn new(
        scene: SharedScene<S>,
        layers: SharedLayers,
        style: StyleBus,
        gate: LodGate,
    ) -> Self {
        Self {
            style,
            gate,
            pool: PrimitivePool::new(scene, PrimitiveKind::Sprite),
            layers,
            mounted: false,
            features: FeatureCollection::default(),
            active: BTreeSet::new(),
        }
    }

    /// Hotspots currently drawn with a sprite.
    #[must_use]
    pub fn sprites(&self) -> &PrimitivePool<S> {
        &self.pool
    }

    /// Features handed to the layer manager by the last update.
    #[must_use]
    pub fn features(&self) -> &FeatureCollection {
        &self.features
    }

    /// Reports whether the feature layer is mounted.
    #[must_use]
    pub const fn is_mounted(&self) -> bool {
        self.mounted
    }

    fn publish(&mut self) {
        let Ok(mut layers) = self.layers.try_borrow_mut() else {
            log::warn!("layer manager busy, skipping convergence update");
            return;
        };
        let result = if self.mounted {
            layers.update(CONVERGENCE_LAYER_ID, &self.features)
        } else {
            layers.mount(CONVERGENCE_LAYER_ID, &self.features)
        };
        match result {
            Ok(()) => self.mounted = true,
            Err(error) => log::warn!("failed to publish convergence features: {error:#}"),
        }
    }

    fn unmount(&mut self) {
        if !self.mounted {
            return;
        }
        let Ok(mut layers) = self.layers.try_borrow_mut() else {
            log::warn!("layer manager busy, convergence layer stays mounted");
            return;
        };
        if let Err(error) = layers.unmount(CONVERGENCE_LAYER_ID) {
            log::warn!("failed to unmount convergence layer: {error:#}");
        }
        self.mounted = false;
    }
}

fn feature(hotspot: &CascadeHotspot) -> Feature {
    Feature {
        id: hotspot.id.to_string(),
        geometry: Geometry::Point {
            coordinates: [f64::from(hotspot.centroid.x), f64::from(hotspot.centroid.y)],
        },
        properties: HotspotProperties {
            weight: hotspot.weight,
            members: hotspot.members,
            participants: hotspot.participants,
            mean_eta_ms: hotspot.mean_eta_ms,
            mean_confidence: hotspot.mean_confidence,
        },
    }
}

impl<S: Scene> OverlayRenderer for ConvergenceRenderer<S> {
    fn kind(&self) -> OverlayKind {
        OverlayKind::Convergence
    }

    fn update(&mut self, frame: &OverlayFrame<'_>) -> Result<OverlayOutcome, SceneError> {
        if !self.gate.layer_visible(OverlayKind::Convergence, frame.zoom) {
            self.clear();
            return Ok(OverlayOutcome::Gated);
        }

        let controls = self.style.overlay_controls();
        self.active.clear();
        self.features.features.clear();
        self.features.viewer = controls.current_user_id.clone();
        let mut failure = None;

        for hotspot in frame.hotspots {
            let admitted = self
                .gate
                .evaluate(
                    OverlayKind::Convergence,
                    frame.zoom,
                    hotspot.participants,
                    self.active.len(),
                )
                .is_render();
            if !admitted {
                continue;
            }
            let weight = hotspot.weight.clamp(0.0, 1.0);
            let state = DrawState::at(hotspot.centroid)
                .with_radius(MARKER_BASE_RADIUS + MARKER_WEIGHT_RADIUS * weight)
                .with_color(self.style.style(MARKER_COLOR.with_alpha(0.3 + 0.7 * weight)))
                .with_halo(controls.friend_halo);
            if let Err(error) = self.pool.draw(&hotspot.id, &state) {
                let _ = failure.get_or_insert(error);
                continue;
            }
            let _ = self.active.insert(hotspot.id.clone());
            self.features.features.push(feature(hotspot));
        }
        let _ = self.pool.prune(&self.active);
        self.publish();

        match failure {
            Some(error) => Err(error),
            None => Ok(OverlayOutcome::Drawn {
                primitives: self.pool.len(),
            }),
        }
    }

    fn clear(&mut self) {
        self.pool.clear();
        self.active.clear();
        self.features.features.clear();
        self.unmount();
    }

    fn destroy(&mut self) {
        self.pool.destroy();
        self.active.clear();
        self.features.features.clear();
        self.unmount();
    }
}

impl<S: Scene + std::fmt::Debug> std::fmt::Debug for ConvergenceRenderer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvergenceRenderer")
            .field("pool", &self.pool)
            .field("mounted", &self.mounted)
            .field("features", &self.features.features.len())
            .finish()
    }
}
