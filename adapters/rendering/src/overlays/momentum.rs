use std::collections::BTreeSet;

use crowd_field_core::{EntityId, OverlayKind, Tile};
use crowd_field_system_hysteresis::HysteresisManager;
use crowd_field_system_visibility::LodGate;

use super::{OverlayFrame, OverlayOutcome, OverlayRenderer};
use crate::{
    pool::PrimitivePool,
    scene::{self, DrawState, PrimitiveKind, Scene, SceneError, SharedScene},
    style::StyleBus,
    Color,
};

/// Momentum a tile needs before its arrow is considered.
pub const DEFAULT_MOMENTUM_THRESHOLD: f32 = 0.35;

const ARROW_BASE_LENGTH: f32 = 10.0;
const ARROW_MOMENTUM_LENGTH: f32 = 22.0;
const CALM_COLOR: Color = Color::from_rgb_u8(0x4f, 0xc3, 0xf7);
const EXCITED_COLOR: Color = Color::from_rgb_u8(0xff, 0x8a, 0x65);

/// One arrow per moving tile, debounced per cell.
///
/// The momentum threshold goes through a per-cell hysteresis so arrows do
/// not flicker on noisy tiles. The anonymity check is applied to the raw
/// crowd count every frame and is never debounced.
#[derive(Debug)]
pub struct MomentumRenderer<S: Scene> {
    scene: SharedScene<S>,
    style: StyleBus,
    gate: LodGate,
    threshold: f32,
    pool: PrimitivePool<S>,
    debounce: HysteresisManager,
    active: BTreeSet<EntityId>,
}

impl<S: Scene> MomentumRenderer<S> {
    /// Creates a renderer with the default threshold and debounce counts.
    #[must_use]
    pub fn new(scene: SharedScene<S>, style: StyleBus, gate: LodGate) -> Self {
        Self::with_debounce(
            scene,
            style,
            gate,
            DEFAULT_MOMENTUM_THRESHOLD,
            HysteresisManager::default(),
        )
    }

    /// Creates a renderer with an explicit threshold and debounce manager.
    #[must_use]
    pub fn with_debounce(
        scene: SharedScene<S>,
        style: StyleBus,
        gate: LodGate,
        threshold: f32,
        debounce: HysteresisManager,
    ) -> Self {
        let pool = PrimitivePool::new(scene.clone(), PrimitiveKind::Arrow);
        Self {
            scene,
            style,
            gate,
            threshold,
            pool,
            debounce,
            active: BTreeSet::new(),
        }
    }

    /// Cells currently drawn with an arrow.
    #[must_use]
    pub fn arrows(&self) -> &PrimitivePool<S> {
        &self.pool
    }

    fn arrow_state(&self, tile: &Tile, heading: f32, zoom: f32) -> Result<DrawState, SceneError> {
        let position = scene::project(&self.scene, tile.centroid, zoom)?;
        let arousal = (tile.avg_mood.arousal + 1.0) * 0.5;
        let color = self
            .style
            .style(CALM_COLOR.lerp(EXCITED_COLOR, arousal).with_alpha(0.4 + 0.6 * tile.cohesion));
        Ok(DrawState::at(position)
            .with_radius(ARROW_BASE_LENGTH + ARROW_MOMENTUM_LENGTH * tile.momentum)
            .with_rotation(heading)
            .with_color(color)
            .with_halo(self.style.overlay_controls().friend_halo))
    }
}

impl<S: Scene> OverlayRenderer for MomentumRenderer<S> {
    fn kind(&self) -> OverlayKind {
        OverlayKind::Momentum
    }

    fn update(&mut self, frame: &OverlayFrame<'_>) -> Result<OverlayOutcome, SceneError> {
        if !self.gate.layer_visible(OverlayKind::Momentum, frame.zoom) {
            self.clear();
            return Ok(OverlayOutcome::Gated);
        }

        self.active.clear();
        let mut failure = None;
        for tile in frame.tiles {
            let moving = tile.moving_velocity().is_some() && tile.momentum >= self.threshold;
            let debounced = self.debounce.update(tile.cell.as_str(), moving);
            let Some(velocity) = tile.velocity.as_ref() else {
                continue;
            };
            if !debounced {
                continue;
            }
            let admitted = self
                .gate
                .evaluate(
                    OverlayKind::Momentum,
                    frame.zoom,
                    tile.crowd_count,
                    self.active.len(),
                )
                .is_render();
            if !admitted {
                continue;
            }

            let drawn = self
                .arrow_state(tile, velocity.heading, frame.zoom)
                .and_then(|state| self.pool.draw(&tile.cell, &state));
            match drawn {
                Ok(_) => {
                    let _ = self.active.insert(tile.cell.clone());
                }
                Err(error) => {
                    let _ = failure.get_or_insert(error);
                }
            }
        }

        self.debounce
            .retain(|key| frame.tiles.iter().any(|tile| tile.cell.as_str() == key));
        let _ = self.pool.prune(&self.active);

        match failure {
            Some(error) => Err(error),
            None => Ok(OverlayOutcome::Drawn {
                primitives: self.pool.len(),
            }),
        }
    }

    fn clear(&mut self) {
        self.pool.clear();
        self.debounce.clear();
        self.active.clear();
    }

    fn destroy(&mut self) {
        self.pool.destroy();
        self.debounce.clear();
        self.active.clear();
    }
}
