use std::collections::BTreeSet;

use crowd_field_core::{EntityId, OverlayKind, Storm, StormState};
use crowd_field_system_visibility::LodGate;

use super::{OverlayFrame, OverlayOutcome, OverlayRenderer};
use crate::{
    pool::PrimitivePool,
    scene::{DrawState, PrimitiveKind, Scene, SceneError, SharedScene},
    style::StyleBus,
    Color,
};

const HALO_BASE_RADIUS: f32 = 24.0;
const HALO_INTENSITY_RADIUS: f32 = 48.0;

/// One halo per storm whose cohort meets the anonymity minimum.
#[derive(Debug)]
pub struct StormHaloRenderer<S: Scene> {
    style: StyleBus,
    gate: LodGate,
    pool: PrimitivePool<S>,
    active: BTreeSet<EntityId>,
}

impl<S: Scene> StormHaloRenderer<S> {
    /// Creates a renderer drawing on `scene`.
    #[must_use]
    pub fn new(scene: SharedScene<S>, style: StyleBus, gate: LodGate) -> Self {
        Self {
            style,
            gate,
            pool: PrimitivePool::new(scene, PrimitiveKind::Halo),
            active: BTreeSet::new(),
        }
    }

    /// Storms currently drawn with a halo.
    #[must_use]
    pub fn halos(&self) -> &PrimitivePool<S> {
        &self.pool
    }

    fn halo_state(&self, storm: &Storm) -> DrawState {
        let base = match storm.state {
            StormState::Forming => Color::from_rgb_u8(0x9f, 0xa8, 0xda),
            StormState::Active => Color::from_rgb_u8(0x7c, 0x4d, 0xff),
            StormState::Dissipating => Color::from_rgb_u8(0xb3, 0x9d, 0xdb),
        };
        let intensity = storm.intensity.clamp(0.0, 1.0);
        DrawState::at(storm.position)
            .with_radius(HALO_BASE_RADIUS + HALO_INTENSITY_RADIUS * intensity)
            .with_color(self.style.style(base.with_alpha(intensity)))
            .with_halo(self.style.overlay_controls().friend_halo)
    }
}

impl<S: Scene> OverlayRenderer for StormHaloRenderer<S> {
    fn kind(&self) -> OverlayKind {
        OverlayKind::Storm
    }

    fn update(&mut self, frame: &OverlayFrame<'_>) -> Result<OverlayOutcome, SceneError> {
        if !self.gate.layer_visible(OverlayKind::Storm, frame.zoom) {
            self.clear();
            return Ok(OverlayOutcome::Gated);
        }

        self.active.clear();
        let mut failure = None;
        for storm in frame.storms {
            let admitted = self
                .gate
                .evaluate(OverlayKind::Storm, frame.zoom, storm.cohort, self.active.len())
                .is_render();
            if !admitted {
                continue;
            }
            let state = self.halo_state(storm);
            match self.pool.draw(&storm.id, &state) {
                Ok(_) => {
                    let _ = self.active.insert(storm.id.clone());
                }
                Err(error) => {
                    let _ = failure.get_or_insert(error);
                }
            }
        }
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
        self.active.clear();
    }

    fn destroy(&mut self) {
        self.pool.destroy();
        self.active.clear();
    }
}
