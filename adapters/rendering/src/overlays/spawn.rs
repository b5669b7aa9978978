use std::collections::BTreeSet;

use crowd_field_core::{EntityId, OverlayKind, StormEvent};
use crowd_field_system_visibility::LodGate;
use glam::Vec2;

use super::{OverlayFrame, OverlayOutcome, OverlayRenderer};
use crate::{
    pool::release,
    scene::{DrawState, PrimitiveHandle, PrimitiveKind, Scene, SceneError, SharedScene},
    style::StyleBus,
    Color,
};

/// Lifetime of a ripple burst in milliseconds.
pub const DEFAULT_RIPPLE_TTL_MS: u64 = 1_200;
/// Lifetime of an aurora burst in milliseconds.
pub const DEFAULT_AURORA_TTL_MS: u64 = 2_400;

const UNCAPPED_SLOTS: usize = 16;
const BURST_BASE_RADIUS: f32 = 12.0;

/// A short-lived burst occupying one slot of a [`SpawnEffectRenderer`].
#[derive(Clone, Debug, PartialEq)]
pub struct SpawnEffect {
    /// Hotspot or storm that triggered the burst.
    pub source: EntityId,
    /// Position in screen pixels.
    pub position: Vec2,
    /// Engine clock in milliseconds when the burst started.
    pub born_ms: u64,
    /// Lifetime in milliseconds.
    pub ttl_ms: u64,
}

impl SpawnEffect {
    /// Remaining opacity `1 - (now - born) / ttl`, clamped to `0.0..=1.0`.
    #[must_use]
    pub fn fade(&self, now_ms: u64) -> f32 {
        if self.ttl_ms == 0 {
            return 0.0;
        }
        let age = now_ms.saturating_sub(self.born_ms) as f32;
        (1.0 - age / self.ttl_ms as f32).clamp(0.0, 1.0)
    }

    /// Reports whether the burst outlived its ttl.
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.born_ms) >= self.ttl_ms
    }
}

#[derive(Debug, Default)]
struct Slot {
    handle: Option<PrimitiveHandle>,
    effect: Option<SpawnEffect>,
}

#[derive(Debug)]
struct Trigger {
    source: EntityId,
    position: Vec2,
    cohort: u32,
}

/// Fixed pool of burst primitives.
///
/// Ripples start when a hotspot appears, auroras when a storm becomes active.
/// Slots are allocated once; expired bursts detach their primitive and
/// return the slot to the free list.
#[derive(Debug)]
pub struct SpawnEffectRenderer<S: Scene> {
    kind: OverlayKind,
    scene: SharedScene<S>,
    style: StyleBus,
    gate: LodGate,
    ttl_ms: u64,
    slots: Vec<Slot>,
    free: Vec<usize>,
    seen: BTreeSet<EntityId>,
    triggers: Vec<Trigger>,
    destroyed: bool,
}

impl<S: Scene> SpawnEffectRenderer<S> {
    /// Creates the ripple overlay.
    #[must_use]
    pub fn ripple(scene: SharedScene<S>, style: StyleBus, gate: LodGate) -> Self {
        Self::new(OverlayKind::Ripple, scene, style, gate, DEFAULT_RIPPLE_TTL_MS)
    }

    /// Creates the aurora overlay.
    #[must_use]
    pub fn aurora(scene: SharedScene<S>, style: StyleBus, gate: LodGate) -> Self {
        Self::new(OverlayKind::Aurora, scene, style, gate, DEFAULT_AURORA_TTL_MS)
    }

    /// Returns the renderer with a different burst lifetime.
    #[must_use]
    pub fn with_ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    fn new(
        kind: OverlayKind,
        scene: SharedScene<S>,
        style: StyleBus,
        gate: LodGate,
        ttl_ms: u64,
    ) -> Self {
        let capacity = gate
            .config()
            .thresholds(kind)
            .max_concurrent()
            .unwrap_or(UNCAPPED_SLOTS);
        let mut renderer = Self {
            kind,
            scene,
            style,
            gate,
            ttl_ms,
            slots: Vec::new(),
            free: Vec::new(),
            seen: BTreeSet::new(),
            triggers: Vec::new(),
            destroyed: false,
        };
        renderer.slots.resize_with(capacity, Slot::default);
        renderer.reset_free_list();
        renderer
    }

    /// Number of slots in the pool.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Bursts currently on screen, in slot order.
    pub fn live(&self) -> impl Iterator<Item = &SpawnEffect> {
        self.slots.iter().filter_map(|slot| slot.effect.as_ref())
    }

    /// Number of bursts currently on screen.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    fn reset_free_list(&mut self) {
        self.free.clear();
        self.free.extend((0..self.slots.len()).rev());
    }

    fn collect_triggers(&mut self, frame: &OverlayFrame<'_>, out: &mut Vec<Trigger>) {
        match self.kind {
            OverlayKind::Ripple => {
                self.seen
                    .retain(|id| frame.hotspots.iter().any(|hotspot| &hotspot.id == id));
                for hotspot in frame.hotspots {
                    if self.seen.contains(&hotspot.id) {
                        continue;
                    }
                    let _ = self.seen.insert(hotspot.id.clone());
                    out.push(Trigger {
                        source: hotspot.id.clone(),
                        position: hotspot.centroid,
                        cohort: hotspot.participants,
                    });
                }
            }
            OverlayKind::Aurora => {
                for event in frame.storm_events {
                    let StormEvent::Activated { id } = event else {
                        continue;
                    };
                    if let Some(storm) = frame.storms.iter().find(|storm| &storm.id == id) {
                        out.push(Trigger {
                            source: storm.id.clone(),
                            position: storm.position,
                            cohort: storm.cohort,
                        });
                    }
                }
            }
            OverlayKind::Momentum | OverlayKind::Storm | OverlayKind::Convergence => {}
        }
    }

    fn draw(
        &mut self,
        frame: &OverlayFrame<'_>,
        triggers: &mut Vec<Trigger>,
    ) -> Result<OverlayOutcome, SceneError> {
        if !self.gate.layer_visible(self.kind, frame.zoom) {
            self.clear();
            return Ok(OverlayOutcome::Gated);
        }

        let color = self.burst_color();
        let mut scene = self.scene.try_borrow_mut().map_err(|_| SceneError::Busy)?;
        let mut failure = None;

        for (index, slot) in self.slots.iter_mut().enumerate() {
            let expired = slot
                .effect
                .as_ref()
                .is_some_and(|effect| effect.is_expired(frame.now_ms));
            if !expired {
                continue;
            }
            slot.effect = None;
            self.free.push(index);
            retire(&mut *scene, slot);
        }

        for trigger in triggers.drain(..) {
            let live = self.slots.len() - self.free.len();
            let admitted = self
                .gate
                .evaluate(self.kind, frame.zoom, trigger.cohort, live)
                .is_render();
            if !admitted {
                continue;
            }
            let Some(index) = self.free.pop() else {
                break;
            };
            let slot = &mut self.slots[index];
            if let Err(error) = start(&mut *scene, slot) {
                self.free.push(index);
                let _ = failure.get_or_insert(error);
                continue;
            }
            slot.effect = Some(SpawnEffect {
                source: trigger.source,
                position: trigger.position,
                born_ms: frame.now_ms,
                ttl_ms: self.ttl_ms,
            });
        }

        for slot in &self.slots {
            let (Some(handle), Some(effect)) = (slot.handle, slot.effect.as_ref()) else {
                continue;
            };
            let fade = effect.fade(frame.now_ms);
            let state = DrawState::at(effect.position)
                .with_radius(BURST_BASE_RADIUS * (1.0 + 2.0 * (1.0 - fade)))
                .with_color(self.style.style(color.with_alpha(fade)));
            if let Err(error) = scene.set_state(handle, &state) {
                let _ = failure.get_or_insert(error);
            }
        }

        match failure {
            Some(error) => Err(error),
            None => Ok(OverlayOutcome::Drawn {
                primitives: self.slots.len() - self.free.len(),
            }),
        }
    }

    fn burst_color(&self) -> Color {
        match self.kind {
            OverlayKind::Aurora => Color::from_rgb_u8(0x69, 0xf0, 0xae),
            _ => Color::from_rgb_u8(0x18, 0xff, 0xff),
        }
    }
}

impl<S: Scene> OverlayRenderer for SpawnEffectRenderer<S> {
    fn kind(&self) -> OverlayKind {
        self.kind
    }

    fn update(&mut self, frame: &OverlayFrame<'_>) -> Result<OverlayOutcome, SceneError> {
        if self.destroyed {
            return Err(SceneError::Destroyed {
                owner: self.kind.as_str(),
            });
        }

        let mut triggers = std::mem::take(&mut self.triggers);
        triggers.clear();
        self.collect_triggers(frame, &mut triggers);
        let outcome = self.draw(frame, &mut triggers);
        self.triggers = triggers;
        outcome
    }

    fn clear(&mut self) {
        let live = self.live_count();
        if live > 0 {
            let Ok(mut scene) = self.scene.try_borrow_mut() else {
                log::warn!(
                    "scene busy, leaving {live} {} bursts attached",
                    self.kind.as_str()
                );
                return;
            };
            for slot in &mut self.slots {
                if slot.effect.take().is_some() {
                    retire(&mut *scene, slot);
                }
            }
        }
        self.reset_free_list();
    }

    fn destroy(&mut self) {
        self.destroyed = true;
        let held = self.slots.iter().filter(|slot| slot.handle.is_some()).count();
        if held > 0 {
            let Ok(mut scene) = self.scene.try_borrow_mut() else {
                log::warn!("scene busy, deferring teardown of {held} bursts");
                return;
            };
            for slot in &mut self.slots {
                slot.effect = None;
                if let Some(handle) = slot.handle.take() {
                    release(&mut *scene, handle);
                }
            }
        }
        self.reset_free_list();
        self.seen.clear();
    }
}

fn start<S: Scene>(scene: &mut S, slot: &mut Slot) -> Result<(), SceneError> {
    let handle = match slot.handle {
        Some(handle) => handle,
        None => {
            let handle = scene.create(PrimitiveKind::Burst)?;
            slot.handle = Some(handle);
            handle
        }
    };
    scene.attach(handle)
}

/// Hides the primitive of a finished slot. Primitives that refuse to detach
/// are destroyed and the slot allocates a fresh one on reuse.
fn retire<S: Scene>(scene: &mut S, slot: &mut Slot) {
    let Some(handle) = slot.handle else {
        return;
    };
    if let Err(error) = scene.detach(handle) {
        log::warn!("failed to detach burst {handle}: {error}");
        slot.handle = None;
        if let Err(error) = scene.destroy(handle) {
            log::warn!("failed to destroy burst {handle}: {error}");
        }
    }
}
