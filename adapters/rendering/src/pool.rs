use std::collections::{BTreeMap, BTreeSet};

use crowd_field_core::EntityId;

use crate::scene::{DrawState, PrimitiveHandle, PrimitiveKind, Scene, SceneError, SharedScene};

/// Entity-keyed cache of scene primitives.
///
/// A primitive exists exactly as long as its entity is part of the active
/// set: [`PrimitivePool::get`] creates it on first use and
/// [`PrimitivePool::prune`] destroys the ones whose entity disappeared.
#[derive(Debug)]
pub struct PrimitivePool<S: Scene> {
    scene: SharedScene<S>,
    kind: PrimitiveKind,
    entries: BTreeMap<EntityId, PrimitiveHandle>,
    destroyed: bool,
}

impl<S: Scene> PrimitivePool<S> {
    /// Creates an empty pool allocating primitives of `kind` on `scene`.
    #[must_use]
    pub fn new(scene: SharedScene<S>, kind: PrimitiveKind) -> Self {
        Self {
            scene,
            kind,
            entries: BTreeMap::new(),
            destroyed: false,
        }
    }

    /// Returns the primitive of `id`, creating and attaching it on first use.
    pub fn get(&mut self, id: &EntityId) -> Result<PrimitiveHandle, SceneError> {
        if let Some(handle) = self.entries.get(id) {
            return Ok(*handle);
        }
        if self.destroyed {
            return Err(SceneError::Destroyed {
                owner: "primitive pool",
            });
        }

        let mut scene = self.scene.try_borrow_mut().map_err(|_| SceneError::Busy)?;
        let handle = scene.create(self.kind)?;
        if let Err(error) = scene.attach(handle) {
            let _ = scene.destroy(handle);
            return Err(error);
        }
        drop(scene);

        let _ = self.entries.insert(id.clone(), handle);
        Ok(handle)
    }

    /// Returns the primitive of `id` after pushing `state` to it.
    pub fn draw(
        &mut self,
        id: &EntityId,
        state: &DrawState,
    ) -> Result<PrimitiveHandle, SceneError> {
        let handle = self.get(id)?;
        self.scene
            .try_borrow_mut()
            .map_err(|_| SceneError::Busy)?
            .set_state(handle, state)?;
        Ok(handle)
    }

    /// Destroys every primitive whose entity is not in `active`.
    ///
    /// Primitives of entities in both the pool and `active` are kept. Returns
    /// how many primitives were released.
    pub fn prune(&mut self, active: &BTreeSet<EntityId>) -> usize {
        let stale = self
            .entries
            .keys()
            .filter(|id| !active.contains(*id))
            .count();
        if stale == 0 {
            return 0;
        }

        let Ok(mut scene) = self.scene.try_borrow_mut() else {
            log::warn!("scene busy, deferring prune of {stale} primitives");
            return 0;
        };
        self.entries.retain(|id, handle| {
            let keep = active.contains(id);
            if !keep {
                release(&mut *scene, *handle);
            }
            keep
        });
        stale
    }

    /// Destroys every primitive while keeping the pool usable.
    pub fn clear(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        let Ok(mut scene) = self.scene.try_borrow_mut() else {
            log::warn!(
                "scene busy, leaving {} primitives for a later teardown",
                self.entries.len()
            );
            return;
        };
        for (_, handle) in std::mem::take(&mut self.entries) {
            release(&mut *scene, handle);
        }
    }

    /// Destroys every primitive and refuses new ones. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        self.destroyed = true;
        self.clear();
    }

    /// Handle currently cached for `id`.
    #[must_use]
    pub fn handle(&self, id: &str) -> Option<PrimitiveHandle> {
        self.entries.get(id).copied()
    }

    /// Reports whether `id` owns a primitive.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of live primitives.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Reports whether the pool holds no primitives.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reports whether [`PrimitivePool::destroy`] was called.
    #[must_use]
    pub const fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Identifiers owning a primitive, in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = &EntityId> {
        self.entries.keys()
    }
}

pub(crate) fn release<S: Scene + ?Sized>(scene: &mut S, handle: PrimitiveHandle) {
    if let Err(error) = scene.detach(handle) {
        log::warn!("failed to detach primitive {handle}: {error}");
    }
    if let Err(error) = scene.destroy(handle) {
        log::warn!("failed to destroy primitive {handle}: {error}");
    }
}
