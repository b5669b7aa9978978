#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Headless rendering adapter for Crowd Field.
//!
//! [`HeadlessScene`] keeps every primitive in memory instead of drawing it,
//! which lets tests and the command-line runner observe exactly what the
//! overlays asked for. [`RecordingLayerManager`] does the same for feature
//! layers.

use std::collections::BTreeMap;

use anyhow::bail;
use crowd_field_core::{GeoPoint, MAX_MERCATOR_LATITUDE};
use crowd_field_rendering::{
    DrawState, FeatureCollection, LayerManager, PrimitiveHandle, PrimitiveKind, Scene, SceneError,
};
use glam::Vec2;

/// Edge length in pixels of the whole world at zoom 0.
pub const TILE_SIZE: f64 = 256.0;

/// Projects a point to Web Mercator world pixels at `zoom`.
///
/// Latitudes are clamped to the Mercator bounds so the poles stay finite.
#[must_use]
pub fn mercator_pixels(point: GeoPoint, zoom: f32) -> Vec2 {
    let size = TILE_SIZE * 2_f64.powf(f64::from(zoom));
    let latitude = point
        .lat
        .clamp(-MAX_MERCATOR_LATITUDE, MAX_MERCATOR_LATITUDE)
        .to_radians();
    let sin = latitude.sin();
    let x = (point.lng + 180.0) / 360.0 * size;
    let y = (0.5 - ((1.0 + sin) / (1.0 - sin)).ln() / (4.0 * std::f64::consts::PI)) * size;
    Vec2::new(x as f32, y as f32)
}

/// A primitive as recorded by the headless scene.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RecordedPrimitive {
    /// Shape requested at creation.
    pub kind: PrimitiveKind,
    /// Whether the primitive is part of the drawn scene.
    pub attached: bool,
    /// Last state pushed to the primitive.
    pub state: Option<DrawState>,
}

/// Counters accumulated over the lifetime of a scene.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SceneStats {
    /// Primitives created.
    pub created: usize,
    /// Primitives destroyed.
    pub destroyed: usize,
    /// States pushed.
    pub state_updates: usize,
}

/// In-memory scene with a Web Mercator camera.
#[derive(Clone, Debug, Default)]
pub struct HeadlessScene {
    center: Option<GeoPoint>,
    viewport: Vec2,
    next_handle: u64,
    primitives: BTreeMap<PrimitiveHandle, RecordedPrimitive>,
    stats: SceneStats,
}

impl HeadlessScene {
    /// Creates a scene that projects to raw world pixels.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a scene whose camera keeps `center` in the middle of a
    /// viewport of `viewport` pixels.
    #[must_use]
    pub fn centered(center: GeoPoint, viewport: Vec2) -> Self {
        Self {
            center: Some(center),
            viewport,
            ..Self::default()
        }
    }

    /// Looks up a live primitive.
    #[must_use]
    pub fn primitive(&self, handle: PrimitiveHandle) -> Option<&RecordedPrimitive> {
        self.primitives.get(&handle)
    }

    /// Live primitives in creation order.
    pub fn primitives(&self) -> impl Iterator<Item = (PrimitiveHandle, &RecordedPrimitive)> {
        self.primitives
            .iter()
            .map(|(handle, primitive)| (*handle, primitive))
    }

    /// Number of attached primitives of `kind`.
    #[must_use]
    pub fn attached_count(&self, kind: PrimitiveKind) -> usize {
        self.primitives
            .values()
            .filter(|primitive| primitive.kind == kind && primitive.attached)
            .count()
    }

    /// Number of live primitives.
    #[must_use]
    pub fn len(&self) -> usize {
        self.primitives.len()
    }

    /// Reports whether no primitive is alive.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }

    /// Lifetime counters.
    #[must_use]
    pub const fn stats(&self) -> SceneStats {
        self.stats
    }

    fn recorded_mut(
        &mut self,
        handle: PrimitiveHandle,
    ) -> Result<&mut RecordedPrimitive, SceneError> {
        self.primitives
            .get_mut(&handle)
            .ok_or(SceneError::UnknownHandle { handle })
    }
}

impl Scene for HeadlessScene {
    fn create(&mut self, kind: PrimitiveKind) -> Result<PrimitiveHandle, SceneError> {
        self.next_handle += 1;
        let handle = PrimitiveHandle::new(self.next_handle);
        let _ = self.primitives.insert(
            handle,
            RecordedPrimitive {
                kind,
                attached: false,
                state: None,
            },
        );
        self.stats.created += 1;
        Ok(handle)
    }

    fn attach(&mut self, handle: PrimitiveHandle) -> Result<(), SceneError> {
        self.recorded_mut(handle)?.attached = true;
        Ok(())
    }

    fn detach(&mut self, handle: PrimitiveHandle) -> Result<(), SceneError> {
        self.recorded_mut(handle)?.attached = false;
        Ok(())
    }

    fn set_state(&mut self, handle: PrimitiveHandle, state: &DrawState) -> Result<(), SceneError> {
        self.recorded_mut(handle)?.state = Some(*state);
        self.stats.state_updates += 1;
        Ok(())
    }

    fn destroy(&mut self, handle: PrimitiveHandle) -> Result<(), SceneError> {
        if self.primitives.remove(&handle).is_none() {
            return Err(SceneError::UnknownHandle { handle });
        }
        self.stats.destroyed += 1;
        Ok(())
    }

    fn project(&self, point: GeoPoint, zoom: f32) -> Vec2 {
        let world = mercator_pixels(point, zoom);
        match self.center {
            Some(center) => world - mercator_pixels(center, zoom) + self.viewport * 0.5,
            None => world,
        }
    }
}

/// Layer manager that keeps mounted feature collections in memory.
#[derive(Clone, Debug, Default)]
pub struct RecordingLayerManager {
    layers: BTreeMap<String, FeatureCollection>,
    last_published: Option<FeatureCollection>,
    mounts: usize,
    updates: usize,
    unmounts: usize,
}

impl RecordingLayerManager {
    /// Creates a manager without layers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Features of a mounted layer.
    #[must_use]
    pub fn layer(&self, layer_id: &str) -> Option<&FeatureCollection> {
        self.layers.get(layer_id)
    }

    /// Most recent collection mounted or updated on any layer, kept after
    /// the layer is unmounted.
    #[must_use]
    pub fn last_published(&self) -> Option<&FeatureCollection> {
        self.last_published.as_ref()
    }

    /// Number of mounted layers.
    #[must_use]
    pub fn mounted_count(&self) -> usize {
        self.layers.len()
    }

    /// Number of `mount`, `update` and `unmount` calls, in that order.
    #[must_use]
    pub const fn call_counts(&self) -> (usize, usize, usize) {
        (self.mounts, self.updates, self.unmounts)
    }
}

impl LayerManager for RecordingLayerManager {
    fn mount(&mut self, layer_id: &str, features: &FeatureCollection) -> anyhow::Result<()> {
        if self.layers.contains_key(layer_id) {
            bail!("layer `{layer_id}` is already mounted");
        }
        log::debug!("mounting layer {layer_id} with {} features", features.features.len());
        let _ = self.layers.insert(layer_id.to_owned(), features.clone());
        self.last_published = Some(features.clone());
        self.mounts += 1;
        Ok(())
    }

    fn update(&mut self, layer_id: &str, features: &FeatureCollection) -> anyhow::Result<()> {
        let Some(layer) = self.layers.get_mut(layer_id) else {
            bail!("layer `{layer_id}` is not mounted");
        };
        layer.clone_from(features);
        self.last_published = Some(features.clone());
        self.updates += 1;
        Ok(())
    }

    fn unmount(&mut self, layer_id: &str) -> anyhow::Result<()> {
        if self.layers.remove(layer_id).is_none() {
            bail!("layer `{layer_id}` is not mounted");
        }
        log::debug!("unmounted layer {layer_id}");
        self.unmounts += 1;
        Ok(())
    }
}
