use std::{cell::RefCell, fmt, rc::Rc};

use crowd_field_core::GeoPoint;
use glam::Vec2;
use thiserror::Error;

use crate::Color;

/// Opaque handle of a primitive owned by a [`Scene`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrimitiveHandle(u64);

impl PrimitiveHandle {
    /// Wraps a scene-specific raw handle value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value assigned by the scene.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PrimitiveHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Shape of a primitive requested from the scene.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    /// Directional arrow rotated along a heading.
    Arrow,
    /// Soft circular halo.
    Halo,
    /// Marker sprite.
    Sprite,
    /// Expanding burst used by short-lived effects.
    Burst,
}

/// Visual state pushed to a primitive every frame it is drawn.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawState {
    /// Position in screen pixels.
    pub position: Vec2,
    /// Radius or half-length in pixels.
    pub radius: f32,
    /// Rotation in radians, clockwise from north.
    pub rotation: f32,
    /// Fill colour including opacity.
    pub color: Color,
    /// Whether a halo ring is drawn around the primitive.
    pub halo: bool,
}

impl DrawState {
    /// Creates a unit-sized, white, unrotated state at `position`.
    #[must_use]
    pub const fn at(position: Vec2) -> Self {
        Self {
            position,
            radius: 1.0,
            rotation: 0.0,
            color: Color::new(1.0, 1.0, 1.0, 1.0),
            halo: false,
        }
    }

    /// Returns the state with the provided radius.
    #[must_use]
    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = radius;
        self
    }

    /// Returns the state with the provided rotation.
    #[must_use]
    pub fn with_rotation(mut self, rotation: f32) -> Self {
        self.rotation = rotation;
        self
    }

    /// Returns the state with the provided colour.
    #[must_use]
    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    /// Returns the state with the halo ring toggled.
    #[must_use]
    pub fn with_halo(mut self, halo: bool) -> Self {
        self.halo = halo;
        self
    }
}

/// Failures reported by a scene or by the adapters driving it.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SceneError {
    /// The handle does not name a live primitive.
    #[error("primitive {handle} does not exist")]
    UnknownHandle {
        /// Handle that failed to resolve.
        handle: PrimitiveHandle,
    },
    /// The scene is borrowed elsewhere.
    #[error("scene is busy")]
    Busy,
    /// The pool or renderer was destroyed and refuses new primitives.
    #[error("{owner} has been destroyed")]
    Destroyed {
        /// Name of the destroyed owner.
        owner: &'static str,
    },
    /// The scene refused the request.
    #[error("scene rejected the request: {message}")]
    Rejected {
        /// Scene-provided explanation.
        message: String,
    },
}

/// Drawing surface that owns retained primitives.
///
/// Primitives are created detached. Attaching makes them part of the drawn
/// scene, detaching hides them without releasing them.
pub trait Scene {
    /// Allocates a new detached primitive.
    fn create(&mut self, kind: PrimitiveKind) -> Result<PrimitiveHandle, SceneError>;

    /// Adds a primitive to the drawn scene.
    fn attach(&mut self, handle: PrimitiveHandle) -> Result<(), SceneError>;

    /// Removes a primitive from the drawn scene without releasing it.
    fn detach(&mut self, handle: PrimitiveHandle) -> Result<(), SceneError>;

    /// Replaces the visual state of a primitive.
    fn set_state(&mut self, handle: PrimitiveHandle, state: &DrawState) -> Result<(), SceneError>;

    /// Releases a primitive; the handle becomes invalid.
    fn destroy(&mut self, handle: PrimitiveHandle) -> Result<(), SceneError>;

    /// Projects a geographic point to screen pixels at the provided zoom.
    fn project(&self, point: GeoPoint, zoom: f32) -> Vec2;
}

/// Scene shared by every pool and renderer of a frame loop.
pub type SharedScene<S> = Rc<RefCell<S>>;

/// Wraps a scene so it can be shared between renderers.
#[must_use]
pub fn share<S: Scene>(scene: S) -> SharedScene<S> {
    Rc::new(RefCell::new(scene))
}

pub(crate) fn project<S: Scene>(
    scene: &SharedScene<S>,
    point: GeoPoint,
    zoom: f32,
) -> Result<Vec2, SceneError> {
    let scene = scene.try_borrow().map_err(|_| SceneError::Busy)?;
    Ok(scene.project(point, zoom))
}
