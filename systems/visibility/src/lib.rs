#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Zoom and cohort-size gate deciding which overlay data may be drawn.
//!
//! The gate is a pure function of the zoom, the size of the cohort behind a
//! candidate, and how many instances of the overlay are already on screen.
//! Cohorts smaller than [`K_ANONYMITY_MIN`] are never admitted, whatever the
//! configuration says.

use crowd_field_core::{OverlayKind, K_ANONYMITY_MIN};

/// Visibility thresholds of a single overlay.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OverlayThresholds {
    min_zoom: f32,
    k_min: u32,
    max_concurrent: Option<usize>,
}

impl OverlayThresholds {
    /// Creates thresholds; `k_min` is raised to at least [`K_ANONYMITY_MIN`].
    #[must_use]
    pub fn new(min_zoom: f32, k_min: u32, max_concurrent: Option<usize>) -> Self {
        Self {
            min_zoom,
            k_min: k_min.max(K_ANONYMITY_MIN),
            max_concurrent,
        }
    }

    /// Smallest zoom at which the overlay is drawn.
    #[must_use]
    pub const fn min_zoom(&self) -> f32 {
        self.min_zoom
    }

    /// Smallest cohort the overlay may represent.
    #[must_use]
    pub const fn k_min(&self) -> u32 {
        self.k_min
    }

    /// Maximum number of simultaneous instances, if capped.
    #[must_use]
    pub const fn max_concurrent(&self) -> Option<usize> {
        self.max_concurrent
    }
}

/// Thresholds for every overlay kind.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GateConfig {
    /// Momentum arrows.
    pub momentum: OverlayThresholds,
    /// Storm halos.
    pub storm: OverlayThresholds,
    /// Convergence hotspots.
    pub convergence: OverlayThresholds,
    /// Ripple bursts.
    pub ripple: OverlayThresholds,
    /// Aurora bursts.
    pub aurora: OverlayThresholds,
}

impl GateConfig {
    /// Thresholds of the provided overlay.
    #[must_use]
    pub const fn thresholds(&self, kind: OverlayKind) -> &OverlayThresholds {
        match kind {
            OverlayKind::Momentum => &self.momentum,
            OverlayKind::Storm => &self.storm,
            OverlayKind::Convergence => &self.convergence,
            OverlayKind::Ripple => &self.ripple,
            OverlayKind::Aurora => &self.aurora,
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            momentum: OverlayThresholds::new(13.0, K_ANONYMITY_MIN, None),
            storm: OverlayThresholds::new(11.0, K_ANONYMITY_MIN, None),
            convergence: OverlayThresholds::new(12.0, K_ANONYMITY_MIN, None),
            ripple: OverlayThresholds::new(12.0, K_ANONYMITY_MIN, Some(24)),
            aurora: OverlayThresholds::new(10.0, K_ANONYMITY_MIN, Some(8)),
        }
    }
}

/// Why a candidate was not admitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Suppression {
    /// The zoom is below the overlay minimum; the whole layer must be cleared.
    ZoomBelowMinimum,
    /// The cohort is smaller than the anonymity minimum.
    CohortBelowAnonymity,
    /// The overlay already shows its maximum number of instances.
    ConcurrencyCapReached,
}

/// Outcome of evaluating a candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GateDecision {
    /// The candidate may be turned into draw data.
    Render,
    /// The candidate must not be drawn.
    Suppressed(Suppression),
}

impl GateDecision {
    /// Reports whether the candidate may be drawn.
    #[must_use]
    pub const fn is_render(self) -> bool {
        matches!(self, Self::Render)
    }
}

/// Level-of-detail and anonymity gate.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LodGate {
    config: GateConfig,
}

impl LodGate {
    /// Creates a gate using the provided thresholds.
    #[must_use]
    pub const fn new(config: GateConfig) -> Self {
        Self { config }
    }

    /// Thresholds in use.
    #[must_use]
    pub const fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Reports whether the overlay's layer is eligible at the provided zoom.
    ///
    /// Non-finite zoom levels are never eligible.
    #[must_use]
    pub fn layer_visible(&self, kind: OverlayKind, zoom: f32) -> bool {
        zoom.is_finite() && zoom >= self.config.thresholds(kind).min_zoom
    }

    /// Reports whether a cohort of `members` people may be represented.
    #[must_use]
    pub fn admits_cohort(&self, kind: OverlayKind, members: u32) -> bool {
        members >= self.config.thresholds(kind).k_min
    }

    /// Evaluates a candidate of `members` people while `active` instances of
    /// the overlay are already drawn.
    #[must_use]
    pub fn evaluate(
        &self,
        kind: OverlayKind,
        zoom: f32,
        members: u32,
        active: usize,
    ) -> GateDecision {
        if !self.layer_visible(kind, zoom) {
            return GateDecision::Suppressed(Suppression::ZoomBelowMinimum);
        }
        if !self.admits_cohort(kind, members) {
            return GateDecision::Suppressed(Suppression::CohortBelowAnonymity);
        }
        if let Some(cap) = self.config.thresholds(kind).max_concurrent {
            if active >= cap {
                return GateDecision::Suppressed(Suppression::ConcurrencyCapReached);
            }
        }
        GateDecision::Render
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_k_min_cannot_undercut_anonymity_minimum() {
        let thresholds = OverlayThresholds::new(0.0, 1, None);
        assert_eq!(thresholds.k_min(), K_ANONYMITY_MIN);
    }

    #[test]
    fn nan_zoom_hides_every_layer() {
        let gate = LodGate::default();
        for kind in OverlayKind::ALL {
            assert!(!gate.layer_visible(kind, f32::NAN));
        }
    }
}
