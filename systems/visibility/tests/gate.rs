use crowd_field_core::{OverlayKind, K_ANONYMITY_MIN};
use crowd_field_system_visibility::{
    GateConfig, GateDecision, LodGate, OverlayThresholds, Suppression,
};

#[test]
fn cohorts_below_k_are_never_rendered_at_any_zoom() {
    let gate = LodGate::default();

    for kind in OverlayKind::ALL {
        for tenth in 0..=220 {
            let zoom = tenth as f32 / 10.0;
            for members in 0..K_ANONYMITY_MIN {
                assert!(
                    !gate.evaluate(kind, zoom, members, 0).is_render(),
                    "{kind:?} rendered {members} members at zoom {zoom}"
                );
            }
        }
    }
}

#[test]
fn zoom_is_checked_before_cohort_size() {
    let gate = LodGate::default();

    assert_eq!(
        gate.evaluate(OverlayKind::Momentum, 12.9, 2, 0),
        GateDecision::Suppressed(Suppression::ZoomBelowMinimum)
    );
    assert_eq!(
        gate.evaluate(OverlayKind::Momentum, 13.0, 2, 0),
        GateDecision::Suppressed(Suppression::CohortBelowAnonymity)
    );
    assert_eq!(
        gate.evaluate(OverlayKind::Momentum, 13.0, K_ANONYMITY_MIN, 0),
        GateDecision::Render
    );
}

#[test]
fn ambient_overlays_cap_concurrency() {
    let gate = LodGate::default();
    let cap = gate
        .config()
        .aurora
        .max_concurrent()
        .expect("aurora is capped");

    assert!(gate.evaluate(OverlayKind::Aurora, 14.0, 20, cap - 1).is_render());
    assert_eq!(
        gate.evaluate(OverlayKind::Aurora, 14.0, 20, cap),
        GateDecision::Suppressed(Suppression::ConcurrencyCapReached)
    );
    assert!(gate
        .evaluate(OverlayKind::Storm, 14.0, 20, 10_000)
        .is_render());
}

#[test]
fn custom_thresholds_apply_per_overlay() {
    let config = GateConfig {
        storm: OverlayThresholds::new(15.0, 12, None),
        ..GateConfig::default()
    };
    let gate = LodGate::new(config);

    assert!(!gate.layer_visible(OverlayKind::Storm, 14.0));
    assert!(gate.layer_visible(OverlayKind::Convergence, 14.0));
    assert!(!gate.admits_cohort(OverlayKind::Storm, 11));
    assert!(gate.admits_cohort(OverlayKind::Storm, 12));
}
