use std::{cell::RefCell, rc::Rc};

use crowd_field_core::{BucketKey, CascadeHotspot, EntityId, GeoPoint, Storm, StormState};
use crowd_field_rendering::{
    share, ConvergenceRenderer, OverlayFrame, OverlayRegistry, PrimitiveKind, SharedLayers,
    StormHaloRenderer, StyleBus, CONVERGENCE_LAYER_ID,
};
use crowd_field_rendering_headless::{HeadlessScene, RecordingLayerManager};
use crowd_field_system_visibility::LodGate;
use glam::Vec2;

fn frame<'a>(
    zoom: f32,
    hotspots: &'a [CascadeHotspot],
    storms: &'a [Storm],
) -> OverlayFrame<'a> {
    OverlayFrame {
        zoom,
        now_ms: 0,
        tiles: &[],
        hotspots,
        storms,
        storm_events: &[],
    }
}

#[test]
fn headless_scene_records_overlay_output() {
    let scene = share(HeadlessScene::centered(
        GeoPoint::new(24.94, 60.17),
        Vec2::new(1024.0, 768.0),
    ));
    let layers = Rc::new(RefCell::new(RecordingLayerManager::new()));
    let shared: SharedLayers = layers.clone();
    let style = StyleBus::new();
    let gate = LodGate::default();

    let mut registry = OverlayRegistry::new();
    let _ = registry.register(Box::new(StormHaloRenderer::new(
        scene.clone(),
        style.clone(),
        gate,
    )));
    let _ = registry.register(Box::new(ConvergenceRenderer::new(
        scene.clone(),
        shared,
        style,
        gate,
    )));

    let hotspots = [CascadeHotspot {
        id: EntityId::from("CAS_1:1"),
        bucket: BucketKey::new(1, 1),
        centroid: Vec2::new(101.0, 99.0),
        weight: 0.48,
        members: 3,
        participants: 6,
        mean_eta_ms: 40_000,
        mean_confidence: 0.8,
    }];
    let storms = [Storm {
        id: EntityId::from("STM_1:1"),
        position: Vec2::new(101.0, 99.0),
        intensity: 0.48,
        state: StormState::Forming,
        born_ms: 0,
        ttl_ms: 20_000,
        last_support_ms: 0,
        cohort: 6,
    }];

    let mut reports = Vec::new();
    registry.update(&frame(12.0, &hotspots, &storms), &mut reports);
    assert!(reports.iter().all(|report| report.outcome.is_ok()));

    {
        let scene = scene.borrow();
        assert_eq!(scene.attached_count(PrimitiveKind::Halo), 1);
        assert_eq!(scene.attached_count(PrimitiveKind::Sprite), 1);
        assert_eq!(scene.stats().created, 2);
    }
    let published = layers
        .borrow()
        .layer(CONVERGENCE_LAYER_ID)
        .cloned()
        .expect("layer mounted");
    assert_eq!(published.features.len(), 1);

    registry.update(&frame(10.0, &hotspots, &storms), &mut reports);
    assert_eq!(scene.borrow().attached_count(PrimitiveKind::Sprite), 0);
    assert_eq!(scene.borrow().attached_count(PrimitiveKind::Halo), 0);
    assert_eq!(layers.borrow().mounted_count(), 0);

    registry.destroy();
    assert!(scene.borrow().is_empty());
    assert_eq!(scene.borrow().stats().destroyed, 2);
}
