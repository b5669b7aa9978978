use std::{cell::RefCell, rc::Rc, time::Duration};

use crowd_field_core::{
    ClearReason, Command, ConvergencePrediction, Event, OverlayControlsPatch, OverlayKind,
    StormEvent, StormState, TileErrorKind, TileRecord, VelocityRecord,
};
use crowd_field_engine::{self as engine, query, Engine, EngineConfig};
use crowd_field_rendering::{
    share, PrimitiveKind, SharedLayers, SharedScene, CONVERGENCE_LAYER_ID,
};
use crowd_field_rendering_headless::{HeadlessScene, RecordingLayerManager};
use crowd_field_system_telemetry::{
    Config as TelemetryConfig, FrameStatus, TelemetryReport, TelemetrySink,
};
use glam::Vec2;

const FRAME: Duration = Duration::from_millis(16);

struct Harness {
    engine: Engine<HeadlessScene>,
    scene: SharedScene<HeadlessScene>,
    layers: Rc<RefCell<RecordingLayerManager>>,
}

impl Harness {
    fn new() -> Self {
        let scene = share(HeadlessScene::new());
        let layers = Rc::new(RefCell::new(RecordingLayerManager::new()));
        let shared: SharedLayers = layers.clone();
        let engine = Engine::new(EngineConfig::default(), scene.clone(), shared);
        Self {
            engine,
            scene,
            layers,
        }
    }

    fn apply(&mut self, command: Command) -> Vec<Event> {
        let mut events = Vec::new();
        engine::apply(&mut self.engine, command, &mut events);
        events
    }

    fn tick(&mut self) -> Vec<Event> {
        self.apply(Command::Tick { dt: FRAME })
    }
}

fn prediction(id: &str, x: f32, y: f32, participants: u32) -> ConvergencePrediction {
    ConvergencePrediction::new(id, Vec2::new(x, y), 30_000, 0.8, participants)
}

fn scenario_predictions() -> Vec<ConvergencePrediction> {
    vec![
        prediction("a", 100.0, 100.0, 2),
        prediction("b", 105.0, 96.0, 2),
        prediction("c", 100.0, 100.0, 2),
        prediction("far", 500.0, 500.0, 2),
    ]
}

fn tile_record(cell: &str, crowd_count: i64) -> TileRecord {
    TileRecord {
        cell: Some(cell.to_owned()),
        centroid: Some([24.94, 60.17]),
        crowd_count: Some(crowd_count),
        avg_mood: Some(vec![0.2, 0.1, 0.0]),
        velocity: Some(VelocityRecord {
            vx: Some(1.0),
            vy: Some(0.5),
            confidence: Some(0.9),
            ..VelocityRecord::default()
        }),
        movement_mode: Some("walking".to_owned()),
        momentum: Some(0.9),
        ..TileRecord::default()
    }
}

#[test]
fn tick_runs_the_pipeline_in_order() {
    let mut harness = Harness::new();
    let _ = harness.apply(Command::SetZoom { zoom: 12.0 });
    let _ = harness.apply(Command::IngestPredictions {
        predictions: scenario_predictions(),
    });

    let events = harness.tick();

    assert!(matches!(events.first(), Some(Event::TimeAdvanced { dt }) if *dt == FRAME));
    assert!(events.contains(&Event::HotspotsDetected { count: 1 }));
    assert!(events.contains(&Event::Storm(StormEvent::Formed {
        id: "STM_1:1".into()
    })));
    assert!(matches!(
        events.last(),
        Some(Event::FrameCompleted { frame: 1, .. })
    ));

    let hotspots = query::hotspots(&harness.engine);
    assert_eq!(hotspots.len(), 1);
    assert!((hotspots[0].weight - 0.48).abs() < 1e-6);

    let storms = query::storms(&harness.engine);
    assert_eq!(storms.len(), 1);
    assert_eq!(storms[0].state, StormState::Forming);
    assert_eq!(storms[0].cohort, 6);

    let scene = harness.scene.borrow();
    assert_eq!(scene.attached_count(PrimitiveKind::Sprite), 1);
    assert_eq!(scene.attached_count(PrimitiveKind::Halo), 1);
    assert_eq!(scene.attached_count(PrimitiveKind::Burst), 1, "ripple on new hotspot");

    let layers = harness.layers.borrow();
    let features = layers.layer(CONVERGENCE_LAYER_ID).expect("mounted");
    assert_eq!(features.features.len(), 1);
    assert_eq!(features.features[0].id, "CAS_1:1");
}

#[test]
fn tile_batches_are_validated_on_the_next_frame() {
    let mut harness = Harness::new();
    let _ = harness.apply(Command::IngestTiles {
        batch: vec![
            tile_record("a", 12),
            tile_record("b", 3),
            tile_record("a", 20),
        ],
    });
    assert!(query::tiles(&harness.engine).is_empty());

    let events = harness.tick();

    assert!(events.contains(&Event::TilesAccepted { count: 1 }));
    let rejected: Vec<(usize, &TileErrorKind)> = events
        .iter()
        .filter_map(|event| match event {
            Event::TileRejected { error } => Some((error.index, &error.kind)),
            _ => None,
        })
        .collect();
    assert_eq!(rejected.len(), 2);
    assert_eq!(rejected[0].0, 1);
    assert!(matches!(
        rejected[0].1,
        TileErrorKind::BelowAnonymityMinimum { count: 3, .. }
    ));
    assert_eq!(rejected[1], (2, &TileErrorKind::DuplicateCell));

    let events = harness.tick();
    assert!(!events
        .iter()
        .any(|event| matches!(event, Event::TilesAccepted { .. })));
    assert_eq!(query::tiles(&harness.engine).len(), 1);
}

#[test]
fn momentum_arrows_need_zoom_and_debounce() {
    let mut harness = Harness::new();
    let _ = harness.apply(Command::SetZoom { zoom: 14.0 });
    let _ = harness.apply(Command::IngestTiles {
        batch: vec![tile_record("a", 12)],
    });

    for _ in 0..2 {
        let _ = harness.tick();
        assert_eq!(harness.scene.borrow().attached_count(PrimitiveKind::Arrow), 0);
    }
    let _ = harness.tick();
    assert_eq!(harness.scene.borrow().attached_count(PrimitiveKind::Arrow), 1);

    let _ = harness.apply(Command::SetZoom { zoom: 12.0 });
    let events = harness.tick();

    assert!(events.contains(&Event::OverlayCleared {
        kind: OverlayKind::Momentum,
        reason: ClearReason::ZoomBelowMinimum,
    }));
    assert_eq!(harness.scene.borrow().attached_count(PrimitiveKind::Arrow), 0);
}

#[test]
fn small_cohorts_never_reach_the_scene() {
    let mut harness = Harness::new();
    let _ = harness.apply(Command::SetZoom { zoom: 18.0 });
    let _ = harness.apply(Command::IngestPredictions {
        predictions: vec![
            prediction("a", 100.0, 100.0, 1),
            prediction("b", 101.0, 99.0, 1),
            prediction("c", 99.0, 101.0, 2),
        ],
    });

    for _ in 0..30 {
        let _ = harness.tick();
    }

    assert_eq!(query::hotspots(&harness.engine).len(), 1);
    assert_eq!(query::hotspots(&harness.engine)[0].participants, 4);
    assert!(harness.scene.borrow().is_empty());
    let layers = harness.layers.borrow();
    assert!(layers
        .layer(CONVERGENCE_LAYER_ID)
        .is_some_and(|features| features.is_empty()));
}

#[test]
fn zooming_out_clears_every_drawn_overlay() {
    let mut harness = Harness::new();
    let _ = harness.apply(Command::SetZoom { zoom: 12.0 });
    let _ = harness.apply(Command::IngestPredictions {
        predictions: scenario_predictions(),
    });
    let _ = harness.tick();

    let _ = harness.apply(Command::SetZoom { zoom: 9.0 });
    let events = harness.tick();

    let cleared: Vec<OverlayKind> = events
        .iter()
        .filter_map(|event| match event {
            Event::OverlayCleared { kind, reason } => {
                assert_eq!(*reason, ClearReason::ZoomBelowMinimum);
                Some(*kind)
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        cleared,
        [
            OverlayKind::Storm,
            OverlayKind::Convergence,
            OverlayKind::Ripple,
            OverlayKind::Aurora
        ]
    );
    assert_eq!(harness.scene.borrow().attached_count(PrimitiveKind::Halo), 0);
    assert_eq!(harness.layers.borrow().mounted_count(), 0);
}

#[test]
fn overlay_controls_are_shared_through_the_style_bus() {
    let mut harness = Harness::new();
    let bus = query::style_bus(&harness.engine);
    let notified = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&notified);
    let _ = bus.subscribe(move |controls| sink.borrow_mut().push(controls.dim));

    let _ = harness.apply(Command::SetOverlayControls {
        patch: OverlayControlsPatch {
            dim: Some(true),
            dim_factor: Some(3.0),
            ..OverlayControlsPatch::default()
        },
    });

    let controls = query::overlay_controls(&harness.engine);
    assert!(controls.dim);
    assert_eq!(controls.dim_factor, 1.0);
    assert_eq!(*notified.borrow(), [true]);
}

#[test]
fn shutdown_is_idempotent_and_releases_everything() {
    let mut harness = Harness::new();
    let _ = harness.apply(Command::SetZoom { zoom: 12.0 });
    let _ = harness.apply(Command::IngestPredictions {
        predictions: scenario_predictions(),
    });
    let _ = harness.tick();
    assert!(!harness.scene.borrow().is_empty());

    let events = harness.apply(Command::Shutdown);
    assert_eq!(events.len(), OverlayKind::ALL.len());
    assert!(events.iter().all(|event| matches!(
        event,
        Event::OverlayCleared {
            reason: ClearReason::Shutdown,
            ..
        }
    )));
    assert!(harness.scene.borrow().is_empty());
    assert_eq!(harness.layers.borrow().mounted_count(), 0);
    assert!(query::is_shut_down(&harness.engine));

    assert!(harness.apply(Command::Shutdown).is_empty());
    assert!(harness.tick().is_empty());
    assert!(harness.scene.borrow().is_empty());
}

struct SharedSink(Rc<RefCell<Vec<TelemetryReport>>>);

impl TelemetrySink for SharedSink {
    fn publish(&mut self, report: &TelemetryReport) -> anyhow::Result<()> {
        self.0.borrow_mut().push(report.clone());
        anyhow::bail!("uplink offline")
    }
}

#[test]
fn telemetry_reports_reach_the_sink_without_disturbing_frames() {
    let reports = Rc::new(RefCell::new(Vec::new()));
    let config = EngineConfig {
        telemetry: TelemetryConfig::new(1.0, Duration::from_secs(1), 64, 3),
        ..EngineConfig::default()
    };
    let layers: SharedLayers = Rc::new(RefCell::new(RecordingLayerManager::new()));
    let mut engine = Engine::new(config, share(HeadlessScene::new()), layers)
        .with_telemetry_sink(Box::new(SharedSink(Rc::clone(&reports))));

    let mut events = Vec::new();
    for _ in 0..4 {
        engine::apply(
            &mut engine,
            Command::Tick {
                dt: Duration::from_millis(500),
            },
            &mut events,
        );
    }

    assert_eq!(query::frame(&engine), 4);
    let reports = reports.borrow();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].samples, 2);
    assert_eq!(reports[0].statuses.get(&FrameStatus::Gated), Some(&2));
}
