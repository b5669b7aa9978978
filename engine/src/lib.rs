#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Frame engine that drives the Crowd Field pipeline.
//!
//! The engine owns every system and overlay renderer of a scene. Hosts talk to
//! it exclusively through [`apply`] and the read-only [`query`] module. Each
//! `Tick` runs one animation frame in a fixed order: validate pending tiles,
//! detect hotspots, advance storms, then let every overlay reconcile the
//! scene.

use std::{
    collections::BTreeMap,
    fmt,
    time::{Duration, Instant},
};

use crowd_field_core::{
    CascadeHotspot, ClearReason, Command, ConvergencePrediction, EntityId, Event, OverlayKind,
    StormEvent, StormInput, Tile, TileRecord,
};
use crowd_field_rendering::{
    ConvergenceRenderer, MomentumRenderer, OverlayFrame, OverlayOutcome, OverlayRegistry,
    OverlayReport, Scene, SharedLayers, SharedScene, SpawnEffectRenderer, StormHaloRenderer,
    StyleBus, DEFAULT_AURORA_TTL_MS, DEFAULT_MOMENTUM_THRESHOLD, DEFAULT_RIPPLE_TTL_MS,
};
use crowd_field_system_cascade::{CascadeDetector, Config as CascadeConfig};
use crowd_field_system_hysteresis::{HysteresisManager, DEFAULT_OFF_FRAMES, DEFAULT_ON_FRAMES};
use crowd_field_system_storms::{Config as StormConfig, StormMachine};
use crowd_field_system_telemetry::{
    Config as TelemetryConfig, FrameSample, FrameStatus, NullSink, TelemetrySampler,
    TelemetrySink,
};
use crowd_field_system_tile_validation::validate;
use crowd_field_system_visibility::{GateConfig, LodGate};

/// Prefix of storm identifiers derived from hotspots.
pub const STORM_ID_PREFIX: &str = "STM_";

/// Tuning of every system and renderer owned by an [`Engine`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineConfig {
    /// Convergence detector parameters.
    pub cascade: CascadeConfig,
    /// Storm lifecycle thresholds.
    pub storms: StormConfig,
    /// Zoom and anonymity thresholds per overlay.
    pub gate: GateConfig,
    /// Frame sampling parameters.
    pub telemetry: TelemetryConfig,
    /// Momentum a tile needs before its arrow is considered.
    pub momentum_threshold: f32,
    /// Consecutive frames above the momentum threshold that show an arrow.
    pub debounce_on_frames: u32,
    /// Consecutive frames below the momentum threshold that hide an arrow.
    pub debounce_off_frames: u32,
    /// Lifetime of ripple bursts in milliseconds.
    pub ripple_ttl_ms: u64,
    /// Lifetime of aurora bursts in milliseconds.
    pub aurora_ttl_ms: u64,
    /// Zoom used until the host sends `SetZoom`.
    pub initial_zoom: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cascade: CascadeConfig::default(),
            storms: StormConfig::default(),
            gate: GateConfig::default(),
            telemetry: TelemetryConfig::default(),
            momentum_threshold: DEFAULT_MOMENTUM_THRESHOLD,
            debounce_on_frames: DEFAULT_ON_FRAMES,
            debounce_off_frames: DEFAULT_OFF_FRAMES,
            ripple_ttl_ms: DEFAULT_RIPPLE_TTL_MS,
            aurora_ttl_ms: DEFAULT_AURORA_TTL_MS,
            initial_zoom: 0.0,
        }
    }
}

/// Authoritative state of one rendered scene.
pub struct Engine<S: Scene + 'static> {
    config: EngineConfig,
    scene: SharedScene<S>,
    style: StyleBus,
    registry: OverlayRegistry,
    detector: CascadeDetector,
    storms: StormMachine,
    telemetry: TelemetrySampler,
    sink: Box<dyn TelemetrySink>,
    zoom: f32,
    clock_ms: u64,
    frame: u64,
    pending_batch: Option<Vec<TileRecord>>,
    tiles: Vec<Tile>,
    predictions: Vec<ConvergencePrediction>,
    hotspots: Vec<CascadeHotspot>,
    storm_inputs: Vec<StormInput>,
    storm_events: Vec<StormEvent>,
    reports: Vec<OverlayReport>,
    drawn: BTreeMap<OverlayKind, bool>,
    shut_down: bool,
}

impl<S: Scene + 'static> Engine<S> {
    /// Creates an engine drawing on `scene` and publishing feature layers to
    /// `layers`, with every overlay registered.
    #[must_use]
    pub fn new(config: EngineConfig, scene: SharedScene<S>, layers: SharedLayers) -> Self {
        let style = StyleBus::new();
        let gate = LodGate::new(config.gate);

        let mut registry = OverlayRegistry::new();
        let _ = registry.register(Box::new(MomentumRenderer::with_debounce(
            scene.clone(),
            style.clone(),
            gate,
            config.momentum_threshold,
            HysteresisManager::new(config.debounce_on_frames, config.debounce_off_frames),
        )));
        let _ = registry.register(Box::new(StormHaloRenderer::new(
            scene.clone(),
            style.clone(),
            gate,
        )));
        let _ = registry.register(Box::new(ConvergenceRenderer::new(
            scene.clone(),
            layers,
            style.clone(),
            gate,
        )));
        let _ = registry.register(Box::new(
            SpawnEffectRenderer::ripple(scene.clone(), style.clone(), gate)
                .with_ttl(config.ripple_ttl_ms),
        ));
        let _ = registry.register(Box::new(
            SpawnEffectRenderer::aurora(scene.clone(), style.clone(), gate)
                .with_ttl(config.aurora_ttl_ms),
        ));

        Self {
            scene,
            style,
            registry,
            detector: CascadeDetector::new(config.cascade),
            storms: StormMachine::new(config.storms),
            telemetry: TelemetrySampler::new(config.telemetry),
            sink: Box::new(NullSink),
            zoom: config.initial_zoom,
            clock_ms: 0,
            frame: 0,
            pending_batch: None,
            tiles: Vec::new(),
            predictions: Vec::new(),
            hotspots: Vec::new(),
            storm_inputs: Vec::new(),
            storm_events: Vec::new(),
            reports: Vec::new(),
            drawn: BTreeMap::new(),
            shut_down: false,
            config,
        }
    }

    /// Returns the engine with telemetry reports published to `sink`.
    #[must_use]
    pub fn with_telemetry_sink(mut self, sink: Box<dyn TelemetrySink>) -> Self {
        self.sink = sink;
        self
    }

    fn ingest_pending(&mut self, out_events: &mut Vec<Event>) {
        let Some(batch) = self.pending_batch.take() else {
            return;
        };
        let report = validate(&batch);
        self.tiles = report.tiles;
        out_events.push(Event::TilesAccepted {
            count: self.tiles.len(),
        });
        for error in report.errors {
            log::debug!("{error}");
            out_events.push(Event::TileRejected { error });
        }
    }

    fn derive_storm_inputs(&mut self) {
        self.storm_inputs.clear();
        self.storm_inputs
            .extend(self.hotspots.iter().map(|hotspot| StormInput {
                id: EntityId::new(format!("{STORM_ID_PREFIX}{}", hotspot.bucket)),
                position: hotspot.centroid,
                intensity: hotspot.weight,
                cohort: hotspot.participants,
            }));
    }

    fn run_frame(&mut self, dt: Duration, out_events: &mut Vec<Event>) {
        let started = Instant::now();
        let first_event = out_events.len();
        let dt_ms = u64::try_from(dt.as_millis()).unwrap_or(u64::MAX);
        self.clock_ms = self.clock_ms.saturating_add(dt_ms);
        self.frame = self.frame.saturating_add(1);
        out_events.push(Event::TimeAdvanced { dt });

        self.ingest_pending(out_events);

        self.detector.handle(&self.predictions, &mut self.hotspots);
        out_events.push(Event::HotspotsDetected {
            count: self.hotspots.len(),
        });

        self.derive_storm_inputs();
        self.storm_events.clear();
        let _ = self
            .storms
            .update(&self.storm_inputs, dt, &mut self.storm_events);
        out_events.extend(self.storm_events.iter().cloned().map(Event::Storm));

        let frame = OverlayFrame {
            zoom: self.zoom,
            now_ms: self.clock_ms,
            tiles: &self.tiles,
            hotspots: &self.hotspots,
            storms: self.storms.storms(),
            storm_events: &self.storm_events,
        };
        self.reports.clear();
        self.registry.update(&frame, &mut self.reports);
        let status = self.reconcile_reports(out_events);

        let spent = started.elapsed();
        out_events.push(Event::FrameCompleted {
            frame: self.frame,
            spent,
        });

        let _ = self.telemetry.record(FrameSample {
            event_count: out_events.len() - first_event,
            status,
            frame_spent_ms: spent.as_secs_f32() * 1_000.0,
        });
        let _ = self
            .telemetry
            .maybe_flush(Duration::from_millis(self.clock_ms), self.sink.as_mut());
    }

    fn reconcile_reports(&mut self, out_events: &mut Vec<Event>) -> FrameStatus {
        let mut any_drawn = false;
        let mut all_gated = !self.reports.is_empty();

        for report in &self.reports {
            match report.outcome {
                Ok(OverlayOutcome::Drawn { primitives }) => {
                    all_gated = false;
                    any_drawn |= primitives > 0;
                    let _ = self.drawn.insert(report.kind, true);
                }
                Ok(OverlayOutcome::Gated) => {
                    if self.drawn.insert(report.kind, false) == Some(true) {
                        out_events.push(Event::OverlayCleared {
                            kind: report.kind,
                            reason: ClearReason::ZoomBelowMinimum,
                        });
                    }
                }
                Err(ref error) => {
                    all_gated = false;
                    log::warn!("{} overlay failed: {error}", report.kind.as_str());
                }
            }
        }

        if all_gated {
            FrameStatus::Gated
        } else if any_drawn {
            FrameStatus::Rendering
        } else {
            FrameStatus::Idle
        }
    }

    fn shutdown(&mut self, out_events: &mut Vec<Event>) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.registry.destroy();
        self.storms.clear();
        self.hotspots.clear();
        self.drawn.clear();
        for kind in self.registry.kinds() {
            out_events.push(Event::OverlayCleared {
                kind,
                reason: ClearReason::Shutdown,
            });
        }
        log::info!("engine shut down after {} frames", self.frame);
    }
}

impl<S: Scene + 'static> fmt::Debug for Engine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("zoom", &self.zoom)
            .field("clock_ms", &self.clock_ms)
            .field("frame", &self.frame)
            .field("tiles", &self.tiles.len())
            .field("hotspots", &self.hotspots.len())
            .field("storms", &self.storms.storms().len())
            .field("registry", &self.registry)
            .field("shut_down", &self.shut_down)
            .finish()
    }
}

/// Applies the provided command to the engine, appending resulting events.
///
/// Commands other than `Shutdown` are ignored once the engine has shut down.
pub fn apply<S: Scene + 'static>(
    engine: &mut Engine<S>,
    command: Command,
    out_events: &mut Vec<Event>,
) {
    if engine.shut_down {
        if !matches!(command, Command::Shutdown) {
            log::debug!("ignoring {command:?} after shutdown");
        }
        return;
    }

    match command {
        Command::IngestTiles { batch } => {
            engine.pending_batch = Some(batch);
        }
        Command::IngestPredictions { predictions } => {
            engine.predictions = predictions;
        }
        Command::SetZoom { zoom } => {
            if zoom.is_finite() {
                engine.zoom = zoom;
            } else {
                log::warn!("ignoring non-finite zoom {zoom}");
            }
        }
        Command::SetOverlayControls { patch } => {
            let _ = engine.style.set_overlay_controls(patch);
        }
        Command::Tick { dt } => engine.run_frame(dt, out_events),
        Command::Shutdown => engine.shutdown(out_events),
    }
}

/// Query functions that provide read-only access to the engine state.
pub mod query {
    use crowd_field_core::{CascadeHotspot, OverlayControls, OverlayKind, Storm, Tile};
    use crowd_field_rendering::{Scene, SharedScene, StyleBus};

    use super::{Engine, EngineConfig};

    /// Configuration the engine was created with.
    #[must_use]
    pub fn config<S: Scene + 'static>(engine: &Engine<S>) -> &EngineConfig {
        &engine.config
    }

    /// Tiles accepted from the most recent batch.
    #[must_use]
    pub fn tiles<S: Scene + 'static>(engine: &Engine<S>) -> &[Tile] {
        &engine.tiles
    }

    /// Hotspots detected during the most recent frame.
    #[must_use]
    pub fn hotspots<S: Scene + 'static>(engine: &Engine<S>) -> &[CascadeHotspot] {
        &engine.hotspots
    }

    /// Storms alive after the most recent frame, sorted by identifier.
    #[must_use]
    pub fn storms<S: Scene + 'static>(engine: &Engine<S>) -> &[Storm] {
        engine.storms.storms()
    }

    /// Zoom used by the visibility gate.
    #[must_use]
    pub fn zoom<S: Scene + 'static>(engine: &Engine<S>) -> f32 {
        engine.zoom
    }

    /// Engine clock in milliseconds.
    #[must_use]
    pub fn clock_ms<S: Scene + 'static>(engine: &Engine<S>) -> u64 {
        engine.clock_ms
    }

    /// Number of frames run so far.
    #[must_use]
    pub fn frame<S: Scene + 'static>(engine: &Engine<S>) -> u64 {
        engine.frame
    }

    /// Snapshot of the scene's overlay controls.
    #[must_use]
    pub fn overlay_controls<S: Scene + 'static>(engine: &Engine<S>) -> OverlayControls {
        engine.style.overlay_controls()
    }

    /// Handle to the scene's style bus, for subscribing to control changes.
    #[must_use]
    pub fn style_bus<S: Scene + 'static>(engine: &Engine<S>) -> StyleBus {
        engine.style.clone()
    }

    /// Scene the engine draws on.
    #[must_use]
    pub fn scene<S: Scene + 'static>(engine: &Engine<S>) -> &SharedScene<S> {
        &engine.scene
    }

    /// Overlays registered with the engine, in draw order.
    #[must_use]
    pub fn overlay_kinds<S: Scene + 'static>(engine: &Engine<S>) -> Vec<OverlayKind> {
        engine.registry.kinds().collect()
    }

    /// Reports whether the engine has shut down.
    #[must_use]
    pub fn is_shut_down<S: Scene + 'static>(engine: &Engine<S>) -> bool {
        engine.shut_down
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use crowd_field_rendering::share;
    use crowd_field_rendering_headless::{HeadlessScene, RecordingLayerManager};
    use glam::Vec2;

    use super::*;

    fn engine() -> Engine<HeadlessScene> {
        let layers: SharedLayers = Rc::new(RefCell::new(RecordingLayerManager::new()));
        Engine::new(EngineConfig::default(), share(HeadlessScene::new()), layers)
    }

    #[test]
    fn storm_inputs_follow_hotspot_buckets() {
        let mut engine = engine();
        let mut events = Vec::new();
        let predictions = (0..3)
            .map(|index| {
                ConvergencePrediction::new(
                    format!("p{index}"),
                    Vec2::new(-160.0, 240.0),
                    1_000,
                    1.0,
                    3,
                )
            })
            .collect();
        apply(&mut engine, Command::IngestPredictions { predictions }, &mut events);
        apply(
            &mut engine,
            Command::Tick {
                dt: Duration::from_millis(16),
            },
            &mut events,
        );

        assert_eq!(engine.storm_inputs.len(), 1);
        let input = &engine.storm_inputs[0];
        assert_eq!(input.id.as_str(), "STM_-2:3");
        assert_eq!(input.cohort, 9);
        assert!((input.intensity - 0.6).abs() < 1e-6);
    }

    #[test]
    fn default_zoom_gates_every_overlay() {
        let mut engine = engine();
        let mut events = Vec::new();
        apply(
            &mut engine,
            Command::Tick {
                dt: Duration::from_millis(16),
            },
            &mut events,
        );

        assert!(engine
            .reports
            .iter()
            .all(|report| report.outcome == Ok(OverlayOutcome::Gated)));
        assert_eq!(engine.reconcile_reports(&mut events), FrameStatus::Gated);
    }

    #[test]
    fn non_finite_zoom_is_ignored() {
        let mut engine = engine();
        let mut events = Vec::new();
        apply(&mut engine, Command::SetZoom { zoom: 14.0 }, &mut events);
        apply(&mut engine, Command::SetZoom { zoom: f32::NAN }, &mut events);

        assert_eq!(query::zoom(&engine), 14.0);
        assert!(events.is_empty());
    }
}
