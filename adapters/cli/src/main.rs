#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Command-line runner that replays a Crowd Field scenario on a headless
//! scene and prints what the overlays produced.

mod scenario;

use std::{cell::RefCell, path::PathBuf, rc::Rc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use crowd_field_core::{Command, Event, StormEvent};
use crowd_field_engine::{self as engine, query, Engine, EngineConfig};
use crowd_field_rendering::{share, FeatureCollection, PrimitiveKind, SharedLayers};
use crowd_field_rendering_headless::{HeadlessScene, RecordingLayerManager};
use glam::Vec2;

use crate::scenario::Scenario;

/// Viewport used when the scenario centers the camera.
const VIEWPORT: Vec2 = Vec2::new(1280.0, 720.0);

#[derive(Parser, Debug)]
#[command(author, version, about = "Replays a Crowd Field scenario headlessly", long_about = None)]
struct Args {
    /// Path to the scenario JSON file
    scenario: PathBuf,

    /// Number of frames to run (defaults to the scenario's frame count)
    #[arg(long)]
    frames: Option<usize>,

    /// Simulated duration of each frame in milliseconds
    #[arg(long, default_value_t = 16)]
    frame_ms: u64,

    /// Map zoom overriding every zoom set by the scenario
    #[arg(long)]
    zoom: Option<f32>,
}

/// Totals gathered from the engine events of a run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Summary {
    frames: u64,
    tiles_accepted: usize,
    tiles_rejected: usize,
    storms_formed: usize,
    storms_removed: usize,
    overlays_cleared: usize,
}

impl Summary {
    fn tally(&mut self, events: &[Event]) {
        for event in events {
            match event {
                Event::TilesAccepted { count } => self.tiles_accepted = *count,
                Event::TileRejected { error } => {
                    log::warn!("{error}");
                    self.tiles_rejected += 1;
                }
                Event::Storm(StormEvent::Formed { .. }) => self.storms_formed += 1,
                Event::Storm(StormEvent::Removed { .. }) => self.storms_removed += 1,
                Event::OverlayCleared { .. } => self.overlays_cleared += 1,
                Event::FrameCompleted { frame, .. } => self.frames = *frame,
                _ => {}
            }
        }
    }
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();
    let scenario = Scenario::load(&args.scenario)?;
    let frame_count = args
        .frames
        .unwrap_or_else(|| scenario.default_frame_count());

    let scene = share(match scenario.center() {
        Some(center) => HeadlessScene::centered(center, VIEWPORT),
        None => HeadlessScene::new(),
    });
    let layers = Rc::new(RefCell::new(RecordingLayerManager::new()));
    let shared: SharedLayers = layers.clone();
    let mut engine = Engine::new(EngineConfig::default(), scene.clone(), shared);

    let mut summary = Summary::default();
    let mut events = Vec::new();
    let commands = scenario.commands(frame_count, Duration::from_millis(args.frame_ms), args.zoom);
    for command in commands {
        engine::apply(&mut engine, command, &mut events);
        summary.tally(&events);
        events.clear();
    }

    println!("=== summary ===");
    println!("frames:           {}", summary.frames);
    println!("zoom:             {}", query::zoom(&engine));
    println!(
        "tiles:            {} accepted, {} rejected",
        summary.tiles_accepted, summary.tiles_rejected
    );
    println!("hotspots:         {}", query::hotspots(&engine).len());
    println!(
        "storms:           {} live, {} formed, {} removed",
        query::storms(&engine).len(),
        summary.storms_formed,
        summary.storms_removed
    );
    println!("overlays cleared: {}", summary.overlays_cleared);
    {
        let scene = scene.borrow();
        for kind in [
            PrimitiveKind::Arrow,
            PrimitiveKind::Halo,
            PrimitiveKind::Sprite,
            PrimitiveKind::Burst,
        ] {
            println!(
                "{:<18}{}",
                format!("{kind:?}:").to_lowercase(),
                scene.attached_count(kind)
            );
        }
    }

    let published = layers
        .borrow()
        .last_published()
        .cloned()
        .unwrap_or_default();
    print_features(&published)?;

    engine::apply(&mut engine, Command::Shutdown, &mut events);
    log::info!("released {} primitives", scene.borrow().stats().destroyed);
    Ok(())
}

fn print_features(features: &FeatureCollection) -> Result<()> {
    println!("=== convergence ===");
    println!(
        "{}",
        serde_json::to_string_pretty(features).context("failed to encode convergence layer")?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use crowd_field_core::{ClearReason, OverlayKind, StormRemoval};

    use super::*;

    #[test]
    fn summary_counts_engine_events() {
        let mut summary = Summary::default();
        summary.tally(&[
            Event::TilesAccepted { count: 3 },
            Event::Storm(StormEvent::Formed { id: "a".into() }),
            Event::Storm(StormEvent::Removed {
                id: "a".into(),
                reason: StormRemoval::Faded,
            }),
            Event::OverlayCleared {
                kind: OverlayKind::Storm,
                reason: ClearReason::ZoomBelowMinimum,
            },
            Event::FrameCompleted {
                frame: 7,
                spent: Duration::ZERO,
            },
        ]);

        assert_eq!(
            summary,
            Summary {
                frames: 7,
                tiles_accepted: 3,
                tiles_rejected: 0,
                storms_formed: 1,
                storms_removed: 1,
                overlays_cleared: 1,
            }
        );
    }

    #[test]
    fn args_accept_overrides() {
        let args = Args::try_parse_from([
            "crowd-field",
            "plaza.json",
            "--frames",
            "30",
            "--zoom",
            "14.5",
        ])
        .expect("valid arguments");

        assert_eq!(args.frames, Some(30));
        assert_eq!(args.frame_ms, 16);
        assert_eq!(args.zoom, Some(14.5));
    }
}
