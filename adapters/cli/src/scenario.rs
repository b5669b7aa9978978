//! JSON scenarios replayed by the command-line runner.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crowd_field_core::{Command, ConvergencePrediction, GeoPoint, OverlayControlsPatch, TileRecord};
use serde::Deserialize;
use thiserror::Error;

/// Failures while loading a scenario file.
#[derive(Debug, Error)]
pub(crate) enum ScenarioError {
    #[error("failed to read scenario {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse scenario {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("camera center [{lng}, {lat}] cannot be projected")]
    InvalidCenter { lng: f64, lat: f64 },
}

/// Scripted input for a headless run.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct Scenario {
    /// Camera center as `[lng, lat]`; world pixels are used when absent.
    pub(crate) center: Option<[f64; 2]>,
    /// Zoom applied before the first frame.
    pub(crate) zoom: Option<f32>,
    pub(crate) controls: OverlayControlsPatch,
    /// Tile batch delivered before the first frame.
    pub(crate) tiles: Vec<TileRecord>,
    pub(crate) frames: Vec<ScenarioFrame>,
}

/// Inputs delivered right before one frame runs.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct ScenarioFrame {
    pub(crate) zoom: Option<f32>,
    pub(crate) tiles: Option<Vec<TileRecord>>,
    /// Replaces the current predictions; absent keeps the previous ones.
    pub(crate) predictions: Option<Vec<ConvergencePrediction>>,
}

impl Scenario {
    pub(crate) fn load(path: &Path) -> Result<Self, ScenarioError> {
        let text = fs::read_to_string(path).map_err(|source| ScenarioError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    pub(crate) fn parse(text: &str, path: &Path) -> Result<Self, ScenarioError> {
        let scenario: Self =
            serde_json::from_str(text).map_err(|source| ScenarioError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if let Some([lng, lat]) = scenario.center {
            if !GeoPoint::new(lng, lat).is_projectable() {
                return Err(ScenarioError::InvalidCenter { lng, lat });
            }
        }
        Ok(scenario)
    }

    pub(crate) fn center(&self) -> Option<GeoPoint> {
        self.center.map(|[lng, lat]| GeoPoint::new(lng, lat))
    }

    /// Number of frames run when the caller does not choose one.
    pub(crate) fn default_frame_count(&self) -> usize {
        self.frames.len().max(1)
    }

    /// Expands the scenario into the engine commands of `frame_count` frames.
    ///
    /// `zoom` overrides every zoom the scenario sets.
    pub(crate) fn commands(
        &self,
        frame_count: usize,
        frame: Duration,
        zoom: Option<f32>,
    ) -> Vec<Command> {
        let mut commands = Vec::new();
        if self.controls != OverlayControlsPatch::default() {
            commands.push(Command::SetOverlayControls {
                patch: self.controls.clone(),
            });
        }
        if let Some(zoom) = zoom.or(self.zoom) {
            commands.push(Command::SetZoom { zoom });
        }
        if !self.tiles.is_empty() {
            commands.push(Command::IngestTiles {
                batch: self.tiles.clone(),
            });
        }

        for index in 0..frame_count {
            if let Some(step) = self.frames.get(index) {
                if zoom.is_none() {
                    if let Some(zoom) = step.zoom {
                        commands.push(Command::SetZoom { zoom });
                    }
                }
                if let Some(batch) = &step.tiles {
                    commands.push(Command::IngestTiles {
                        batch: batch.clone(),
                    });
                }
                if let Some(predictions) = &step.predictions {
                    commands.push(Command::IngestPredictions {
                        predictions: predictions.clone(),
                    });
                }
            }
            commands.push(Command::Tick { dt: frame });
        }
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: Duration = Duration::from_millis(16);

    fn parse(text: &str) -> Result<Scenario, ScenarioError> {
        Scenario::parse(text, Path::new("inline.json"))
    }

    #[test]
    fn empty_document_runs_a_single_idle_frame() {
        let scenario = parse("{}").expect("parsed");

        assert_eq!(scenario.default_frame_count(), 1);
        assert_eq!(
            scenario.commands(scenario.default_frame_count(), FRAME, None),
            [Command::Tick { dt: FRAME }]
        );
    }

    #[test]
    fn frames_deliver_their_inputs_before_ticking() {
        let scenario = parse(
            r#"{
                "zoom": 12.0,
                "controls": { "dim": true },
                "frames": [
                    { "predictions": [
                        { "id": "a", "meeting_point": [10.0, 20.0], "eta_ms": 1000,
                          "confidence": 0.5, "participants": 3 }
                    ] },
                    { "zoom": 15.0 }
                ]
            }"#,
        )
        .expect("parsed");

        let commands = scenario.commands(3, FRAME, None);

        assert!(matches!(commands[0], Command::SetOverlayControls { .. }));
        assert_eq!(commands[1], Command::SetZoom { zoom: 12.0 });
        assert!(matches!(
            &commands[2],
            Command::IngestPredictions { predictions } if predictions.len() == 1
        ));
        assert_eq!(commands[3], Command::Tick { dt: FRAME });
        assert_eq!(commands[4], Command::SetZoom { zoom: 15.0 });
        assert_eq!(commands[5], Command::Tick { dt: FRAME });
        assert_eq!(commands[6], Command::Tick { dt: FRAME });
        assert_eq!(commands.len(), 7);
    }

    #[test]
    fn zoom_override_replaces_scripted_zooms() {
        let scenario =
            parse(r#"{ "zoom": 12.0, "frames": [{ "zoom": 9.0 }] }"#).expect("parsed");

        let commands = scenario.commands(1, FRAME, Some(16.0));

        assert_eq!(
            commands,
            [Command::SetZoom { zoom: 16.0 }, Command::Tick { dt: FRAME }]
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let error = parse(r#"{ "tile": [] }"#).expect_err("typo must fail");
        assert!(matches!(error, ScenarioError::Parse { .. }));
    }

    #[test]
    fn polar_center_is_rejected() {
        let error = parse(r#"{ "center": [0.0, 89.5] }"#).expect_err("pole");
        assert!(matches!(error, ScenarioError::InvalidCenter { .. }));
    }

    #[test]
    fn missing_file_reports_its_path() {
        let error = Scenario::load(Path::new("does/not/exist.json")).expect_err("missing");
        assert!(error.to_string().contains("does/not/exist.json"));
    }
}
