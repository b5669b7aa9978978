use std::{cell::RefCell, rc::Rc};

use serde::{Deserialize, Serialize};

/// External consumer of geometry that is drawn outside the primitive scene,
/// typically a map library's vector layer.
pub trait LayerManager {
    /// Creates the layer `layer_id` with its initial features.
    fn mount(&mut self, layer_id: &str, features: &FeatureCollection) -> anyhow::Result<()>;

    /// Replaces the features of a mounted layer.
    fn update(&mut self, layer_id: &str, features: &FeatureCollection) -> anyhow::Result<()>;

    /// Removes a mounted layer.
    fn unmount(&mut self, layer_id: &str) -> anyhow::Result<()>;
}

/// Layer manager shared between the engine and its host.
pub type SharedLayers = Rc<RefCell<dyn LayerManager>>;

/// GeoJSON-style feature collection handed to a [`LayerManager`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "FeatureCollection")]
pub struct FeatureCollection {
    /// Features in draw order.
    pub features: Vec<Feature>,
    /// Identifier of the viewing user, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewer: Option<String>,
}

impl FeatureCollection {
    /// Reports whether the collection holds no features.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// A single convergence hotspot feature.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "Feature")]
pub struct Feature {
    /// Identifier of the hotspot.
    pub id: String,
    /// Location of the hotspot.
    pub geometry: Geometry,
    /// Attributes of the hotspot.
    pub properties: HotspotProperties,
}

/// Feature geometry.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    /// Single screen-space position `[x, y]` in pixels.
    Point {
        /// Pixel coordinates.
        coordinates: [f64; 2],
    },
}

/// Attributes attached to a hotspot feature.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HotspotProperties {
    /// Cascade weight within `0.0..=1.0`.
    pub weight: f32,
    /// Number of predictions in the hotspot.
    pub members: u32,
    /// Number of people converging.
    pub participants: u32,
    /// Mean time to arrival in milliseconds.
    pub mean_eta_ms: u64,
    /// Mean prediction confidence.
    pub mean_confidence: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_geojson() {
        let collection = FeatureCollection {
            features: vec![Feature {
                id: "CAS_1:1".to_owned(),
                geometry: Geometry::Point {
                    coordinates: [101.5, 98.5],
                },
                properties: HotspotProperties {
                    weight: 0.5,
                    members: 3,
                    participants: 6,
                    mean_eta_ms: 30_000,
                    mean_confidence: 0.5,
                },
            }],
            viewer: None,
        };

        let json = serde_json::to_value(&collection).expect("serializable");

        assert_eq!(json["type"], "FeatureCollection");
        assert_eq!(json["features"][0]["type"], "Feature");
        assert_eq!(json["features"][0]["geometry"]["type"], "Point");
        assert_eq!(json["features"][0]["geometry"]["coordinates"][0], 101.5);
        assert!(json.get("viewer").is_none());

        let decoded: FeatureCollection = serde_json::from_value(json).expect("round trip");
        assert_eq!(decoded, collection);
    }
}
