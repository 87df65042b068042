//! GeoJSON output layers.
//!
//! Three layers are built from one [`Resolution`]: routes (`LineString`),
//! stations (`Point`), and all (routes then stations). Every collection
//! carries a CRS84 `crs` member, including empty ones, and serialises to the
//! same bytes for the same input.

use std::fmt;

use geojson::{Feature, FeatureCollection, Geometry, JsonObject, JsonValue, Value};
use serde_json::json;

use super::error::ExtractError;
use super::geo::Coordinate;
use super::resolver::{ROUTE_TAGS, RouteRecord, STATION_TAGS, StationRecord};
use super::Resolution;

/// CRS name attached to every layer.
pub const CRS84: &str = "urn:ogc:def:crs:OGC:1.3:CRS84";

/// Which layer a collection holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    /// Route lines.
    Routes,
    /// Station points.
    Stations,
    /// Routes followed by stations.
    All,
}

impl LayerKind {
    /// Every layer, in write order.
    pub const ALL: [Self; 3] = [Self::Routes, Self::Stations, Self::All];

    /// File-name label of the layer.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Routes => "routes",
            Self::Stations => "stations",
            Self::All => "all",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One named feature collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    kind: LayerKind,
    collection: FeatureCollection,
}

impl Layer {
    /// Layer kind.
    pub const fn kind(&self) -> LayerKind {
        self.kind
    }

    /// Number of features.
    pub fn len(&self) -> usize {
        self.collection.features.len()
    }

    /// Whether the layer has no features.
    pub fn is_empty(&self) -> bool {
        self.collection.features.is_empty()
    }

    /// The underlying collection.
    pub const fn collection(&self) -> &FeatureCollection {
        &self.collection
    }

    /// Serialise as compact GeoJSON.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Storage`] if serialisation fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ExtractError> {
        serde_json::to_vec(&self.collection).map_err(|error| {
            ExtractError::storage(format!("failed to serialise {} layer: {error}", self.kind))
        })
    }
}

/// The three layers of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSet {
    /// Route lines.
    pub routes: Layer,
    /// Station points.
    pub stations: Layer,
    /// Routes followed by stations.
    pub all: Layer,
}

impl LayerSet {
    /// Layers in write order.
    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        [&self.routes, &self.stations, &self.all].into_iter()
    }
}

/// Builds output layers from resolved records.
#[derive(Debug, Clone, Copy, Default)]
pub struct LayerAssembler;

impl LayerAssembler {
    /// Build the routes, stations, and all layers.
    pub fn assemble(&self, resolution: &Resolution) -> LayerSet {
        let routes: Vec<Feature> = resolution.routes.iter().map(route_feature).collect();
        let stations: Vec<Feature> = resolution.stations.iter().map(station_feature).collect();
        let all = routes.iter().chain(stations.iter()).cloned().collect();

        LayerSet {
            routes: layer(LayerKind::Routes, routes),
            stations: layer(LayerKind::Stations, stations),
            all: layer(LayerKind::All, all),
        }
    }
}

fn layer(kind: LayerKind, features: Vec<Feature>) -> Layer {
    let mut foreign_members = JsonObject::new();
    foreign_members.insert(
        "crs".to_owned(),
        json!({ "type": "name", "properties": { "name": CRS84 } }),
    );
    Layer {
        kind,
        collection: FeatureCollection {
            bbox: None,
            features,
            foreign_members: Some(foreign_members),
        },
    }
}

fn route_feature(route: &RouteRecord) -> Feature {
    let mut properties = JsonObject::new();
    properties.insert("id".to_owned(), json!(route.way_id));
    for key in ROUTE_TAGS {
        properties.insert(key.to_owned(), tag_value(route.tags.get(key)));
    }
    properties.insert("in_relation".to_owned(), json!(route.in_relation));

    let line = route.coordinates.iter().copied().map(Coordinate::to_position).collect();
    feature(Value::LineString(line), properties)
}

fn station_feature(station: &StationRecord) -> Feature {
    let mut properties = JsonObject::new();
    properties.insert("id".to_owned(), json!(station.node_id));
    properties.insert("name".to_owned(), tag_value(station.name.as_ref()));
    for key in STATION_TAGS {
        properties.insert(key.to_owned(), tag_value(station.tags.get(key)));
    }

    feature(Value::Point(station.coordinate.to_position()), properties)
}

fn feature(value: Value, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(value)),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

fn tag_value(value: Option<&String>) -> JsonValue {
    value.map_or(JsonValue::Null, |text| JsonValue::String(text.clone()))
}
