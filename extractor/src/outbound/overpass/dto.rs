//! DTOs for decoding Overpass JSON documents.
//!
//! The adapter decodes into these transport DTOs first, then maps into domain
//! elements in one pass. Coordinate values are read loosely so a single bad
//! value is counted instead of failing the whole document.

use serde::Deserialize;
use serde_json::Value;

use crate::domain::{
    Coordinate, DecodeStats, DocumentMeta, Member, MemberKind, Node, OsmElement, RawDocument,
    Relation, Tags, Way, WayPath,
};

#[derive(Debug, Deserialize)]
pub(super) struct OverpassDocumentDto {
    #[serde(default)]
    pub(super) generator: Option<String>,
    #[serde(default)]
    pub(super) osm3s: Option<Osm3sDto>,
    #[serde(default)]
    pub(super) remark: Option<String>,
    #[serde(default)]
    pub(super) elements: Option<Vec<ElementDto>>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Osm3sDto {
    #[serde(default)]
    pub(super) timestamp_osm_base: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(super) enum ElementDto {
    Node(NodeDto),
    Way(WayDto),
    Relation(RelationDto),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub(super) struct NodeDto {
    id: i64,
    #[serde(default)]
    lat: Option<Value>,
    #[serde(default)]
    lon: Option<Value>,
    #[serde(default)]
    tags: Tags,
}

#[derive(Debug, Deserialize)]
pub(super) struct PointDto {
    #[serde(default)]
    lat: Option<Value>,
    #[serde(default)]
    lon: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WayDto {
    id: i64,
    #[serde(default)]
    nodes: Vec<i64>,
    #[serde(default)]
    geometry: Option<Vec<Option<PointDto>>>,
    #[serde(default)]
    tags: Tags,
}

#[derive(Debug, Deserialize)]
pub(super) struct MemberDto {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "ref")]
    reference: i64,
    #[serde(default)]
    role: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct RelationDto {
    id: i64,
    #[serde(default)]
    members: Vec<MemberDto>,
    #[serde(default)]
    tags: Tags,
}

/// Why a document could not be mapped.
#[derive(Debug)]
pub(super) enum DocumentShapeError {
    MissingElements { remark: Option<String> },
}

impl OverpassDocumentDto {
    pub(super) fn into_domain(self) -> Result<RawDocument, DocumentShapeError> {
        let Some(elements) = self.elements else {
            return Err(DocumentShapeError::MissingElements {
                remark: self.remark,
            });
        };

        let mut stats = DecodeStats::default();
        let mapped = elements
            .into_iter()
            .filter_map(|element| element.into_domain(&mut stats))
            .collect();
        let meta = DocumentMeta {
            generator: self.generator,
            osm_base: self.osm3s.and_then(|osm3s| osm3s.timestamp_osm_base),
            remark: self.remark,
        };
        Ok(RawDocument::new(mapped, meta, stats))
    }
}

impl ElementDto {
    fn into_domain(self, stats: &mut DecodeStats) -> Option<OsmElement> {
        match self {
            Self::Node(node) => Some(OsmElement::Node(Node {
                id: node.id,
                coordinate: loose_coordinate(node.lon.as_ref(), node.lat.as_ref(), stats),
                tags: node.tags,
            })),
            Self::Way(way) => Some(OsmElement::Way(way.into_domain(stats))),
            Self::Relation(relation) => Some(OsmElement::Relation(Relation {
                id: relation.id,
                tags: relation.tags,
                members: relation
                    .members
                    .into_iter()
                    .map(MemberDto::into_domain)
                    .collect(),
            })),
            Self::Unknown => {
                stats.skipped_elements += 1;
                None
            }
        }
    }
}

impl WayDto {
    fn into_domain(self, stats: &mut DecodeStats) -> Way {
        let inline: Vec<Coordinate> = self
            .geometry
            .unwrap_or_default()
            .iter()
            .flatten()
            .filter_map(|point| loose_coordinate(point.lon.as_ref(), point.lat.as_ref(), stats))
            .collect();
        let path = if inline.len() >= 2 {
            WayPath::Inline(inline)
        } else {
            WayPath::NodeRefs(self.nodes)
        };
        Way {
            id: self.id,
            tags: self.tags,
            path,
        }
    }
}

impl MemberDto {
    fn into_domain(self) -> Member {
        let kind = match self.kind.as_str() {
            "node" => MemberKind::Node,
            "way" => MemberKind::Way,
            "relation" => MemberKind::Relation,
            _ => MemberKind::Other,
        };
        Member {
            kind,
            reference: self.reference,
            role: self.role,
        }
    }
}

/// Absent pairs are not an error; present but unusable values are counted.
fn loose_coordinate(
    lon: Option<&Value>,
    lat: Option<&Value>,
    stats: &mut DecodeStats,
) -> Option<Coordinate> {
    let (raw_lon, raw_lat) = match (lon, lat) {
        (None, None) => return None,
        (Some(raw_lon), Some(raw_lat)) => (raw_lon, raw_lat),
        _ => {
            stats.malformed_coordinates += 1;
            return None;
        }
    };
    let parsed = number(raw_lon)
        .zip(number(raw_lat))
        .and_then(|(lon_value, lat_value)| Coordinate::new(lon_value, lat_value).ok());
    if parsed.is_none() {
        stats.malformed_coordinates += 1;
    }
    parsed
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
