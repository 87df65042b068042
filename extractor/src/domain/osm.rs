//! Typed OSM elements as delivered by one Overpass response.
//!
//! Overpass returns a flat list of loosely typed records. After decoding,
//! each record is one [`OsmElement`] variant with the fields its kind
//! requires, so classification code can match exhaustively instead of
//! probing optional keys.

use std::collections::BTreeMap;
use std::fmt;

use super::geo::Coordinate;

/// Raw OSM identifier.
pub type OsmId = i64;

/// OSM tag mapping with unique keys.
pub type Tags = BTreeMap<String, String>;

/// Discriminant of an OSM element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementKind {
    /// Point element.
    Node,
    /// Ordered node sequence.
    Way,
    /// Tagged collection of members.
    Relation,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Node => "node",
            Self::Way => "way",
            Self::Relation => "relation",
        })
    }
}

/// Arena key: ids are only unique within one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementKey {
    /// Element kind.
    pub kind: ElementKind,
    /// Element id within its kind.
    pub id: OsmId,
}

/// A tagged point.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Node id.
    pub id: OsmId,
    /// Node tags.
    pub tags: Tags,
    /// Position; `None` for id-only bodies or rejected values.
    pub coordinate: Option<Coordinate>,
}

/// How a way describes its path.
#[derive(Debug, Clone, PartialEq)]
pub enum WayPath {
    /// Node ids to be dereferenced through the node index.
    NodeRefs(Vec<OsmId>),
    /// Coordinates inlined by an `out geom` query.
    Inline(Vec<Coordinate>),
}

/// A tagged line segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Way {
    /// Way id.
    pub id: OsmId,
    /// Way tags.
    pub tags: Tags,
    /// Path description.
    pub path: WayPath,
}

/// Kind of a relation member; members may point at kinds this model skips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    /// Member is a node.
    Node,
    /// Member is a way.
    Way,
    /// Member is another relation.
    Relation,
    /// Any other member type string.
    Other,
}

/// One relation member reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Referenced element kind.
    pub kind: MemberKind,
    /// Referenced element id.
    pub reference: OsmId,
    /// Role string, possibly empty.
    pub role: String,
}

/// A tagged collection of members.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    /// Relation id.
    pub id: OsmId,
    /// Relation tags.
    pub tags: Tags,
    /// Ordered members.
    pub members: Vec<Member>,
}

/// One decoded OSM element.
#[derive(Debug, Clone, PartialEq)]
pub enum OsmElement {
    /// Node element.
    Node(Node),
    /// Way element.
    Way(Way),
    /// Relation element.
    Relation(Relation),
}

impl OsmElement {
    /// Arena key of this element.
    pub const fn key(&self) -> ElementKey {
        match self {
            Self::Node(node) => ElementKey {
                kind: ElementKind::Node,
                id: node.id,
            },
            Self::Way(way) => ElementKey {
                kind: ElementKind::Way,
                id: way.id,
            },
            Self::Relation(relation) => ElementKey {
                kind: ElementKind::Relation,
                id: relation.id,
            },
        }
    }

    /// Element tags.
    pub const fn tags(&self) -> &Tags {
        match self {
            Self::Node(node) => &node.tags,
            Self::Way(way) => &way.tags,
            Self::Relation(relation) => &relation.tags,
        }
    }
}

/// Response metadata carried alongside the elements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentMeta {
    /// Overpass `generator` string.
    pub generator: Option<String>,
    /// `osm3s.timestamp_osm_base` of the answering server.
    pub osm_base: Option<String>,
    /// Server remark, usually a warning or runtime error.
    pub remark: Option<String>,
}

/// Element-level problems found while decoding, counted rather than fatal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Elements whose coordinate values were present but unusable.
    pub malformed_coordinates: usize,
    /// Records of a type this model does not represent.
    pub skipped_elements: usize,
}

/// Elements of one (possibly merged) fetch stage, immutable once parsed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDocument {
    elements: Vec<OsmElement>,
    meta: DocumentMeta,
    stats: DecodeStats,
}

impl RawDocument {
    /// Wrap decoded elements.
    pub const fn new(elements: Vec<OsmElement>, meta: DocumentMeta, stats: DecodeStats) -> Self {
        Self {
            elements,
            meta,
            stats,
        }
    }

    /// Elements in delivery order.
    pub fn elements(&self) -> &[OsmElement] {
        &self.elements
    }

    /// Response metadata.
    pub const fn meta(&self) -> &DocumentMeta {
        &self.meta
    }

    /// Decode-time problem counts.
    pub const fn stats(&self) -> DecodeStats {
        self.stats
    }

    /// Ids of every relation in the document, in delivery order.
    pub fn relation_ids(&self) -> Vec<OsmId> {
        self.elements
            .iter()
            .filter_map(|element| match element {
                OsmElement::Relation(relation) => Some(relation.id),
                OsmElement::Node(_) | OsmElement::Way(_) => None,
            })
            .collect()
    }

    /// Append the elements of `other` after this document's elements.
    ///
    /// Metadata of `self` is kept; counts are summed. Duplicate keys are left
    /// in place and resolved by the element index (later wins).
    #[must_use]
    pub fn merged_with(self, other: Self) -> Self {
        let mut elements = self.elements;
        elements.extend(other.elements);
        Self {
            elements,
            meta: self.meta,
            stats: DecodeStats {
                malformed_coordinates: self.stats.malformed_coordinates
                    + other.stats.malformed_coordinates,
                skipped_elements: self.stats.skipped_elements + other.stats.skipped_elements,
            },
        }
    }
}
