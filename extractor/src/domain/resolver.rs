//! Turns indexed OSM elements into route lines and station points.
//!
//! Elements that cannot be resolved are never fatal: each problem is a
//! [`PartialElementError`] that is counted in the [`ResolutionReport`] and
//! logged at debug level.

use thiserror::Error;
use tracing::debug;

use super::element_index::{DEFAULT_RELATION_ROUTE_TYPES, ElementIndex};
use super::geo::Coordinate;
use super::osm::{Node, OsmElement, OsmId, Tags, Way, WayPath};

/// Tags copied onto route records.
pub const ROUTE_TAGS: [&str; 5] = ["railway", "subway", "route", "tunnel", "name"];

/// Tags copied onto station records; `name` is carried separately.
pub const STATION_TAGS: [&str; 3] = ["railway", "station", "subway"];

/// Which ways count as route geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePolicy {
    /// `route` values of relations whose way members are included.
    pub relation_route_types: Vec<String>,
    /// Also admit ways whose own tags look like metro track.
    pub union_tagged_ways: bool,
    /// With `union_tagged_ways`, also admit tram track tagged as metro.
    pub include_tram: bool,
}

impl Default for RoutePolicy {
    fn default() -> Self {
        Self {
            relation_route_types: DEFAULT_RELATION_ROUTE_TYPES.map(str::to_owned).to_vec(),
            union_tagged_ways: false,
            include_tram: false,
        }
    }
}

impl RoutePolicy {
    /// Whether a way's own tags admit it under the union rule.
    pub fn admits_tagged_way(&self, tags: &Tags) -> bool {
        if !self.union_tagged_ways {
            return false;
        }
        let tag = |key: &str| tags.get(key).map(String::as_str);
        let subway_yes = tag("subway") == Some("yes");
        let metro_route = matches!(tag("route"), Some("subway" | "light_rail"));

        match tag("railway") {
            Some("subway" | "light_rail" | "rapid_transit") => true,
            Some("rail") if subway_yes || matches!(tag("tunnel"), Some("yes" | "true")) => true,
            Some("tram") if self.include_tram && (subway_yes || metro_route) => true,
            _ => metro_route,
        }
    }
}

/// One way resolved into a line.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteRecord {
    /// Source way id.
    pub way_id: OsmId,
    /// Subset of [`ROUTE_TAGS`] present on the way.
    pub tags: Tags,
    /// Ordered path with at least two distinct positions.
    pub coordinates: Vec<Coordinate>,
    /// True when admitted through relation membership.
    pub in_relation: bool,
}

/// One station node.
#[derive(Debug, Clone, PartialEq)]
pub struct StationRecord {
    /// Source node id.
    pub node_id: OsmId,
    /// `name` tag, when present.
    pub name: Option<String>,
    /// Subset of [`STATION_TAGS`] present on the node.
    pub tags: Tags,
    /// Station position.
    pub coordinate: Coordinate,
}

/// A single element that could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartialElementError {
    /// Fewer than two distinct positions after dereferencing.
    #[error("way {way_id} resolved to {distinct} distinct position(s)")]
    InsufficientPoints {
        /// Offending way.
        way_id: OsmId,
        /// Distinct positions found.
        distinct: usize,
    },
    /// A matching station node has no usable coordinate.
    #[error("station node {node_id} has no coordinate")]
    StationWithoutCoordinate {
        /// Offending node.
        node_id: OsmId,
    },
}

/// Aggregate counts of one resolution run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolutionReport {
    /// Routes admitted through relation membership.
    pub routes_from_relations: usize,
    /// Routes admitted only by their own tags.
    pub routes_from_tags: usize,
    /// Candidate ways dropped for having fewer than two distinct positions.
    pub dropped_ways: usize,
    /// Node references that pointed at no known coordinate.
    pub unresolved_node_refs: usize,
    /// Matching station nodes without a coordinate.
    pub stations_without_coordinate: usize,
    /// Coordinates rejected while decoding the document.
    pub malformed_coordinates: usize,
    /// Records of unknown element types skipped while decoding.
    pub skipped_elements: usize,
    /// Element occurrences replaced by a later duplicate.
    pub duplicates_superseded: usize,
}

impl ResolutionReport {
    fn record(&mut self, problem: &PartialElementError) {
        debug!(%problem, "skipping unresolvable element");
        match problem {
            PartialElementError::InsufficientPoints { .. } => self.dropped_ways += 1,
            PartialElementError::StationWithoutCoordinate { .. } => {
                self.stations_without_coordinate += 1;
            }
        }
    }

    /// Whether anything was dropped or repaired.
    pub const fn has_warnings(&self) -> bool {
        self.dropped_ways
            + self.unresolved_node_refs
            + self.stations_without_coordinate
            + self.malformed_coordinates
            + self.skipped_elements
            + self.duplicates_superseded
            > 0
    }
}

/// Resolved records and their report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Route lines, relation members first.
    pub routes: Vec<RouteRecord>,
    /// Station points in document order.
    pub stations: Vec<StationRecord>,
    /// Aggregate counts.
    pub report: ResolutionReport,
}

/// Classifies and resolves the elements of one indexed document.
#[derive(Debug, Clone, Default)]
pub struct GeometryResolver {
    policy: RoutePolicy,
}

impl GeometryResolver {
    /// Resolver applying `policy`.
    pub const fn new(policy: RoutePolicy) -> Self {
        Self { policy }
    }

    /// The active policy.
    pub const fn policy(&self) -> &RoutePolicy {
        &self.policy
    }

    /// Resolve every winning element of `index`.
    ///
    /// Stations keep document order; routes admitted through relations come
    /// before tag-matched ones.
    ///
    /// # Examples
    /// ```
    /// use transit_extract::domain::{
    ///     DecodeStats, DocumentMeta, ElementIndex, GeometryResolver, RawDocument,
    /// };
    ///
    /// let document = RawDocument::new(Vec::new(), DocumentMeta::default(), DecodeStats::default());
    /// let resolver = GeometryResolver::default();
    /// let index = ElementIndex::build(&document, &resolver.policy().relation_route_types);
    /// let resolution = resolver.resolve(&index);
    /// assert!(resolution.routes.is_empty() && resolution.stations.is_empty());
    /// ```
    pub fn resolve(&self, index: &ElementIndex<'_>) -> Resolution {
        let stats = index.document().stats();
        let mut resolution = Resolution {
            report: ResolutionReport {
                malformed_coordinates: stats.malformed_coordinates,
                skipped_elements: stats.skipped_elements,
                duplicates_superseded: index.superseded(),
                ..ResolutionReport::default()
            },
            ..Resolution::default()
        };

        for element in index.current_elements() {
            match element {
                OsmElement::Way(way) => self.resolve_way(way, index, &mut resolution),
                OsmElement::Node(node) => resolve_station(node, index, &mut resolution),
                OsmElement::Relation(_) => {}
            }
        }
        // Relation members first, tag-matched ways after; stable otherwise.
        resolution.routes.sort_by_key(|route| !route.in_relation);
        resolution
    }

    fn resolve_way(&self, way: &Way, index: &ElementIndex<'_>, resolution: &mut Resolution) {
        let in_relation = index.is_route_member(way.id);
        if !in_relation && !self.policy.admits_tagged_way(&way.tags) {
            return;
        }

        let coordinates = match &way.path {
            WayPath::Inline(points) => points.clone(),
            WayPath::NodeRefs(refs) => {
                let resolved: Vec<Coordinate> = refs
                    .iter()
                    .filter_map(|node_id| index.coordinate(*node_id))
                    .collect();
                resolution.report.unresolved_node_refs += refs.len() - resolved.len();
                resolved
            }
        };

        let distinct = distinct_positions(&coordinates);
        if distinct < 2 {
            resolution.report.record(&PartialElementError::InsufficientPoints {
                way_id: way.id,
                distinct,
            });
            return;
        }

        if in_relation {
            resolution.report.routes_from_relations += 1;
        } else {
            resolution.report.routes_from_tags += 1;
        }
        resolution.routes.push(RouteRecord {
            way_id: way.id,
            tags: select_tags(&way.tags, &ROUTE_TAGS),
            coordinates,
            in_relation,
        });
    }
}

/// Whether a node's tags mark it as a subway station.
pub fn is_station(tags: &Tags) -> bool {
    let tag = |key: &str| tags.get(key).map(String::as_str);
    let subway_station = tag("station") == Some("subway");
    subway_station || (tag("railway") == Some("station") && (tag("subway") == Some("yes")))
}

fn resolve_station(node: &Node, index: &ElementIndex<'_>, resolution: &mut Resolution) {
    if !is_station(&node.tags) {
        return;
    }
    let Some(coordinate) = node.coordinate.or_else(|| index.coordinate(node.id)) else {
        resolution
            .report
            .record(&PartialElementError::StationWithoutCoordinate { node_id: node.id });
        return;
    };
    resolution.stations.push(StationRecord {
        node_id: node.id,
        name: node.tags.get("name").cloned(),
        tags: select_tags(&node.tags, &STATION_TAGS),
        coordinate,
    });
}

fn select_tags(tags: &Tags, keys: &[&str]) -> Tags {
    keys.iter()
        .filter_map(|key| tags.get(*key).map(|value| ((*key).to_owned(), value.clone())))
        .collect()
}

/// Counts distinct positions, stopping at two.
fn distinct_positions(coordinates: &[Coordinate]) -> usize {
    let mut seen: Vec<Coordinate> = Vec::new();
    for coordinate in coordinates {
        if !seen.contains(coordinate) {
            seen.push(*coordinate);
            if seen.len() >= 2 {
                break;
            }
        }
    }
    seen.len()
}
