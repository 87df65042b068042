//! One-pass lookups over a [`RawDocument`].
//!
//! The document is the arena; the index only stores ids and positions into
//! it. When the same `(kind, id)` occurs more than once (merged station
//! answers repeat nodes), the later occurrence wins.

use std::collections::{BTreeSet, HashMap};

use super::geo::Coordinate;
use super::osm::{ElementKey, MemberKind, OsmElement, OsmId, RawDocument};

/// `route` values of relations whose way members count as route ways.
pub const DEFAULT_RELATION_ROUTE_TYPES: [&str; 2] = ["subway", "light_rail"];

/// Node coordinates, route membership, and winning positions of one document.
#[derive(Debug, Clone)]
pub struct ElementIndex<'doc> {
    document: &'doc RawDocument,
    nodes: HashMap<OsmId, Coordinate>,
    route_way_ids: BTreeSet<OsmId>,
    last_position: HashMap<ElementKey, usize>,
    superseded: usize,
}

impl<'doc> ElementIndex<'doc> {
    /// Index `document` in one pass.
    ///
    /// `route_types` selects which relations contribute way members; an
    /// empty slice means no relation does.
    pub fn build(document: &'doc RawDocument, route_types: &[String]) -> Self {
        let mut nodes = HashMap::new();
        let mut last_position = HashMap::new();
        let mut relation_ways: HashMap<OsmId, Vec<OsmId>> = HashMap::new();
        let mut superseded = 0_usize;

        for (position, element) in document.elements().iter().enumerate() {
            if last_position.insert(element.key(), position).is_some() {
                superseded += 1;
            }
            match element {
                OsmElement::Node(node) => {
                    if let Some(coordinate) = node.coordinate {
                        nodes.insert(node.id, coordinate);
                    }
                }
                OsmElement::Relation(relation) => {
                    let matches_route = relation
                        .tags
                        .get("route")
                        .is_some_and(|route| route_types.iter().any(|wanted| wanted == route));
                    let ways = if matches_route {
                        relation
                            .members
                            .iter()
                            .filter(|member| member.kind == MemberKind::Way)
                            .map(|member| member.reference)
                            .collect()
                    } else {
                        Vec::new()
                    };
                    relation_ways.insert(relation.id, ways);
                }
                OsmElement::Way(_) => {}
            }
        }

        let route_way_ids = relation_ways.into_values().flatten().collect();
        Self {
            document,
            nodes,
            route_way_ids,
            last_position,
            superseded,
        }
    }

    /// Coordinate of a node, if the document carried a valid one.
    pub fn coordinate(&self, node_id: OsmId) -> Option<Coordinate> {
        self.nodes.get(&node_id).copied()
    }

    /// Number of nodes with a known coordinate.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Whether a way is a member of a matching route relation.
    pub fn is_route_member(&self, way_id: OsmId) -> bool {
        self.route_way_ids.contains(&way_id)
    }

    /// Way ids referenced by matching route relations, ascending.
    pub const fn route_way_ids(&self) -> &BTreeSet<OsmId> {
        &self.route_way_ids
    }

    /// Number of element occurrences replaced by a later duplicate.
    pub const fn superseded(&self) -> usize {
        self.superseded
    }

    /// Winning occurrences in document order, each `(kind, id)` once.
    pub fn current_elements(&self) -> impl Iterator<Item = &'doc OsmElement> + '_ {
        self.document
            .elements()
            .iter()
            .enumerate()
            .filter(|(position, element)| {
                self.last_position.get(&element.key()) == Some(position)
            })
            .map(|(_, element)| element)
    }

    /// The indexed document.
    pub const fn document(&self) -> &'doc RawDocument {
        self.document
    }
}

#[cfg(test)]
mod tests {
    //! Index construction coverage.

    use super::*;
    use crate::domain::osm::{DecodeStats, DocumentMeta, Member, Node, Relation, Tags, Way, WayPath};
    use rstest::rstest;

    fn node(id: OsmId, lon: f64, lat: f64) -> OsmElement {
        OsmElement::Node(Node {
            id,
            tags: Tags::new(),
            coordinate: Some(Coordinate::new(lon, lat).expect("valid coordinate")),
        })
    }

    fn bare_node(id: OsmId) -> OsmElement {
        OsmElement::Node(Node {
            id,
            tags: Tags::new(),
            coordinate: None,
        })
    }

    fn route(id: OsmId, route: &str, ways: &[OsmId]) -> OsmElement {
        OsmElement::Relation(Relation {
            id,
            tags: Tags::from([("route".to_owned(), route.to_owned())]),
            members: ways
                .iter()
                .map(|way| Member {
                    kind: MemberKind::Way,
                    reference: *way,
                    role: String::new(),
                })
                .chain(std::iter::once(Member {
                    kind: MemberKind::Node,
                    reference: 999,
                    role: "stop".to_owned(),
                }))
                .collect(),
        })
    }

    fn way(id: OsmId) -> OsmElement {
        OsmElement::Way(Way {
            id,
            tags: Tags::new(),
            path: WayPath::NodeRefs(vec![1, 2]),
        })
    }

    fn document(elements: Vec<OsmElement>) -> RawDocument {
        RawDocument::new(elements, DocumentMeta::default(), DecodeStats::default())
    }

    fn default_types() -> Vec<String> {
        DEFAULT_RELATION_ROUTE_TYPES.map(str::to_owned).to_vec()
    }

    #[rstest]
    fn node_map_holds_exactly_nodes_with_coordinates() {
        let doc = document(vec![node(1, -0.1, 51.5), bare_node(2), node(3, -0.2, 51.6)]);
        let index = ElementIndex::build(&doc, &default_types());

        assert_eq!(index.node_count(), 2);
        assert_eq!(
            index.coordinate(3),
            Some(Coordinate::new(-0.2, 51.6).expect("valid"))
        );
        assert_eq!(index.coordinate(2), None);
    }

    #[rstest]
    fn collects_way_members_of_matching_routes_only() {
        let doc = document(vec![
            route(10, "subway", &[100, 101]),
            route(11, "bus", &[200]),
            route(12, "light_rail", &[102]),
        ]);
        let index = ElementIndex::build(&doc, &default_types());

        assert_eq!(
            index.route_way_ids().iter().copied().collect::<Vec<_>>(),
            vec![100, 101, 102]
        );
        assert!(!index.is_route_member(200));
        assert!(!index.is_route_member(999), "node members are ignored");
    }

    #[rstest]
    fn later_occurrences_win() {
        let doc = document(vec![
            node(1, 0.0, 0.0),
            way(5),
            node(1, 1.0, 1.0),
            way(5),
            route(10, "subway", &[5]),
        ]);
        let index = ElementIndex::build(&doc, &default_types());

        assert_eq!(index.superseded(), 2);
        assert_eq!(index.coordinate(1), Some(Coordinate::new(1.0, 1.0).expect("valid")));
        let kept: Vec<_> = index.current_elements().map(OsmElement::key).collect();
        assert_eq!(kept.len(), 3);
        assert!(std::ptr::eq(
            index.current_elements().next().expect("first element"),
            &doc.elements()[2]
        ));
    }

    #[rstest]
    fn later_relation_replaces_earlier_membership() {
        let doc = document(vec![route(10, "subway", &[100]), route(10, "subway", &[101])]);
        let index = ElementIndex::build(&doc, &default_types());

        assert!(!index.is_route_member(100));
        assert!(index.is_route_member(101));
    }

    #[rstest]
    fn coordinate_free_duplicate_keeps_known_position() {
        let doc = document(vec![node(1, 139.0, 35.0), bare_node(1)]);
        let index = ElementIndex::build(&doc, &default_types());
        assert!(index.coordinate(1).is_some());
    }
}
