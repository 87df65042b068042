//! Overpass QL text for the three extraction stages.
//!
//! All builders are pure: the same scope, filter, and ids always produce the
//! same query text. Bounding boxes are validated at construction
//! ([`BoundingBox::new`]); builders add the checks that depend on the other
//! inputs.

use std::time::Duration;

use super::error::ExtractError;
use super::geo::BoundingBox;
use super::osm::OsmId;

/// Relation ids per `relation(id:...)` clause unless configured otherwise.
pub const DEFAULT_MEMBER_BATCH_SIZE: usize = 200;

/// Query stage, used to select server and client timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryClass {
    /// Route relation id discovery.
    RelationIds,
    /// Batched relation bodies with recursive members.
    Members,
    /// Station node discovery.
    Stations,
}

impl QueryClass {
    /// Short stage label used in logs and file names.
    pub const fn label(self) -> &'static str {
        match self {
            Self::RelationIds => "ids",
            Self::Members => "members",
            Self::Stations => "stations",
        }
    }
}

/// Per-stage timeouts; member bodies are orders of magnitude larger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryTimeouts {
    /// Timeout for [`QueryClass::RelationIds`].
    pub relation_ids: Duration,
    /// Timeout for [`QueryClass::Members`].
    pub members: Duration,
    /// Timeout for [`QueryClass::Stations`].
    pub stations: Duration,
}

impl Default for QueryTimeouts {
    fn default() -> Self {
        Self {
            relation_ids: Duration::from_secs(120),
            members: Duration::from_secs(240),
            stations: Duration::from_secs(120),
        }
    }
}

impl QueryTimeouts {
    /// Timeout for one stage.
    pub const fn for_class(&self, class: QueryClass) -> Duration {
        match class {
            QueryClass::RelationIds => self.relation_ids,
            QueryClass::Members => self.members,
            QueryClass::Stations => self.stations,
        }
    }
}

/// Geographic scope of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum SpatialScope {
    /// Rectangular `(south,west,north,east)` filter.
    BoundingBox(BoundingBox),
    /// Administrative boundary looked up by English name and level.
    AdminArea {
        /// Value of the area's `name:en` tag.
        name_en: String,
        /// Value of the area's `admin_level` tag.
        admin_level: u8,
    },
}

impl SpatialScope {
    fn validate(&self) -> Result<(), ExtractError> {
        match self {
            // Already validated by `BoundingBox::new`.
            Self::BoundingBox(_) => Ok(()),
            Self::AdminArea { name_en, .. } if name_en.trim().is_empty() => Err(
                ExtractError::invalid_request("admin area name must not be empty"),
            ),
            Self::AdminArea { .. } => Ok(()),
        }
    }

    fn prelude(&self) -> String {
        match self {
            Self::BoundingBox(_) => String::new(),
            Self::AdminArea {
                name_en,
                admin_level,
            } => format!(
                "area[\"name:en\"=\"{}\"][\"admin_level\"=\"{admin_level}\"]->.scope;\n",
                escape_quoted(name_en)
            ),
        }
    }

    fn filter(&self) -> String {
        match self {
            Self::BoundingBox(bbox) => bbox.to_string(),
            Self::AdminArea { .. } => "(area.scope)".to_owned(),
        }
    }
}

/// Tag filter selecting the target route relations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteFilter {
    /// Accepted `route` tag values, e.g. `subway`, `light_rail`.
    pub route_types: Vec<String>,
    /// Exact `network` tag value, when the city needs one.
    pub network: Option<String>,
}

impl RouteFilter {
    /// Filter for `route=subway` relations of one network.
    pub fn subway_network(network: impl Into<String>) -> Self {
        Self {
            route_types: vec!["subway".to_owned()],
            network: Some(network.into()),
        }
    }

    fn validate(&self) -> Result<(), ExtractError> {
        if self.route_types.is_empty() {
            return Err(ExtractError::invalid_request(
                "route filter must declare at least one route type",
            ));
        }
        if self.route_types.iter().any(|value| value.trim().is_empty()) {
            return Err(ExtractError::invalid_request(
                "route types must not be blank",
            ));
        }
        if self
            .network
            .as_deref()
            .is_some_and(|network| network.trim().is_empty())
        {
            return Err(ExtractError::invalid_request(
                "network filter must not be blank when provided",
            ));
        }
        Ok(())
    }
}

/// Builds stage queries with per-class server timeouts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryBuilder {
    timeouts: QueryTimeouts,
}

impl QueryBuilder {
    /// Builder using explicit timeouts.
    pub const fn new(timeouts: QueryTimeouts) -> Self {
        Self { timeouts }
    }

    /// Query returning only the ids of matching route relations.
    ///
    /// # Examples
    /// ```
    /// use transit_extract::domain::{BoundingBox, QueryBuilder, RouteFilter, SpatialScope};
    ///
    /// let bbox = BoundingBox::new(51.2868, -0.5103, 51.6919, 0.334).expect("valid bbox");
    /// let query = QueryBuilder::default()
    ///     .build_id_query(
    ///         &SpatialScope::BoundingBox(bbox),
    ///         &RouteFilter::subway_network("London Underground"),
    ///     )
    ///     .expect("query builds");
    /// assert!(query.ends_with("out ids;\n"));
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::InvalidRequest`] for a blank area name or an
    /// empty or blank route filter.
    pub fn build_id_query(
        &self,
        scope: &SpatialScope,
        filter: &RouteFilter,
    ) -> Result<String, ExtractError> {
        scope.validate()?;
        filter.validate()?;

        let network = filter
            .network
            .as_deref()
            .map(|value| format!("[\"network\"=\"{}\"]", escape_quoted(value)))
            .unwrap_or_default();
        let area = scope.filter();
        let clauses = filter
            .route_types
            .iter()
            .map(|route| {
                format!(
                    "  relation[\"route\"=\"{}\"]{network}{area};",
                    escape_quoted(route)
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        Ok(format!(
            "{header}{prelude}(\n{clauses}\n);\nout ids;\n",
            header = self.header(QueryClass::RelationIds),
            prelude = scope.prelude(),
        ))
    }

    /// Query returning relation bodies plus all recursive members.
    ///
    /// Ids are split into batches of `batch_size`, one clause per batch, all
    /// inside a single union so the `>;` expansion runs exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::InvalidRequest`] when `ids` is empty or
    /// `batch_size` is zero.
    pub fn build_member_query(
        &self,
        ids: &[OsmId],
        batch_size: usize,
    ) -> Result<String, ExtractError> {
        if ids.is_empty() {
            return Err(ExtractError::invalid_request(
                "member query needs at least one relation id",
            ));
        }
        if batch_size == 0 {
            return Err(ExtractError::invalid_request(
                "member batch size must be greater than zero",
            ));
        }

        let mut query = self.header(QueryClass::Members);
        query.push_str("(\n");
        for batch in ids.chunks(batch_size) {
            let id_list = batch
                .iter()
                .map(OsmId::to_string)
                .collect::<Vec<_>>()
                .join(",");
            query.push_str(&format!("  relation(id:{id_list});\n"));
        }
        query.push_str(");\nout body;\n>;\nout skel qt;\n");
        Ok(query)
    }

    /// Query returning station nodes under either tagging convention.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::InvalidRequest`] for a blank area name.
    pub fn build_station_query(&self, scope: &SpatialScope) -> Result<String, ExtractError> {
        scope.validate()?;
        let area = scope.filter();
        Ok(format!(
            "{header}{prelude}(\n  node[\"station\"=\"subway\"]{area};\n  node[\"railway\"=\"station\"][\"subway\"=\"yes\"]{area};\n);\nout body;\n",
            header = self.header(QueryClass::Stations),
            prelude = scope.prelude(),
        ))
    }

    fn header(&self, class: QueryClass) -> String {
        format!(
            "[out:json][timeout:{}];\n",
            self.timeouts.for_class(class).as_secs().max(1)
        )
    }
}

fn escape_quoted(raw: &str) -> String {
    raw.replace('\\', r"\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    //! Query text coverage for the three stages.

    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn london() -> SpatialScope {
        SpatialScope::BoundingBox(
            BoundingBox::new(51.2868, -0.5103, 51.6919, 0.334).expect("valid bbox"),
        )
    }

    fn batch_sizes(query: &str) -> Vec<usize> {
        query
            .lines()
            .filter_map(|line| line.trim().strip_prefix("relation(id:"))
            .map(|rest| rest.trim_end_matches(");").split(',').count())
            .collect()
    }

    #[rstest]
    fn id_query_filters_route_and_network_within_bbox(london: SpatialScope) {
        let query = QueryBuilder::default()
            .build_id_query(&london, &RouteFilter::subway_network("London Underground"))
            .expect("query builds");

        assert_eq!(
            query,
            "[out:json][timeout:120];\n(\n  relation[\"route\"=\"subway\"][\"network\"=\"London Underground\"](51.2868,-0.5103,51.6919,0.334);\n);\nout ids;\n"
        );
    }

    #[rstest]
    fn id_query_unions_route_types_over_admin_area() {
        let scope = SpatialScope::AdminArea {
            name_en: "Tokyo".to_owned(),
            admin_level: 4,
        };
        let filter = RouteFilter {
            route_types: vec!["subway".to_owned(), "light_rail".to_owned()],
            network: None,
        };
        let query = QueryBuilder::default()
            .build_id_query(&scope, &filter)
            .expect("query builds");

        assert!(query.contains("area[\"name:en\"=\"Tokyo\"][\"admin_level\"=\"4\"]->.scope;"));
        assert!(query.contains("  relation[\"route\"=\"subway\"](area.scope);"));
        assert!(query.contains("  relation[\"route\"=\"light_rail\"](area.scope);"));
        assert!(!query.contains("network"));
    }

    #[rstest]
    #[case::no_routes(RouteFilter { route_types: vec![], network: None })]
    #[case::blank_route(RouteFilter { route_types: vec![" ".to_owned()], network: None })]
    #[case::blank_network(RouteFilter { route_types: vec!["subway".to_owned()], network: Some(String::new()) })]
    fn id_query_rejects_invalid_filters(london: SpatialScope, #[case] filter: RouteFilter) {
        let error = QueryBuilder::default()
            .build_id_query(&london, &filter)
            .expect_err("filter must fail");
        assert!(matches!(error, ExtractError::InvalidRequest { .. }));
    }

    #[rstest]
    fn id_query_escapes_quotes_in_network(london: SpatialScope) {
        let query = QueryBuilder::default()
            .build_id_query(&london, &RouteFilter::subway_network("Metro \"M\""))
            .expect("query builds");
        assert!(query.contains("[\"network\"=\"Metro \\\"M\\\"\"]"));
    }

    #[rstest]
    fn member_query_batches_ids_inside_one_union() {
        let ids: Vec<OsmId> = (1..=450).collect();
        let query = QueryBuilder::default()
            .build_member_query(&ids, DEFAULT_MEMBER_BATCH_SIZE)
            .expect("query builds");

        assert_eq!(batch_sizes(&query), vec![200, 200, 50]);
        assert_eq!(query.matches(">;").count(), 1, "single recursive expansion");
        assert_eq!(query.matches("out body;").count(), 1);
        assert!(query.starts_with("[out:json][timeout:240];\n(\n"));
        assert!(query.ends_with(");\nout body;\n>;\nout skel qt;\n"));
    }

    #[rstest]
    fn member_query_keeps_small_id_sets_in_one_clause() {
        let query = QueryBuilder::default()
            .build_member_query(&[5, 3, 9], 200)
            .expect("query builds");
        assert!(query.contains("  relation(id:5,3,9);\n"));
    }

    #[rstest]
    #[case::empty(&[], 200)]
    #[case::zero_batch(&[1, 2], 0)]
    fn member_query_rejects_degenerate_input(#[case] ids: &[OsmId], #[case] batch_size: usize) {
        let error = QueryBuilder::default()
            .build_member_query(ids, batch_size)
            .expect_err("query must fail");
        assert!(matches!(error, ExtractError::InvalidRequest { .. }));
    }

    #[rstest]
    fn station_query_covers_both_tagging_conventions(london: SpatialScope) {
        let query = QueryBuilder::default()
            .build_station_query(&london)
            .expect("query builds");

        assert!(query.contains("node[\"station\"=\"subway\"](51.2868,-0.5103,51.6919,0.334);"));
        assert!(query.contains(
            "node[\"railway\"=\"station\"][\"subway\"=\"yes\"](51.2868,-0.5103,51.6919,0.334);"
        ));
        assert!(query.ends_with("out body;\n"));
    }

    #[rstest]
    fn headers_follow_configured_timeouts(london: SpatialScope) {
        let builder = QueryBuilder::new(QueryTimeouts {
            relation_ids: Duration::from_secs(30),
            members: Duration::from_secs(600),
            stations: Duration::from_secs(45),
        });
        assert!(
            builder
                .build_station_query(&london)
                .expect("query builds")
                .starts_with("[out:json][timeout:45];")
        );
        assert!(
            builder
                .build_member_query(&[1], 10)
                .expect("query builds")
                .starts_with("[out:json][timeout:600];")
        );
    }

    #[rstest]
    fn blank_area_name_is_rejected() {
        let scope = SpatialScope::AdminArea {
            name_en: "  ".to_owned(),
            admin_level: 4,
        };
        let error = QueryBuilder::default()
            .build_station_query(&scope)
            .expect_err("blank area must fail");
        assert!(matches!(error, ExtractError::InvalidRequest { .. }));
    }
}
