//! Built-in city presets.

use crate::domain::{BoundingBox, ExtractError, RouteFilter, RoutePolicy, SpatialScope};

/// Names accepted by [`CityPreset::named`].
pub const PRESET_NAMES: [&str; 2] = ["london", "tokyo"];

/// Everything needed to extract one city's network.
#[derive(Debug, Clone, PartialEq)]
pub struct CityPreset {
    /// Preset key, recorded in the run manifest.
    pub city: String,
    /// Output file prefix.
    pub prefix: String,
    /// Where to look.
    pub scope: SpatialScope,
    /// Which route relations to collect.
    pub filter: RouteFilter,
    /// Which ways become route lines.
    pub policy: RoutePolicy,
    /// Whether to run the station discovery stage.
    pub fetch_stations: bool,
}

impl CityPreset {
    /// Greater London Underground within its bounding box.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the bounding box is validated like any other.
    pub fn london() -> Result<Self, ExtractError> {
        let filter = RouteFilter::subway_network("London Underground");
        Ok(Self {
            city: "london".to_owned(),
            prefix: "london_tube".to_owned(),
            scope: SpatialScope::BoundingBox(BoundingBox::new(51.2868, -0.5103, 51.6919, 0.3340)?),
            policy: policy_for(&filter, false),
            filter,
            fetch_stations: true,
        })
    }

    /// Tokyo prefecture subway and light rail, with tag-matched track.
    pub fn tokyo() -> Self {
        let filter = RouteFilter {
            route_types: vec!["subway".to_owned(), "light_rail".to_owned()],
            network: None,
        };
        Self {
            city: "tokyo".to_owned(),
            prefix: "tokyo_subway".to_owned(),
            scope: SpatialScope::AdminArea {
                name_en: "Tokyo".to_owned(),
                admin_level: 4,
            },
            policy: policy_for(&filter, true),
            filter,
            fetch_stations: true,
        }
    }

    /// Look a preset up by name, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::InvalidRequest`] for unknown names.
    pub fn named(name: &str) -> Result<Self, ExtractError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "london" => Self::london(),
            "tokyo" => Ok(Self::tokyo()),
            other => Err(ExtractError::invalid_request(format!(
                "unknown city preset '{other}'; expected one of {}",
                PRESET_NAMES.join(", ")
            ))),
        }
    }

    /// Replace the route filter, keeping the resolver's relation types in
    /// step with it.
    #[must_use]
    pub fn with_filter(mut self, filter: RouteFilter) -> Self {
        self.policy.relation_route_types.clone_from(&filter.route_types);
        self.filter = filter;
        self
    }
}

fn policy_for(filter: &RouteFilter, union_tagged_ways: bool) -> RoutePolicy {
    RoutePolicy {
        relation_route_types: filter.route_types.clone(),
        union_tagged_ways,
        include_tram: false,
    }
}
