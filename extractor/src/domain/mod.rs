//! Domain primitives, ports, and the extraction stages.
//!
//! Purpose: hold everything that does not touch the network or filesystem
//! directly. Adapters in `crate::outbound` implement the traits in
//! [`ports`].
//!
//! Public surface:
//! - [`QueryBuilder`] renders Overpass QL for the ids, members, and stations
//!   stages.
//! - [`MirrorFetcher`] runs one query against an ordered mirror list.
//! - [`ElementIndex`] indexes a [`RawDocument`] in one pass.
//! - [`GeometryResolver`] turns indexed elements into route and station
//!   records.
//! - [`LayerAssembler`] builds the GeoJSON output layers.

pub mod ports;

mod element_index;
mod error;
mod fetch;
mod geo;
mod layers;
mod osm;
mod query;
mod resolver;

pub use self::element_index::{DEFAULT_RELATION_ROUTE_TYPES, ElementIndex};
pub use self::error::ExtractError;
pub use self::fetch::{
    FetchFailure, FetchMode, FetchOutcome, FetchedBody, GZIP_MAGIC, MirrorFailure, MirrorFetcher,
    MirrorFetcherPorts, PROGRESS_INTERVAL, ProgressMeter, SMALL_BODY_BYTES,
};
pub use self::geo::{BoundingBox, Coordinate, CoordinateError};
pub use self::layers::{CRS84, Layer, LayerAssembler, LayerKind, LayerSet};
pub use self::osm::{
    DecodeStats, DocumentMeta, ElementKey, ElementKind, Member, MemberKind, Node, OsmElement,
    OsmId, RawDocument, Relation, Tags, Way, WayPath,
};
pub use self::query::{
    DEFAULT_MEMBER_BATCH_SIZE, QueryBuilder, QueryClass, QueryTimeouts, RouteFilter, SpatialScope,
};
pub use self::resolver::{
    GeometryResolver, PartialElementError, ROUTE_TAGS, Resolution, ResolutionReport, RouteRecord,
    RoutePolicy, STATION_TAGS, StationRecord, is_station,
};
