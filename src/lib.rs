//! Tilesmith: batch construction of routable graph tiles from OSM extracts.
//!
//! Pipeline:
//! - Way pass: mark node usage, record routable ways (streaming, filtered)
//! - Relations pass: reserved for turn restrictions
//! - Node pass: materialize only nodes used by routable ways
//! - Edge construction: segment ways into edges at intersection nodes
//! - Tile partitioning: assign every connected node a tile and a GraphId
//! - Tile writing: parallel workers emit one .gph file per tile
//!
//! The first five phases are sequential and fail fast; tile writing fans
//! out over frozen read-only tables and aggregates worker errors after all
//! of them finish.

pub mod builder;
pub mod cli;
pub mod config;
pub mod error;
pub mod formats;
pub mod geo;
pub mod idtable;
pub mod model;
pub mod pbf;
pub mod tiles;
pub mod transform;
pub mod writer;

pub use builder::GraphBuilder;
pub use config::Config;
pub use error::BuildError;
pub use formats::tile::TileFile;
pub use tiles::{GraphId, TileGrid};
