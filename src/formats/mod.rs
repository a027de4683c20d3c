//! Binary output formats.

pub mod tile;

pub use tile::{DirectedEdge, EdgeInfo, NodeInfo, TileBuilder, TileFile};
