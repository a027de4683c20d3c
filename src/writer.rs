//! Parallel assembly and writing of graph tiles.
//!
//! Workers receive disjoint lists of tile buckets and read-only views of the
//! frozen node/way/edge tables, so no synchronization is needed. Each worker
//! runs its whole task even if another fails; errors are aggregated after
//! every worker has finished.

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::Path;

use crate::formats::tile::{
    DirectedEdge, EdgeInfo, NodeInfo, TileBuilder, ACCESS_AUTO_FORWARD, ACCESS_AUTO_REVERSE,
    ACCESS_BIKE_FORWARD, ACCESS_BIKE_REVERSE, ACCESS_PED_FORWARD, ACCESS_PED_REVERSE,
    FLAG_BRIDGE, FLAG_DEST_ONLY, FLAG_FERRY, FLAG_LINK, FLAG_NO_THRU, FLAG_ONEWAY, FLAG_RAIL,
    FLAG_ROUNDABOUT, FLAG_TOLL, FLAG_TUNNEL, FLAG_UNPAVED, OPP_INDEX_SENTINEL,
};
use crate::geo;
use crate::model::{Edge, OsmNode, OsmWay};
use crate::tiles::GraphId;

/// Write every tile in every worker task. Fail-slow: all workers run to
/// completion and the first captured error is returned afterwards.
pub fn write_tiles(
    tasks: &[Vec<Vec<u64>>],
    nodes: &HashMap<u64, OsmNode>,
    ways: &[OsmWay],
    edges: &[Edge],
    tile_dir: &Path,
    level: u8,
) -> Result<()> {
    let results: Vec<Result<u64>> = tasks
        .par_iter()
        .map(|task| build_tile_set(task, nodes, ways, edges, tile_dir, level))
        .collect();

    let mut written = 0u64;
    let mut first_err = None;
    for result in results {
        match result {
            Ok(bytes) => written += bytes,
            Err(e) => {
                tracing::error!("tile worker failed: {:#}", e);
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
    }
    if let Some(e) = first_err {
        return Err(e.context("tile writing failed"));
    }

    println!("  ✓ Wrote {} bytes of tiles", written);
    Ok(())
}

/// One worker's task: write each of its tiles in turn.
fn build_tile_set(
    task: &[Vec<u64>],
    nodes: &HashMap<u64, OsmNode>,
    ways: &[OsmWay],
    edges: &[Edge],
    tile_dir: &Path,
    level: u8,
) -> Result<u64> {
    let mut written = 0u64;
    for bucket in task {
        if bucket.is_empty() {
            continue;
        }
        written += build_tile(bucket, nodes, ways, edges, tile_dir, level)?;
    }
    Ok(written)
}

fn way_flags(way: &OsmWay) -> u16 {
    let mut flags = 0u16;
    for (set, bit) in [
        (way.oneway, FLAG_ONEWAY),
        (way.roundabout, FLAG_ROUNDABOUT),
        (way.link, FLAG_LINK),
        (way.ferry, FLAG_FERRY),
        (way.rail, FLAG_RAIL),
        (way.tunnel, FLAG_TUNNEL),
        (way.bridge, FLAG_BRIDGE),
        (way.toll, FLAG_TOLL),
        (way.unpaved, FLAG_UNPAVED),
        (way.destination_only, FLAG_DEST_ONLY),
        (way.no_thru_traffic, FLAG_NO_THRU),
    ] {
        if set {
            flags |= bit;
        }
    }
    flags
}

/// Access bits for a directed edge running with the way (`forward`) or
/// against it. Pedestrian access ignores direction.
fn access_bits(way: &OsmWay, forward: bool) -> u8 {
    let (auto_fwd, auto_rev, bike_fwd, bike_rev) = if forward {
        (
            way.auto_forward,
            way.auto_backward,
            way.bike_forward,
            way.bike_backward,
        )
    } else {
        (
            way.auto_backward,
            way.auto_forward,
            way.bike_backward,
            way.bike_forward,
        )
    };

    let mut access = 0u8;
    if auto_fwd {
        access |= ACCESS_AUTO_FORWARD;
    }
    if auto_rev {
        access |= ACCESS_AUTO_REVERSE;
    }
    if bike_fwd {
        access |= ACCESS_BIKE_FORWARD;
    }
    if bike_rev {
        access |= ACCESS_BIKE_REVERSE;
    }
    if way.pedestrian {
        access |= ACCESS_PED_FORWARD | ACCESS_PED_REVERSE;
    }
    access
}

/// Position of the opposing directed edge within `endnode`'s incident list:
/// the first edge joining the unordered pair `{endnode, startnode}`. Falls
/// back to the sentinel when no match exists.
fn find_opposing(
    endnode: u64,
    startnode: u64,
    nodes: &HashMap<u64, OsmNode>,
    edges: &[Edge],
) -> u8 {
    if let Some(node) = nodes.get(&endnode) {
        for (n, &edge_index) in node.edges().iter().enumerate() {
            if edges[edge_index as usize].connects(endnode, startnode) {
                return n as u8;
            }
        }
    }
    tracing::error!(endnode, startnode, "opposing directed edge not found");
    OPP_INDEX_SENTINEL
}

fn canonical_pair(a: GraphId, b: GraphId) -> (GraphId, GraphId) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

fn build_tile(
    bucket: &[u64],
    nodes: &HashMap<u64, OsmNode>,
    ways: &[OsmWay],
    edges: &[Edge],
    tile_dir: &Path,
    level: u8,
) -> Result<u64> {
    // The tile id comes from any member node; the first suffices.
    let tile_id = nodes
        .get(&bucket[0])
        .context("bucket references unknown node")?
        .graphid
        .tile_id();

    let mut tile = TileBuilder::new(tile_id, level);
    let mut edge_offset_map: HashMap<(GraphId, GraphId), u32> = HashMap::new();
    let mut text_offset_map: HashMap<String, u32> = HashMap::new();
    let mut directed_edge_cursor = 0u32;

    for &osm_id in bucket {
        let node = nodes.get(&osm_id).context("bucket references unknown node")?;
        let node_info = NodeInfo {
            lat: node.lat,
            lon: node.lng,
            edge_index: directed_edge_cursor,
            edge_count: node.edge_count(),
        };
        directed_edge_cursor += node.edge_count();

        let mut directed_edges = Vec::with_capacity(node.edges().len());
        for &edge_index in node.edges() {
            let edge = &edges[edge_index as usize];
            let way = &ways[edge.way_index as usize];

            let node_a = match nodes.get(&edge.source_node) {
                Some(n) if n.graphid.is_valid() => n.graphid,
                _ => {
                    tracing::error!(
                        source_node = edge.source_node,
                        "edge source has no valid graph id"
                    );
                    GraphId::INVALID
                }
            };
            let node_b = match nodes.get(&edge.target_node) {
                Some(n) if n.graphid.is_valid() => n.graphid,
                _ => {
                    tracing::error!(
                        target_node = edge.target_node,
                        "edge target has no valid graph id"
                    );
                    GraphId::INVALID
                }
            };

            // Orient the edge relative to the node being emitted.
            let (access, endnode, opp_index) = if edge.source_node == osm_id {
                (
                    access_bits(way, true),
                    node_b,
                    find_opposing(edge.target_node, edge.source_node, nodes, edges),
                )
            } else if edge.target_node == osm_id {
                (
                    access_bits(way, false),
                    node_a,
                    find_opposing(edge.source_node, edge.target_node, nodes, edges),
                )
            } else {
                tracing::error!(
                    way_id = way.way_id,
                    edge_index,
                    node = osm_id,
                    "edge endpoints match neither end of the node being written"
                );
                continue;
            };

            // Both directed sides of an undirected edge share one EdgeInfo.
            let pair = canonical_pair(node_a, node_b);
            let edge_data_offset = match edge_offset_map.get(&pair) {
                Some(&offset) => offset,
                None => {
                    let mut name_offsets = Vec::new();
                    for name in way.names() {
                        let offset = match text_offset_map.get(name) {
                            Some(&offset) => offset,
                            None => {
                                let offset = tile.add_text(name);
                                text_offset_map.insert(name.to_string(), offset);
                                offset
                            }
                        };
                        name_offsets.push(offset);
                    }
                    let offset = tile.add_edge_info(EdgeInfo {
                        node_a,
                        node_b,
                        name_offsets,
                        shape: edge.shape.clone(),
                    });
                    edge_offset_map.insert(pair, offset);
                    offset
                }
            };

            directed_edges.push(DirectedEdge {
                endnode,
                edge_data_offset,
                length_m: geo::polyline_length(&edge.shape) as f32,
                speed_kph: way.speed_kph,
                road_class: way.road_class as u8,
                road_use: way.road_use as u8,
                flags: way_flags(way),
                access,
                opp_index,
                lanes: way.lanes,
                bike_network: way.bike_network,
            });
        }

        tile.add_node(node_info, directed_edges);
    }

    let bytes = tile.write(tile_dir)?;
    tracing::debug!(tile_id, bytes, "wrote tile");
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OsmWay;

    fn two_way_node_graph() -> (HashMap<u64, OsmNode>, Vec<Edge>) {
        // a --- b, one edge each way registered on both endpoints.
        let mut nodes = HashMap::new();
        let mut a = OsmNode::new(0.0, 0.0);
        let mut b = OsmNode::new(0.0, 0.001);
        let mut edge = Edge::start(10, 0, (0.0, 0.0));
        edge.target_node = 20;
        edge.shape.push((0.0, 0.001));
        a.add_edge(0);
        b.add_edge(0);
        nodes.insert(10, a);
        nodes.insert(20, b);
        (nodes, vec![edge])
    }

    #[test]
    fn test_find_opposing_matches_unordered_pair() {
        let (nodes, edges) = two_way_node_graph();
        assert_eq!(find_opposing(20, 10, &nodes, &edges), 0);
        assert_eq!(find_opposing(10, 20, &nodes, &edges), 0);
    }

    #[test]
    fn test_find_opposing_sentinel_when_absent() {
        let (nodes, edges) = two_way_node_graph();
        assert_eq!(find_opposing(10, 99, &nodes, &edges), OPP_INDEX_SENTINEL);
        assert_eq!(find_opposing(99, 10, &nodes, &edges), OPP_INDEX_SENTINEL);
    }

    #[test]
    fn test_access_bits_swap_on_reverse() {
        let way = OsmWay {
            auto_forward: true,
            auto_backward: false,
            bike_forward: true,
            bike_backward: false,
            pedestrian: true,
            ..Default::default()
        };

        let forward = access_bits(&way, true);
        assert_ne!(forward & ACCESS_AUTO_FORWARD, 0);
        assert_eq!(forward & ACCESS_AUTO_REVERSE, 0);
        assert_ne!(forward & ACCESS_PED_FORWARD, 0);
        assert_ne!(forward & ACCESS_PED_REVERSE, 0);

        let reverse = access_bits(&way, false);
        assert_eq!(reverse & ACCESS_AUTO_FORWARD, 0);
        assert_ne!(reverse & ACCESS_AUTO_REVERSE, 0);
        assert_ne!(reverse & ACCESS_PED_FORWARD, 0);
    }

    #[test]
    fn test_way_flags_packing() {
        let way = OsmWay {
            oneway: true,
            bridge: true,
            toll: true,
            ..Default::default()
        };
        let flags = way_flags(&way);
        assert_eq!(flags, FLAG_ONEWAY | FLAG_BRIDGE | FLAG_TOLL);
    }
}
