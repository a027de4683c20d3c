//! The graph build pipeline.
//!
//! Phases run strictly in sequence on one thread: the way pass marks node
//! usage and records routable ways, the relations pass is reserved, the node
//! pass materializes only used nodes, edge construction segments ways at
//! intersections, and tile partitioning assigns every connected node a
//! GraphId and a worker bucket. Only the final tile-writing phase (see
//! `writer`) is parallel, and by then every table here is frozen.

use anyhow::{anyhow, Context, Result};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;

use crate::config::Config;
use crate::error::BuildError;
use crate::idtable::{NodeIdTable, MAX_OSM_NODE_ID};
use crate::model::{Edge, OsmNode, OsmWay, RoadClass, Use};
use crate::pbf::{self, Pass, PbfHandler, RelationMember};
use crate::tiles::{GraphId, TileGrid};
use crate::transform::{Tags, TagTransform};
use crate::writer;

/// Buckets of source node ids, grouped per worker. Each inner list is one
/// tile's nodes in GraphId-index order.
pub type WorkerTasks = Vec<Vec<Vec<u64>>>;

pub struct GraphBuilder {
    transform: Box<dyn TagTransform>,

    seen_on_way: NodeIdTable,
    intersection: NodeIdTable,

    pub ways: Vec<OsmWay>,
    pub nodes: HashMap<u64, OsmNode>,
    pub edges: Vec<Edge>,

    /// Side maps for optional node text, keyed by source node id.
    pub exit_to: HashMap<u64, String>,
    pub node_refs: HashMap<u64, String>,

    node_count_estimate: u64,
    edge_count_estimate: u64,
    relation_count: u64,
}

impl GraphBuilder {
    pub fn new(transform: Box<dyn TagTransform>) -> Self {
        Self::with_max_node_id(transform, MAX_OSM_NODE_ID)
    }

    /// Like `new` but with a smaller id-table maximum. Tests use this to
    /// avoid allocating planet-sized bitmaps.
    pub fn with_max_node_id(transform: Box<dyn TagTransform>, max_node_id: u64) -> Self {
        Self {
            transform,
            seen_on_way: NodeIdTable::new(max_node_id),
            intersection: NodeIdTable::new(max_node_id),
            ways: Vec::new(),
            nodes: HashMap::new(),
            edges: Vec::new(),
            exit_to: HashMap::new(),
            node_refs: HashMap::new(),
            node_count_estimate: 0,
            edge_count_estimate: 0,
            relation_count: 0,
        }
    }

    pub fn is_seen_on_way(&self, id: u64) -> bool {
        self.seen_on_way.is_used(id)
    }

    pub fn is_intersection(&self, id: u64) -> bool {
        self.intersection.is_used(id)
    }

    /// Run the full pipeline: ingest `input`, then construct, partition and
    /// write tiles under the configured tile directory.
    pub fn build(&mut self, input: &Path, config: &Config, worker_count: usize) -> Result<()> {
        println!("Parsing ways to mark used nodes...");
        pbf::read_pass(input, Pass::Ways, self)?;
        println!("  ✓ {} routable ways", self.ways.len());

        pbf::read_pass(input, Pass::Relations, self)?;
        println!(
            "  ✓ {} relations noted (turn restrictions reserved)",
            self.relation_count
        );

        println!(
            "Parsing nodes, keeping roughly {}...",
            self.node_count_estimate
        );
        pbf::read_pass(input, Pass::Nodes, self)?;
        println!("  ✓ {} routable nodes", self.nodes.len());

        self.construct_edges()?;

        let level = config.local_level()?;
        let grid = TileGrid::new(level.tile_size);
        let tasks = self.tile_nodes(&grid, level.level, worker_count);
        let tile_count: usize = tasks.iter().map(|t| t.len()).sum();
        println!(
            "  ✓ {} tiles assigned across {} workers",
            tile_count, worker_count
        );

        writer::write_tiles(
            &tasks,
            &self.nodes,
            &self.ways,
            &self.edges,
            &config.mjolnir.tile_dir,
            level.level,
        )
    }

    fn way_callback(&mut self, id: u64, tags: Tags, refs: Vec<u64>) -> Result<()> {
        // Ways with fewer than two nodes cannot carry an edge.
        if refs.len() < 2 {
            return Ok(());
        }

        let tags = self
            .transform
            .transform_way(&tags)
            .map_err(|e| BuildError::TagTransform(e.to_string()))?;
        if tags.is_empty() {
            return Ok(());
        }

        let mut way = OsmWay::new(id);
        way.nodes = refs;

        // Mark node usage. A node seen twice is an intersection; endpoints
        // always are. The edge estimate is an overestimate used only for
        // reservation; construct_edges produces the real count.
        for &r in &way.nodes {
            if self.seen_on_way.is_used(r) {
                self.intersection.set(r)?;
                self.edge_count_estimate += 1;
            } else {
                self.node_count_estimate += 1;
            }
            self.seen_on_way.set(r)?;
        }
        self.intersection.set(way.nodes[0])?;
        self.intersection.set(*way.nodes.last().unwrap())?;
        self.edge_count_estimate += 2;

        for (key, value) in &tags {
            match key.as_str() {
                "road_class" => {
                    way.road_class = RoadClass::from_code(value.parse().unwrap_or(255))
                }
                "use" => way.road_use = Use::from_code(value.parse().unwrap_or(0)),

                "auto_forward" => way.auto_forward = value == "true",
                "auto_backward" => way.auto_backward = value == "true",
                "bike_forward" => way.bike_forward = value == "true",
                "bike_backward" => way.bike_backward = value == "true",
                "pedestrian" => way.pedestrian = value == "true",

                "oneway" => way.oneway = value == "true",
                "roundabout" => way.roundabout = value == "true",
                "link" => way.link = value == "true",
                "ferry" => way.ferry = value == "true",
                "rail" => way.rail = value == "true",
                "tunnel" => way.tunnel = value == "true",
                "bridge" => way.bridge = value == "true",
                "toll" => way.toll = value == "true",
                "surface" => way.unpaved = value == "true",
                "private" => way.destination_only = value == "true",
                "no_thru_traffic" => way.no_thru_traffic = value == "true",

                "speed" => way.speed_kph = value.parse().unwrap_or(0.0),
                "lanes" => way.lanes = value.parse().unwrap_or(0),

                "bike_network_mask" => way.bike_network = value.parse().unwrap_or(0),
                "bike_national_ref" => way.bike_national_ref = value.clone(),
                "bike_regional_ref" => way.bike_regional_ref = value.clone(),
                "bike_local_ref" => way.bike_local_ref = value.clone(),

                "name" => way.name = value.clone(),
                "name:en" => way.name_en = value.clone(),
                "alt_name" => way.alt_name = value.clone(),
                "official_name" => way.official_name = value.clone(),
                "ref" => way.r#ref = value.clone(),
                "int_ref" => way.int_ref = value.clone(),
                "destination" => way.destination = value.clone(),
                "destination:ref" => way.destination_ref = value.clone(),
                "destination:ref:to" => way.destination_ref_to = value.clone(),
                "junction_ref" => way.junction_ref = value.clone(),

                _ => {}
            }
        }

        self.ways.push(way);
        Ok(())
    }

    fn node_callback(&mut self, id: u64, lng: f64, lat: f64, tags: Tags) -> Result<()> {
        // Only nodes referenced by a routable way matter.
        if !self.seen_on_way.is_used(id) {
            return Ok(());
        }

        let tags = self
            .transform
            .transform_node(&tags)
            .map_err(|e| BuildError::TagTransform(e.to_string()))?;
        if tags.is_empty() {
            return Ok(());
        }

        let mut node = OsmNode::new(lat, lng);
        for (key, value) in &tags {
            match key.as_str() {
                "exit_to" => {
                    node.exit_to = !value.is_empty();
                    if !value.is_empty() {
                        self.exit_to.insert(id, value.clone());
                    }
                }
                "ref" => {
                    node.has_ref = !value.is_empty();
                    if !value.is_empty() {
                        self.node_refs.insert(id, value.clone());
                    }
                }
                "gate" => node.gate = value == "true",
                "bollard" => node.bollard = value == "true",
                "modes_mask" => node.modes_mask = value.parse().unwrap_or(0),
                _ => {}
            }
        }

        // Duplicate ids in the dump overwrite; undefined input, nothing
        // downstream relies on which copy wins.
        self.nodes.insert(id, node);
        Ok(())
    }

    fn relation_callback(&mut self, _id: u64, _tags: Tags, _members: Vec<RelationMember>) {
        // Reserved for turn restrictions.
        self.relation_count += 1;
    }

    fn node_pos(&self, way_id: u64, id: u64) -> Result<(f64, f64)> {
        self.nodes
            .get(&id)
            .map(OsmNode::latlng)
            .ok_or_else(|| anyhow!("way {} references unmaterialized node {}", way_id, id))
    }

    /// Segment every way into edges at intersection nodes. Edge endpoints
    /// register the edge's index on their incident lists; interior nodes
    /// contribute only shape.
    pub fn construct_edges(&mut self) -> Result<()> {
        let mut edges: Vec<Edge> = Vec::with_capacity(self.edge_count_estimate as usize);

        for way_index in 0..self.ways.len() {
            let way_id = self.ways[way_index].way_id;
            let node_count = self.ways[way_index].nodes.len();

            let start_id = self.ways[way_index].nodes[0];
            let start_pos = self.node_pos(way_id, start_id)?;
            let mut edge = Edge::start(start_id, way_index as u32, start_pos);
            self.nodes
                .get_mut(&start_id)
                .context("edge start node missing")?
                .add_edge(edges.len() as u32);

            for i in 1..node_count {
                let id = self.ways[way_index].nodes[i];
                let pos = self.node_pos(way_id, id)?;
                edge.shape.push(pos);

                if !self.intersection.is_used(id) {
                    continue;
                }

                // Close the edge at this intersection.
                edge.target_node = id;
                let node = self
                    .nodes
                    .get_mut(&id)
                    .context("edge end node missing")?;
                node.add_edge(edges.len() as u32);

                // The replacement restarts at the intersection itself so a
                // continuing segment's shape begins where this one ended.
                edges.push(std::mem::replace(
                    &mut edge,
                    Edge::start(id, way_index as u32, pos),
                ));

                if i < node_count - 1 {
                    node.add_edge(edges.len() as u32);
                }
            }
        }

        self.edges = edges;
        println!("  ✓ Constructed {} edges", self.edges.len());
        Ok(())
    }

    /// Partition connected nodes into per-tile buckets and assign GraphIds.
    /// A tile is handed to a worker on first touch, round-robin, so workers
    /// end up with disjoint bucket lists of roughly equal tile counts.
    pub fn tile_nodes(&mut self, grid: &TileGrid, level: u8, worker_count: usize) -> WorkerTasks {
        let worker_count = worker_count.max(1);
        let mut tasks: WorkerTasks = vec![Vec::new(); worker_count];
        let mut buckets: HashMap<u32, (usize, usize)> = HashMap::new();
        let mut next_worker = 0usize;

        for (&id, node) in self.nodes.iter_mut() {
            // Nodes that ended up with no edges never reach a tile.
            if node.edge_count() == 0 {
                continue;
            }

            let tile_id = grid.tile_of(node.lat, node.lng);
            let (worker, bucket) = match buckets.entry(tile_id) {
                Entry::Occupied(e) => *e.get(),
                Entry::Vacant(e) => {
                    let worker = next_worker;
                    next_worker = (next_worker + 1) % worker_count;
                    tasks[worker].push(Vec::new());
                    *e.insert((worker, tasks[worker].len() - 1))
                }
            };

            let bucket = &mut tasks[worker][bucket];
            bucket.push(id);
            node.graphid = GraphId::new(tile_id, level, (bucket.len() - 1) as u32);
        }

        tasks
    }
}

impl PbfHandler for GraphBuilder {
    fn on_way(&mut self, id: u64, tags: Tags, refs: Vec<u64>) -> Result<()> {
        self.way_callback(id, tags, refs)
    }

    fn on_node(&mut self, id: u64, lng: f64, lat: f64, tags: Tags) -> Result<()> {
        self.node_callback(id, lng, lat, tags)
    }

    fn on_relation(&mut self, id: u64, tags: Tags, members: Vec<RelationMember>) -> Result<()> {
        self.relation_callback(id, tags, members);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::BuiltinTransform;

    fn builder() -> GraphBuilder {
        GraphBuilder::with_max_node_id(Box::new(BuiltinTransform), 10_000)
    }

    fn road_tags() -> Tags {
        vec![("highway".to_string(), "residential".to_string())]
    }

    fn feed_nodes(b: &mut GraphBuilder, nodes: &[(u64, f64, f64)]) {
        for &(id, lat, lng) in nodes {
            b.on_node(id, lng, lat, Tags::new()).unwrap();
        }
    }

    #[test]
    fn test_intersections_are_endpoints_and_shared_nodes() {
        let mut b = builder();
        b.on_way(1, road_tags(), vec![10, 11, 12]).unwrap();
        b.on_way(2, road_tags(), vec![12, 13, 14]).unwrap();

        for id in [10, 11, 12, 13, 14] {
            assert!(b.is_seen_on_way(id));
        }
        assert!(b.is_intersection(10));
        assert!(b.is_intersection(12));
        assert!(b.is_intersection(14));
        assert!(!b.is_intersection(11));
        assert!(!b.is_intersection(13));
    }

    #[test]
    fn test_short_and_unroutable_ways_are_skipped() {
        let mut b = builder();
        b.on_way(1, road_tags(), vec![10]).unwrap();
        b.on_way(2, vec![("building".to_string(), "yes".to_string())], vec![20, 21])
            .unwrap();
        assert!(b.ways.is_empty());
        assert!(!b.is_seen_on_way(10));
        assert!(!b.is_seen_on_way(20));
    }

    #[test]
    fn test_nodes_not_on_ways_are_skipped() {
        let mut b = builder();
        b.on_way(1, road_tags(), vec![10, 11]).unwrap();
        feed_nodes(&mut b, &[(10, 0.0, 0.0), (11, 0.0, 0.001), (99, 1.0, 1.0)]);
        assert_eq!(b.nodes.len(), 2);
        assert!(!b.nodes.contains_key(&99));
    }

    #[test]
    fn test_single_way_without_interior_intersections_makes_one_edge() {
        let mut b = builder();
        b.on_way(1, road_tags(), vec![10, 11, 12, 13]).unwrap();
        feed_nodes(
            &mut b,
            &[
                (10, 0.0, 0.0),
                (11, 0.0, 0.001),
                (12, 0.0, 0.002),
                (13, 0.0, 0.003),
            ],
        );
        b.construct_edges().unwrap();

        assert_eq!(b.edges.len(), 1);
        let edge = &b.edges[0];
        assert_eq!(edge.source_node, 10);
        assert_eq!(edge.target_node, 13);
        assert_eq!(edge.shape.len(), 4);
        assert_eq!(b.nodes[&10].edges(), &[0]);
        assert_eq!(b.nodes[&13].edges(), &[0]);
        assert_eq!(b.nodes[&11].edge_count(), 0);
    }

    #[test]
    fn test_interior_intersection_splits_the_way() {
        let mut b = builder();
        b.on_way(1, road_tags(), vec![10, 11, 12, 13]).unwrap();
        // A second way through node 12 makes it an intersection.
        b.on_way(2, road_tags(), vec![20, 12, 21]).unwrap();
        feed_nodes(
            &mut b,
            &[
                (10, 0.0, 0.0),
                (11, 0.0, 0.001),
                (12, 0.0, 0.002),
                (13, 0.0, 0.003),
                (20, 0.001, 0.002),
                (21, -0.001, 0.002),
            ],
        );
        b.construct_edges().unwrap();

        assert_eq!(b.edges.len(), 4);
        assert_eq!(b.edges[0].source_node, 10);
        assert_eq!(b.edges[0].target_node, 12);
        assert_eq!(b.edges[0].shape.len(), 3);

        // The continuation restarts at the intersection position.
        assert_eq!(b.edges[1].source_node, 12);
        assert_eq!(b.edges[1].target_node, 13);
        assert_eq!(b.edges[1].shape, vec![(0.0, 0.002), (0.0, 0.003)]);

        // Node 12 carries both segments of way 1 plus both of way 2.
        assert_eq!(b.nodes[&12].edge_count(), 4);
        assert_eq!(b.nodes[&12].edges(), &[0, 1, 2, 3]);
    }

    #[test]
    fn test_degenerate_loop_is_permitted() {
        let mut b = builder();
        b.on_way(1, road_tags(), vec![10, 11, 10]).unwrap();
        feed_nodes(&mut b, &[(10, 0.0, 0.0), (11, 0.0, 0.001)]);
        b.construct_edges().unwrap();

        assert_eq!(b.edges.len(), 1);
        assert_eq!(b.edges[0].source_node, 10);
        assert_eq!(b.edges[0].target_node, 10);
        assert_eq!(b.edges[0].shape.len(), 3);
    }

    #[test]
    fn test_graphid_density_per_bucket() {
        let mut b = builder();
        b.on_way(1, road_tags(), vec![10, 11]).unwrap();
        b.on_way(2, road_tags(), vec![11, 12]).unwrap();
        b.on_way(3, road_tags(), vec![12, 10]).unwrap();
        feed_nodes(&mut b, &[(10, 0.0, 0.0), (11, 0.0, 0.01), (12, 0.01, 0.0)]);
        b.construct_edges().unwrap();

        let grid = TileGrid::new(0.25);
        let tasks = b.tile_nodes(&grid, 2, 3);

        for task in &tasks {
            for bucket in task {
                for (i, id) in bucket.iter().enumerate() {
                    let node = &b.nodes[id];
                    assert!(node.graphid.is_valid());
                    assert_eq!(node.graphid.index(), i as u32);
                    assert_eq!(node.graphid.level(), 2);
                }
            }
        }

        let assigned: usize = tasks.iter().flatten().map(Vec::len).sum();
        assert_eq!(assigned, 3);
    }

    #[test]
    fn test_out_of_range_node_id_aborts() {
        let mut b = builder();
        let err = b.on_way(1, road_tags(), vec![10, 10_001]).unwrap_err();
        match err.downcast_ref::<BuildError>() {
            Some(BuildError::IdOutOfRange { id: 10_001, .. }) => {}
            other => panic!("expected IdOutOfRange, got {:?}", other),
        }
    }

    #[test]
    fn test_node_attributes_and_side_maps() {
        let mut b = builder();
        b.on_way(1, road_tags(), vec![10, 11]).unwrap();
        b.on_node(
            10,
            0.0,
            0.0,
            vec![
                ("barrier".to_string(), "bollard".to_string()),
                ("ref".to_string(), "24B".to_string()),
            ],
        )
        .unwrap();
        b.on_node(11, 0.001, 0.0, Tags::new()).unwrap();

        let node = &b.nodes[&10];
        assert!(node.bollard);
        assert!(node.has_ref);
        assert_eq!(node.modes_mask, 6);
        assert_eq!(b.node_refs[&10], "24B");
        assert!(!b.nodes[&11].bollard);
    }
}
