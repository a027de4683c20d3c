//! Intermediate model shared by the build phases: ways, nodes and the
//! undirected edges segmented out of them.

use crate::tiles::GraphId;

/// Road classification carried on each way, decoded from the transform's
/// integer code. Unknown codes fall back to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RoadClass {
    Motorway = 0,
    Trunk = 1,
    Primary = 2,
    TertiaryUnclassified = 3,
    Residential = 4,
    Service = 5,
    Track = 6,
    #[default]
    Other = 7,
}

impl RoadClass {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => RoadClass::Motorway,
            1 => RoadClass::Trunk,
            2 => RoadClass::Primary,
            3 => RoadClass::TertiaryUnclassified,
            4 => RoadClass::Residential,
            5 => RoadClass::Service,
            6 => RoadClass::Track,
            _ => RoadClass::Other,
        }
    }
}

/// Specialized use of a way beyond its road class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Use {
    #[default]
    None = 0,
    Cycleway = 1,
    ParkingAisle = 2,
    Driveway = 3,
    Alley = 4,
    EmergencyAccess = 5,
    DriveThru = 6,
    Steps = 7,
    Other = 8,
}

impl Use {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Use::None,
            1 => Use::Cycleway,
            2 => Use::ParkingAisle,
            3 => Use::Driveway,
            4 => Use::Alley,
            5 => Use::EmergencyAccess,
            6 => Use::DriveThru,
            7 => Use::Steps,
            8 => Use::Other,
            _ => Use::None,
        }
    }
}

/// A routable way as recorded during the way pass. Attributes come from the
/// normalized tag set; node refs keep their input order.
#[derive(Debug, Clone, Default)]
pub struct OsmWay {
    pub way_id: u64,
    pub nodes: Vec<u64>,

    pub road_class: RoadClass,
    pub road_use: Use,

    pub auto_forward: bool,
    pub auto_backward: bool,
    pub bike_forward: bool,
    pub bike_backward: bool,
    pub pedestrian: bool,

    pub oneway: bool,
    pub roundabout: bool,
    pub link: bool,
    pub ferry: bool,
    pub rail: bool,
    pub tunnel: bool,
    pub bridge: bool,
    pub toll: bool,
    pub unpaved: bool,
    pub destination_only: bool,
    pub no_thru_traffic: bool,

    pub speed_kph: f32,
    pub lanes: u8,

    pub bike_network: u8,
    pub bike_national_ref: String,
    pub bike_regional_ref: String,
    pub bike_local_ref: String,

    pub name: String,
    pub name_en: String,
    pub alt_name: String,
    pub official_name: String,
    pub r#ref: String,
    pub int_ref: String,
    pub destination: String,
    pub destination_ref: String,
    pub destination_ref_to: String,
    pub junction_ref: String,
}

impl OsmWay {
    pub fn new(way_id: u64) -> Self {
        Self {
            way_id,
            ..Default::default()
        }
    }

    /// The non-empty strings destined for the tile text pool, in a fixed
    /// order so shared edges produce identical offset lists.
    pub fn names(&self) -> Vec<&str> {
        [
            self.name.as_str(),
            self.name_en.as_str(),
            self.alt_name.as_str(),
            self.official_name.as_str(),
            self.r#ref.as_str(),
            self.int_ref.as_str(),
            self.destination.as_str(),
            self.destination_ref.as_str(),
            self.destination_ref_to.as_str(),
            self.junction_ref.as_str(),
        ]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect()
    }
}

/// A materialized node. Only nodes referenced by a routable way reach this
/// type; only nodes with incident edges survive into tiles.
#[derive(Debug, Clone)]
pub struct OsmNode {
    pub lat: f64,
    pub lng: f64,

    pub exit_to: bool,
    pub has_ref: bool,
    pub gate: bool,
    pub bollard: bool,
    pub modes_mask: u8,

    edges: Vec<u32>,
    pub graphid: GraphId,
}

impl OsmNode {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            exit_to: false,
            has_ref: false,
            gate: false,
            bollard: false,
            modes_mask: 0,
            edges: Vec::new(),
            graphid: GraphId::INVALID,
        }
    }

    pub fn latlng(&self) -> (f64, f64) {
        (self.lat, self.lng)
    }

    /// Register an incident edge. Indices accumulate in insertion order and
    /// are never removed.
    pub fn add_edge(&mut self, edge_index: u32) {
        self.edges.push(edge_index);
    }

    pub fn edges(&self) -> &[u32] {
        &self.edges
    }

    pub fn edge_count(&self) -> u32 {
        self.edges.len() as u32
    }
}

/// An undirected edge: a run of way geometry between two intersection
/// nodes. Never mutated once pushed to the edge table; both oriented sides
/// are materialized later, per tile.
#[derive(Debug, Clone)]
pub struct Edge {
    pub source_node: u64,
    pub target_node: u64,
    pub way_index: u32,
    /// (lat, lon) samples including both endpoints.
    pub shape: Vec<(f64, f64)>,
}

impl Edge {
    /// Open an edge at `source_node`; the target is filled in when the edge
    /// closes at the next intersection.
    pub fn start(source_node: u64, way_index: u32, source_pos: (f64, f64)) -> Self {
        Self {
            source_node,
            target_node: source_node,
            way_index,
            shape: vec![source_pos],
        }
    }

    /// Whether this edge joins the unordered node pair `{a, b}`.
    pub fn connects(&self, a: u64, b: u64) -> bool {
        (self.source_node == a && self.target_node == b)
            || (self.source_node == b && self.target_node == a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_road_class_unknown_code_is_other() {
        assert_eq!(RoadClass::from_code(3), RoadClass::TertiaryUnclassified);
        assert_eq!(RoadClass::from_code(99), RoadClass::Other);
    }

    #[test]
    fn test_names_skips_empty_fields() {
        let mut way = OsmWay::new(1);
        way.name = "Main St".to_string();
        way.r#ref = "A1".to_string();
        assert_eq!(way.names(), vec!["Main St", "A1"]);
    }

    #[test]
    fn test_names_includes_destinations_and_junction_ref() {
        let mut way = OsmWay::new(1);
        way.name = "Main St".to_string();
        way.destination = "Springfield".to_string();
        way.destination_ref = "I-95".to_string();
        way.destination_ref_to = "I-95 North".to_string();
        way.junction_ref = "24B".to_string();
        assert_eq!(
            way.names(),
            vec!["Main St", "Springfield", "I-95", "I-95 North", "24B"]
        );
    }

    #[test]
    fn test_edge_connects_is_unordered() {
        let mut edge = Edge::start(10, 0, (0.0, 0.0));
        edge.target_node = 20;
        assert!(edge.connects(10, 20));
        assert!(edge.connects(20, 10));
        assert!(!edge.connects(10, 30));
    }

    #[test]
    fn test_node_edge_registration() {
        let mut node = OsmNode::new(1.0, 2.0);
        assert_eq!(node.edge_count(), 0);
        node.add_edge(4);
        node.add_edge(7);
        assert_eq!(node.edges(), &[4, 7]);
        assert_eq!(node.edge_count(), 2);
    }
}
