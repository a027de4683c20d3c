//! .gph tile format.
//!
//! A tile is a packed little-endian record: header, `NodeInfo[]`,
//! `DirectedEdge[]`, variable-width `EdgeInfo[]` referenced by byte offset,
//! a NUL-terminated text pool, and a CRC-64 footer. `TileBuilder`
//! accumulates and writes; `TileFile` reads a written tile back for
//! verification and tests.

use anyhow::{bail, Context, Result};
use crc::{Crc, CRC_64_GO_ISO};
use std::fs;
use std::path::{Path, PathBuf};

use crate::tiles::GraphId;

const MAGIC: u32 = 0x47504854; // "GPHT"
const VERSION: u16 = 1;

const HEADER_SIZE: usize = 64;
const FOOTER_SIZE: usize = 8;
pub const NODE_INFO_SIZE: usize = 24;
pub const DIRECTED_EDGE_SIZE: usize = 32;
const EDGE_INFO_FIXED_SIZE: usize = 24;

/// Written when no opposing directed edge can be resolved; the maximum of
/// the consumer's 5-bit opposing-index field.
pub const OPP_INDEX_SENTINEL: u8 = 31;

// DirectedEdge.flags bits.
pub const FLAG_ONEWAY: u16 = 1 << 0;
pub const FLAG_ROUNDABOUT: u16 = 1 << 1;
pub const FLAG_LINK: u16 = 1 << 2;
pub const FLAG_FERRY: u16 = 1 << 3;
pub const FLAG_RAIL: u16 = 1 << 4;
pub const FLAG_TUNNEL: u16 = 1 << 5;
pub const FLAG_BRIDGE: u16 = 1 << 6;
pub const FLAG_TOLL: u16 = 1 << 7;
pub const FLAG_UNPAVED: u16 = 1 << 8;
pub const FLAG_DEST_ONLY: u16 = 1 << 9;
pub const FLAG_NO_THRU: u16 = 1 << 10;

// DirectedEdge.access bits, relative to the directed edge's own direction.
pub const ACCESS_AUTO_FORWARD: u8 = 1 << 0;
pub const ACCESS_AUTO_REVERSE: u8 = 1 << 1;
pub const ACCESS_BIKE_FORWARD: u8 = 1 << 2;
pub const ACCESS_BIKE_REVERSE: u8 = 1 << 3;
pub const ACCESS_PED_FORWARD: u8 = 1 << 4;
pub const ACCESS_PED_REVERSE: u8 = 1 << 5;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_GO_ISO);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeInfo {
    pub lat: f64,
    pub lon: f64,
    /// Index of this node's first directed edge within the tile.
    pub edge_index: u32,
    pub edge_count: u32,
}

impl NodeInfo {
    fn write_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.lat.to_le_bytes());
        buf.extend_from_slice(&self.lon.to_le_bytes());
        buf.extend_from_slice(&self.edge_index.to_le_bytes());
        buf.extend_from_slice(&self.edge_count.to_le_bytes());
    }

    fn read(buf: &[u8]) -> Result<Self> {
        if buf.len() < NODE_INFO_SIZE {
            bail!("truncated NodeInfo record");
        }
        Ok(Self {
            lat: f64::from_le_bytes(buf[0..8].try_into()?),
            lon: f64::from_le_bytes(buf[8..16].try_into()?),
            edge_index: u32::from_le_bytes(buf[16..20].try_into()?),
            edge_count: u32::from_le_bytes(buf[20..24].try_into()?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectedEdge {
    pub endnode: GraphId,
    /// Byte offset of the shared EdgeInfo within the EdgeInfo section.
    pub edge_data_offset: u32,
    pub length_m: f32,
    pub speed_kph: f32,
    pub road_class: u8,
    pub road_use: u8,
    pub flags: u16,
    pub access: u8,
    /// Local index of the opposing directed edge at `endnode`, or
    /// `OPP_INDEX_SENTINEL`.
    pub opp_index: u8,
    pub lanes: u8,
    pub bike_network: u8,
}

impl DirectedEdge {
    fn write_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.endnode.value().to_le_bytes());
        buf.extend_from_slice(&self.edge_data_offset.to_le_bytes());
        buf.extend_from_slice(&self.length_m.to_le_bytes());
        buf.extend_from_slice(&self.speed_kph.to_le_bytes());
        buf.push(self.road_class);
        buf.push(self.road_use);
        buf.extend_from_slice(&self.flags.to_le_bytes());
        buf.push(self.access);
        buf.push(self.opp_index);
        buf.push(self.lanes);
        buf.push(self.bike_network);
        buf.extend_from_slice(&0u32.to_le_bytes());
    }

    fn read(buf: &[u8]) -> Result<Self> {
        if buf.len() < DIRECTED_EDGE_SIZE {
            bail!("truncated DirectedEdge record");
        }
        Ok(Self {
            endnode: GraphId::from_value(u64::from_le_bytes(buf[0..8].try_into()?)),
            edge_data_offset: u32::from_le_bytes(buf[8..12].try_into()?),
            length_m: f32::from_le_bytes(buf[12..16].try_into()?),
            speed_kph: f32::from_le_bytes(buf[16..20].try_into()?),
            road_class: buf[20],
            road_use: buf[21],
            flags: u16::from_le_bytes(buf[22..24].try_into()?),
            access: buf[24],
            opp_index: buf[25],
            lanes: buf[26],
            bike_network: buf[27],
        })
    }
}

/// The per-undirected-edge payload shared by both directed sides.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeInfo {
    pub node_a: GraphId,
    pub node_b: GraphId,
    /// Byte offsets into the text pool, one per street name.
    pub name_offsets: Vec<u32>,
    pub shape: Vec<(f64, f64)>,
}

impl EdgeInfo {
    pub fn serialized_size(&self) -> usize {
        EDGE_INFO_FIXED_SIZE + 4 * self.name_offsets.len() + 16 * self.shape.len()
    }

    fn write_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.node_a.value().to_le_bytes());
        buf.extend_from_slice(&self.node_b.value().to_le_bytes());
        buf.extend_from_slice(&(self.name_offsets.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.shape.len() as u32).to_le_bytes());
        for offset in &self.name_offsets {
            buf.extend_from_slice(&offset.to_le_bytes());
        }
        for (lat, lon) in &self.shape {
            buf.extend_from_slice(&lat.to_le_bytes());
            buf.extend_from_slice(&lon.to_le_bytes());
        }
    }

    fn read(buf: &[u8]) -> Result<Self> {
        if buf.len() < EDGE_INFO_FIXED_SIZE {
            bail!("truncated EdgeInfo record");
        }
        let node_a = GraphId::from_value(u64::from_le_bytes(buf[0..8].try_into()?));
        let node_b = GraphId::from_value(u64::from_le_bytes(buf[8..16].try_into()?));
        let name_count = u32::from_le_bytes(buf[16..20].try_into()?) as usize;
        let shape_count = u32::from_le_bytes(buf[20..24].try_into()?) as usize;

        let needed = EDGE_INFO_FIXED_SIZE + 4 * name_count + 16 * shape_count;
        if buf.len() < needed {
            bail!("truncated EdgeInfo payload");
        }

        let mut pos = EDGE_INFO_FIXED_SIZE;
        let mut name_offsets = Vec::with_capacity(name_count);
        for _ in 0..name_count {
            name_offsets.push(u32::from_le_bytes(buf[pos..pos + 4].try_into()?));
            pos += 4;
        }
        let mut shape = Vec::with_capacity(shape_count);
        for _ in 0..shape_count {
            let lat = f64::from_le_bytes(buf[pos..pos + 8].try_into()?);
            let lon = f64::from_le_bytes(buf[pos + 8..pos + 16].try_into()?);
            shape.push((lat, lon));
            pos += 16;
        }

        Ok(Self {
            node_a,
            node_b,
            name_offsets,
            shape,
        })
    }
}

/// Accumulates one tile's records and writes the packed file.
pub struct TileBuilder {
    tile_id: u32,
    level: u8,
    nodes: Vec<NodeInfo>,
    directed_edges: Vec<DirectedEdge>,
    edge_infos: Vec<EdgeInfo>,
    edge_info_size: u64,
    text: Vec<String>,
    text_size: u64,
}

impl TileBuilder {
    pub fn new(tile_id: u32, level: u8) -> Self {
        Self {
            tile_id,
            level,
            nodes: Vec::new(),
            directed_edges: Vec::new(),
            edge_infos: Vec::new(),
            edge_info_size: 0,
            text: Vec::new(),
            text_size: 0,
        }
    }

    pub fn tile_id(&self) -> u32 {
        self.tile_id
    }

    pub fn node_count(&self) -> u32 {
        self.nodes.len() as u32
    }

    pub fn directed_edge_count(&self) -> u32 {
        self.directed_edges.len() as u32
    }

    /// Append a node and its outgoing directed edges, in order.
    pub fn add_node(&mut self, node: NodeInfo, edges: Vec<DirectedEdge>) {
        self.nodes.push(node);
        self.directed_edges.extend(edges);
    }

    /// Append a new EdgeInfo, returning its byte offset within the EdgeInfo
    /// section. De-duplication is the caller's concern.
    pub fn add_edge_info(&mut self, info: EdgeInfo) -> u32 {
        let offset = self.edge_info_size;
        self.edge_info_size += info.serialized_size() as u64;
        self.edge_infos.push(info);
        offset as u32
    }

    /// Append a string to the text pool, returning its byte offset. Offsets
    /// advance past the NUL terminator.
    pub fn add_text(&mut self, text: &str) -> u32 {
        let offset = self.text_size;
        self.text_size += text.len() as u64 + 1;
        self.text.push(text.to_string());
        offset as u32
    }

    fn serialize(&self) -> Vec<u8> {
        let body_size = HEADER_SIZE
            + self.nodes.len() * NODE_INFO_SIZE
            + self.directed_edges.len() * DIRECTED_EDGE_SIZE
            + self.edge_info_size as usize
            + self.text_size as usize;
        let mut buf = Vec::with_capacity(body_size + FOOTER_SIZE);

        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&self.tile_id.to_le_bytes());
        buf.push(self.level);
        buf.extend_from_slice(&[0u8; 3]);
        buf.extend_from_slice(&(self.nodes.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.directed_edges.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.edge_info_size.to_le_bytes());
        buf.extend_from_slice(&self.text_size.to_le_bytes());
        buf.resize(HEADER_SIZE, 0);

        for node in &self.nodes {
            node.write_into(&mut buf);
        }
        for edge in &self.directed_edges {
            edge.write_into(&mut buf);
        }
        for info in &self.edge_infos {
            info.write_into(&mut buf);
        }
        for text in &self.text {
            buf.extend_from_slice(text.as_bytes());
            buf.push(0);
        }

        let crc = CRC64.checksum(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Write `<tile_dir>/<level>/<tile_id>.gph` atomically (temp file plus
    /// rename) and return the byte count.
    pub fn write(&self, tile_dir: &Path) -> Result<u64> {
        let dir = tile_dir.join(self.level.to_string());
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create tile directory {}", dir.display()))?;

        let buf = self.serialize();
        let path = dir.join(format!("{}.gph", self.tile_id));
        let tmp = dir.join(format!("{}.gph.tmp", self.tile_id));
        fs::write(&tmp, &buf)
            .with_context(|| format!("failed to write tile {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("failed to move tile into place at {}", path.display()))?;

        Ok(buf.len() as u64)
    }

    pub fn tile_path(tile_dir: &Path, level: u8, tile_id: u32) -> PathBuf {
        tile_dir
            .join(level.to_string())
            .join(format!("{}.gph", tile_id))
    }
}

/// A decoded tile, for verification and tests.
#[derive(Debug)]
pub struct TileFile {
    pub tile_id: u32,
    pub level: u8,
    pub nodes: Vec<NodeInfo>,
    pub directed_edges: Vec<DirectedEdge>,
    edge_info_bytes: Vec<u8>,
    text_bytes: Vec<u8>,
}

impl TileFile {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let buf = fs::read(path.as_ref())
            .with_context(|| format!("failed to read tile {}", path.as_ref().display()))?;
        if buf.len() < HEADER_SIZE + FOOTER_SIZE {
            bail!("tile file too short");
        }

        let content = &buf[..buf.len() - FOOTER_SIZE];
        let stored_crc = u64::from_le_bytes(buf[buf.len() - FOOTER_SIZE..].try_into()?);
        let computed_crc = CRC64.checksum(content);
        if stored_crc != computed_crc {
            bail!(
                "tile CRC mismatch: expected {:016x}, got {:016x}",
                stored_crc,
                computed_crc
            );
        }

        let magic = u32::from_le_bytes(buf[0..4].try_into()?);
        if magic != MAGIC {
            bail!("invalid tile magic {:08x}", magic);
        }
        let version = u16::from_le_bytes(buf[4..6].try_into()?);
        if version != VERSION {
            bail!("unsupported tile version {}", version);
        }

        let tile_id = u32::from_le_bytes(buf[8..12].try_into()?);
        let level = buf[12];
        let node_count = u32::from_le_bytes(buf[16..20].try_into()?) as usize;
        let edge_count = u32::from_le_bytes(buf[20..24].try_into()?) as usize;
        let edge_info_size = u64::from_le_bytes(buf[24..32].try_into()?) as usize;
        let text_size = u64::from_le_bytes(buf[32..40].try_into()?) as usize;

        let expected = HEADER_SIZE
            + node_count * NODE_INFO_SIZE
            + edge_count * DIRECTED_EDGE_SIZE
            + edge_info_size
            + text_size
            + FOOTER_SIZE;
        if buf.len() != expected {
            bail!(
                "tile size mismatch: header implies {} bytes, file has {}",
                expected,
                buf.len()
            );
        }

        let mut pos = HEADER_SIZE;
        let mut nodes = Vec::with_capacity(node_count);
        for _ in 0..node_count {
            nodes.push(NodeInfo::read(&buf[pos..])?);
            pos += NODE_INFO_SIZE;
        }
        let mut directed_edges = Vec::with_capacity(edge_count);
        for _ in 0..edge_count {
            directed_edges.push(DirectedEdge::read(&buf[pos..])?);
            pos += DIRECTED_EDGE_SIZE;
        }
        let edge_info_bytes = buf[pos..pos + edge_info_size].to_vec();
        pos += edge_info_size;
        let text_bytes = buf[pos..pos + text_size].to_vec();

        Ok(Self {
            tile_id,
            level,
            nodes,
            directed_edges,
            edge_info_bytes,
            text_bytes,
        })
    }

    pub fn edge_info_at(&self, offset: u32) -> Result<EdgeInfo> {
        let offset = offset as usize;
        if offset >= self.edge_info_bytes.len() {
            bail!("EdgeInfo offset {} out of range", offset);
        }
        EdgeInfo::read(&self.edge_info_bytes[offset..])
    }

    /// All EdgeInfo records with their byte offsets, in section order.
    pub fn edge_infos(&self) -> Result<Vec<(u32, EdgeInfo)>> {
        let mut out = Vec::new();
        let mut pos = 0usize;
        while pos < self.edge_info_bytes.len() {
            let info = EdgeInfo::read(&self.edge_info_bytes[pos..])?;
            let size = info.serialized_size();
            out.push((pos as u32, info));
            pos += size;
        }
        Ok(out)
    }

    pub fn text_at(&self, offset: u32) -> Result<&str> {
        let offset = offset as usize;
        let rest = self
            .text_bytes
            .get(offset..)
            .context("text offset out of range")?;
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .context("unterminated string in text pool")?;
        std::str::from_utf8(&rest[..end]).context("invalid UTF-8 in text pool")
    }

    pub fn text_pool(&self) -> &[u8] {
        &self.text_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tile() -> TileBuilder {
        let mut tile = TileBuilder::new(42, 2);

        let main_st = tile.add_text("Main St");
        let info_offset = tile.add_edge_info(EdgeInfo {
            node_a: GraphId::new(42, 2, 0),
            node_b: GraphId::new(42, 2, 1),
            name_offsets: vec![main_st],
            shape: vec![(0.0, 0.0), (0.0, 0.001)],
        });

        let edge = DirectedEdge {
            endnode: GraphId::new(42, 2, 1),
            edge_data_offset: info_offset,
            length_m: 111.0,
            speed_kph: 40.0,
            road_class: 4,
            road_use: 0,
            flags: FLAG_BRIDGE,
            access: ACCESS_AUTO_FORWARD | ACCESS_PED_FORWARD | ACCESS_PED_REVERSE,
            opp_index: 0,
            lanes: 2,
            bike_network: 0,
        };
        tile.add_node(
            NodeInfo {
                lat: 0.0,
                lon: 0.0,
                edge_index: 0,
                edge_count: 1,
            },
            vec![edge],
        );

        let reverse = DirectedEdge {
            endnode: GraphId::new(42, 2, 0),
            ..edge
        };
        tile.add_node(
            NodeInfo {
                lat: 0.0,
                lon: 0.001,
                edge_index: 1,
                edge_count: 1,
            },
            vec![reverse],
        );

        tile
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let tile = sample_tile();
        let bytes = tile.write(dir.path()).unwrap();
        assert!(bytes > 0);

        let path = TileBuilder::tile_path(dir.path(), 2, 42);
        let read = TileFile::read(&path).unwrap();
        assert_eq!(read.tile_id, 42);
        assert_eq!(read.level, 2);
        assert_eq!(read.nodes.len(), 2);
        assert_eq!(read.directed_edges.len(), 2);

        let (offset, info) = read.edge_infos().unwrap().remove(0);
        assert_eq!(offset, 0);
        assert_eq!(info.shape.len(), 2);
        assert_eq!(read.text_at(info.name_offsets[0]).unwrap(), "Main St");
        assert_eq!(read.directed_edges[0].flags, FLAG_BRIDGE);
    }

    #[test]
    fn test_corrupted_tile_fails_crc() {
        let dir = tempfile::tempdir().unwrap();
        sample_tile().write(dir.path()).unwrap();

        let path = TileBuilder::tile_path(dir.path(), 2, 42);
        let mut bytes = fs::read(&path).unwrap();
        bytes[HEADER_SIZE + 3] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        let err = TileFile::read(&path).unwrap_err();
        assert!(err.to_string().contains("CRC"), "got: {}", err);
    }

    #[test]
    fn test_text_offsets_include_nul() {
        let mut tile = TileBuilder::new(1, 2);
        assert_eq!(tile.add_text("ab"), 0);
        assert_eq!(tile.add_text("c"), 3);
        assert_eq!(tile.add_text("d"), 5);
    }

    #[test]
    fn test_edge_info_offsets_advance_by_size() {
        let mut tile = TileBuilder::new(1, 2);
        let first = EdgeInfo {
            node_a: GraphId::new(1, 2, 0),
            node_b: GraphId::new(1, 2, 1),
            name_offsets: vec![0],
            shape: vec![(0.0, 0.0), (1.0, 1.0)],
        };
        let size = first.serialized_size() as u32;
        assert_eq!(tile.add_edge_info(first), 0);
        let second = EdgeInfo {
            node_a: GraphId::new(1, 2, 1),
            node_b: GraphId::new(1, 2, 2),
            name_offsets: vec![],
            shape: vec![(0.0, 0.0), (2.0, 2.0)],
        };
        assert_eq!(tile.add_edge_info(second), size);
    }
}
