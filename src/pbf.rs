//! Streaming passes over an OSM PBF dump.
//!
//! The builder consumes the dump one entity kind at a time; each pass streams
//! the whole file and forwards only the requested kind to the handler. The
//! first handler error aborts the pass.

use anyhow::{anyhow, Result};
use osmpbf::{Element, ElementReader};
use std::path::Path;

use crate::error::BuildError;
use crate::transform::Tags;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Ways,
    Nodes,
    Relations,
}

/// A relation member, carried through for the reserved relations pass.
#[derive(Debug, Clone)]
pub struct RelationMember {
    pub role: String,
    pub member_id: i64,
}

/// Typed callbacks, one per entity kind. Only the callback matching the
/// running pass is invoked.
pub trait PbfHandler {
    fn on_way(&mut self, id: u64, tags: Tags, refs: Vec<u64>) -> Result<()>;
    fn on_node(&mut self, id: u64, lng: f64, lat: f64, tags: Tags) -> Result<()>;
    fn on_relation(&mut self, id: u64, tags: Tags, members: Vec<RelationMember>) -> Result<()>;
}

fn collect_tags<'a, I: Iterator<Item = (&'a str, &'a str)>>(iter: I) -> Tags {
    iter.map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn to_id(raw: i64) -> Result<u64> {
    u64::try_from(raw).map_err(|_| anyhow!("negative entity id {} in dump", raw))
}

pub fn read_pass<P, H>(path: P, pass: Pass, handler: &mut H) -> Result<()>
where
    P: AsRef<Path>,
    H: PbfHandler,
{
    let reader = ElementReader::from_path(path.as_ref()).map_err(BuildError::Parse)?;

    let mut first_err: Option<anyhow::Error> = None;
    reader
        .for_each(|element| {
            if first_err.is_some() {
                return;
            }
            let result = dispatch(pass, element, handler);
            if let Err(e) = result {
                first_err = Some(e);
            }
        })
        .map_err(BuildError::Parse)?;

    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn dispatch<H: PbfHandler>(pass: Pass, element: Element<'_>, handler: &mut H) -> Result<()> {
    match (pass, element) {
        (Pass::Ways, Element::Way(way)) => {
            let id = to_id(way.id())?;
            let refs = way
                .refs()
                .map(to_id)
                .collect::<Result<Vec<u64>>>()?;
            handler.on_way(id, collect_tags(way.tags()), refs)
        }
        (Pass::Nodes, Element::Node(node)) => handler.on_node(
            to_id(node.id())?,
            node.lon(),
            node.lat(),
            collect_tags(node.tags()),
        ),
        (Pass::Nodes, Element::DenseNode(node)) => handler.on_node(
            to_id(node.id())?,
            node.lon(),
            node.lat(),
            collect_tags(node.tags()),
        ),
        (Pass::Relations, Element::Relation(relation)) => {
            let members = relation
                .members()
                .map(|m| RelationMember {
                    role: m.role().unwrap_or("").to_string(),
                    member_id: m.member_id,
                })
                .collect();
            handler.on_relation(to_id(relation.id())?, collect_tags(relation.tags()), members)
        }
        _ => Ok(()),
    }
}
