//! Raw graph image save/load.
//!
//! Layout: `magic | version | crc32(body) | body`, body bincode-encoded.
//! The image carries the node-id address space, the entry point, every
//! node's level/link arrays in id order, and the id mapping. A load must
//! reproduce the link structure bit-exactly, not just equivalent search
//! behavior.

use crate::graph::GraphStore;
use crate::idmap::{IdMapping, MappingImage};
use crate::types::{EntryPoint, INVALID_NODEID};
use crossbeam_epoch::Guard;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::io::{Error, ErrorKind, Result};

const IMAGE_MAGIC: u32 = 0x4445_4B41; // "DEKA"
const IMAGE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
pub(crate) struct Image {
    pub graph: GraphImage,
    pub mapping: MappingImage,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct GraphImage {
    pub node_limit: u32,
    pub entry_node: u32,
    pub entry_level: i32,
    /// `(id, levels)` in ascending id order; links keep their array order.
    pub nodes: Vec<(u32, Vec<Vec<u32>>)>,
}

pub(crate) fn save(graph: &GraphStore, idmap: &IdMapping, guard: &Guard) -> Vec<u8> {
    let image = Image {
        graph: build_graph_image(graph, guard),
        mapping: idmap.to_image(),
    };
    encode(&image)
}

fn build_graph_image(graph: &GraphStore, guard: &Guard) -> GraphImage {
    let entry = graph.entry_point(guard);
    let mut nodes = Vec::with_capacity(graph.valid_node_count());
    for id in graph.live_node_ids() {
        let levels: Vec<Vec<u32>> = graph
            .get_levels(id, guard)
            .iter()
            .map(|links| links.to_vec())
            .collect();
        nodes.push((id, levels));
    }
    GraphImage {
        node_limit: graph.node_limit(),
        entry_node: entry.node,
        entry_level: entry.level,
        nodes,
    }
}

fn encode(image: &Image) -> Vec<u8> {
    let body = bincode::serialize(image).expect("graph image is always serializable");
    let mut out = Vec::with_capacity(12 + body.len());
    out.extend_from_slice(&IMAGE_MAGIC.to_le_bytes());
    out.extend_from_slice(&IMAGE_VERSION.to_le_bytes());
    out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

pub(crate) fn decode(bytes: &[u8]) -> Result<Image> {
    if bytes.len() < 12 {
        return Err(Error::new(ErrorKind::InvalidData, "image truncated"));
    }
    let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    let crc = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
    if magic != IMAGE_MAGIC {
        return Err(Error::new(ErrorKind::InvalidData, "bad image magic"));
    }
    if version != IMAGE_VERSION {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("unsupported image version {}", version),
        ));
    }
    let body = &bytes[12..];
    if crc32fast::hash(body) != crc {
        return Err(Error::new(ErrorKind::InvalidData, "image checksum mismatch"));
    }
    bincode::deserialize(body)
        .map_err(|e| Error::new(ErrorKind::InvalidData, format!("image decode: {}", e)))
}

pub(crate) fn restore_graph(graph: &GraphStore, image: &GraphImage, guard: &Guard) {
    for (id, levels) in &image.nodes {
        graph.make_node(*id, levels.len());
        for (level, links) in levels.iter().enumerate() {
            if !links.is_empty() {
                graph.set_link_array(*id, level, SmallVec::from_slice(links), guard);
            }
        }
    }
    graph.restore_node_limit(image.node_limit);
    if image.entry_node != INVALID_NODEID {
        graph.set_entry_point(
            EntryPoint {
                node: image.entry_node,
                level: image.entry_level,
            },
            guard,
        );
    }
}
