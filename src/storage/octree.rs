//! Chunked, paged octree node storage.
//!
//! Children are addressed through a flat *logical* address space, separate
//! from the root (which has no parent pointing at it). The space is cut
//! into fixed-size chunks; each chunk's content either lives in the dense
//! physical `nodes` array or is paged out, in which case `chunk_sources`
//! holds the bytes needed to re-materialize it on the next `unpack`.

use super::chunk::ChunkInfo;
use super::format;
use super::node::{build_octant_to_index_table, OctreeNode};
use crate::error::{RenderError, RenderResult};

/// Safety ceiling on the number of chunks a single octree will ever
/// register. A corrupted or adversarial logical address must not be able to
/// force `chunk_infos`/`chunk_sources` to grow without bound; a million
/// chunks is already far beyond any real scene's chunk count.
const MAX_CHUNKS: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEncoding {
    /// Children always occupy eight consecutive logical slots, indexed
    /// directly by octant.
    Sparse,
    /// Only children present in `mask` are stored, densely packed; octant
    /// `o`'s physical offset is `popcount(mask & ((1<<o)-1))`.
    Packed,
}

pub struct Octree {
    pub encoding: NodeEncoding,
    chunk_shift: u32,
    frame_counter: i32,
    root: OctreeNode,
    chunk_infos: Vec<ChunkInfo>,
    /// Packed bytes backing a chunk not currently resident. `None` means the
    /// chunk was authored in memory and has no on-disk counterpart to fall
    /// back to (it is still pageable: eviction just drops it, in which case
    /// later `unpack` synthesizes an empty/leaf chunk).
    chunk_sources: Vec<Option<Vec<u8>>>,
    nodes: Vec<OctreeNode>,
    /// Physical chunk-sized runs freed by eviction, ready for reuse before
    /// the dense array has to grow.
    free_runs: Vec<usize>,
    octant_to_index: Box<[[u8; 8]; 256]>,
}

impl Octree {
    pub fn new(encoding: NodeEncoding, chunk_shift: u32) -> RenderResult<Self> {
        if !(3..=20).contains(&chunk_shift) {
            return Err(RenderError::InvalidNodeSize(1u32 << chunk_shift.min(31)));
        }
        Ok(Self {
            encoding,
            chunk_shift,
            frame_counter: 0,
            root: OctreeNode::default(),
            chunk_infos: Vec::new(),
            chunk_sources: Vec::new(),
            nodes: Vec::new(),
            free_runs: Vec::new(),
            octant_to_index: build_octant_to_index_table(),
        })
    }

    pub fn chunk_size(&self) -> usize {
        1usize << self.chunk_shift
    }

    fn chunk_mask(&self) -> i32 {
        (self.chunk_size() as i32) - 1
    }

    pub fn root(&self) -> OctreeNode {
        self.root
    }

    pub fn set_root(&mut self, node: OctreeNode) {
        self.root = node;
    }

    pub fn advance_frame(&mut self) {
        self.frame_counter = self.frame_counter.wrapping_add(1);
    }

    fn ensure_chunk_slot(&mut self, chunk_index: usize) -> RenderResult<()> {
        if chunk_index >= MAX_CHUNKS {
            return Err(RenderError::InvalidAddress(chunk_index as i32));
        }
        if chunk_index >= self.chunk_infos.len() {
            self.chunk_infos.resize(chunk_index + 1, ChunkInfo::default());
            self.chunk_sources.resize(chunk_index + 1, None);
        }
        Ok(())
    }

    pub fn chunk_info(&self, chunk_index: usize) -> ChunkInfo {
        self.chunk_infos
            .get(chunk_index)
            .copied()
            .unwrap_or_default()
    }

    /// Registers the packed bytes a not-yet-resident chunk should decode
    /// from the next time it is unpacked (e.g. right after a whole-tree
    /// cache load).
    pub fn set_chunk_source(&mut self, chunk_index: usize, bytes: Vec<u8>) -> RenderResult<()> {
        self.ensure_chunk_slot(chunk_index)?;
        self.chunk_sources[chunk_index] = Some(bytes);
        Ok(())
    }

    fn grow_for(&mut self, additional: usize) {
        if self.nodes.len() + additional > self.nodes.capacity() {
            let mut new_cap = self.nodes.capacity().max(self.chunk_size()).max(1);
            while new_cap < self.nodes.len() + additional {
                new_cap *= 2;
            }
            self.nodes.reserve_exact(new_cap - self.nodes.capacity().min(new_cap));
        }
    }

    /// Materializes `chunk_index` into the dense physical array if it isn't
    /// resident already. No-op (beyond bumping `access_time`) otherwise.
    pub fn unpack(&mut self, chunk_index: usize) -> RenderResult<()> {
        self.ensure_chunk_slot(chunk_index)?;
        if self.chunk_infos[chunk_index].is_resident() {
            self.chunk_infos[chunk_index].access_time = self.frame_counter;
            return Ok(());
        }

        let chunk_size = self.chunk_size();
        let decoded = match &self.chunk_sources[chunk_index] {
            Some(bytes) => match format::decode_chunk(bytes, chunk_size) {
                Ok(nodes) => nodes,
                Err(_) => {
                    log::warn!("malformed chunk {chunk_index}, falling back to an empty leaf chunk");
                    vec![OctreeNode::default(); chunk_size]
                }
            },
            None => vec![OctreeNode::default(); chunk_size],
        };

        let start = if let Some(run) = self.free_runs.pop() {
            run
        } else {
            self.grow_for(chunk_size);
            if self.nodes.len() + chunk_size > i32::MAX as usize {
                log::error!("node array exhausted growing for chunk {chunk_index}");
                return Err(RenderError::ResourceExhausted {
                    requested_nodes: chunk_size,
                });
            }
            let start = self.nodes.len();
            self.nodes.resize(start + chunk_size, OctreeNode::default());
            start
        };

        self.nodes[start..start + chunk_size].copy_from_slice(&decoded);
        self.chunk_infos[chunk_index] = ChunkInfo {
            chunk_start: start as i32,
            access_time: self.frame_counter,
        };
        Ok(())
    }

    /// Evicts least-recently-used resident chunks until at least
    /// `target_free` node slots have been freed, or no more chunks can be
    /// evicted. Returns the number of node slots actually freed.
    pub fn evict_lru(&mut self, target_free: usize) -> usize {
        let chunk_size = self.chunk_size();
        let mut candidates: Vec<usize> = (0..self.chunk_infos.len())
            .filter(|&i| self.chunk_infos[i].is_resident())
            .collect();
        candidates.sort_by_key(|&i| self.chunk_infos[i].access_time);

        let mut freed = 0usize;
        for chunk_index in candidates {
            if freed >= target_free {
                break;
            }
            let start = self.chunk_infos[chunk_index].chunk_start;
            self.chunk_infos[chunk_index].chunk_start = -1;
            self.free_runs.push(start as usize);
            freed += chunk_size;
        }
        if freed > 0 {
            log::debug!("evicted {freed} node slots toward a target of {target_free}");
        }
        freed
    }

    /// Whether the chunk holding `logical_address` is currently resident,
    /// without paging it in.
    pub fn is_resident(&self, logical_address: i32) -> bool {
        if logical_address < 0 {
            return true;
        }
        let chunk_index = (logical_address as usize) / self.chunk_size();
        self.chunk_infos
            .get(chunk_index)
            .map(|c| c.is_resident())
            .unwrap_or(false)
    }

    /// Resolves the logical address of `octant`'s child given `parent`,
    /// honoring the storage's sparse/packed encoding.
    pub fn child_logical_address(&self, parent: &OctreeNode, octant: u8) -> i32 {
        debug_assert!(parent.has_child(octant));
        match self.encoding {
            NodeEncoding::Sparse => parent.address + octant as i32,
            NodeEncoding::Packed => {
                parent.address + self.octant_to_index[parent.mask as usize][octant as usize] as i32
            }
        }
    }

    /// Reads the node at `logical_address`, paging its chunk in if needed
    /// and allowed. When paging is disallowed and the chunk isn't resident,
    /// returns a leaf fallback node rather than faulting.
    pub fn read_node(&mut self, logical_address: i32, allow_paging: bool) -> RenderResult<OctreeNode> {
        if logical_address < 0 {
            return Ok(OctreeNode::default());
        }
        let chunk_size = self.chunk_size();
        let chunk_index = (logical_address as usize) / chunk_size;
        self.ensure_chunk_slot(chunk_index)?;

        if !self.chunk_infos[chunk_index].is_resident() {
            if !allow_paging {
                return Ok(OctreeNode::default());
            }
            self.unpack(chunk_index)?;
        } else {
            self.chunk_infos[chunk_index].access_time = self.frame_counter;
        }

        let start = self.chunk_infos[chunk_index].chunk_start;
        let offset = logical_address & self.chunk_mask();
        Ok(self.nodes[start as usize + offset as usize])
    }

    #[cfg(test)]
    pub(crate) fn resident_chunk_count(&self) -> usize {
        self.chunk_infos.iter().filter(|c| c.is_resident()).count()
    }
}

#[cfg(feature = "bytecode")]
mod bytecode {
    use super::*;
    use bendy::decoding::{FromBencode, Object};
    use bendy::encoding::{Error as BencodeError, SingleItemEncoder, ToBencode};

    /// Whole-tree snapshot: a literal memory dump (root, every chunk's
    /// residency and content, the encoding flag), distinct from the
    /// paging wire format which only ever describes one chunk at a time.
    impl ToBencode for Octree {
        const MAX_DEPTH: usize = 4;
        fn encode(&self, encoder: SingleItemEncoder) -> Result<(), BencodeError> {
            encoder.emit_list(|e| {
                e.emit_int(match self.encoding {
                    NodeEncoding::Sparse => 0u8,
                    NodeEncoding::Packed => 1u8,
                })?;
                e.emit_int(self.chunk_shift)?;
                e.emit(encode_node(&self.root))?;
                e.emit(
                    self.nodes
                        .iter()
                        .map(encode_node)
                        .collect::<Vec<_>>(),
                )
            })
        }
    }

    fn encode_node(n: &OctreeNode) -> Vec<u8> {
        let mut v = Vec::with_capacity(8);
        v.extend_from_slice(&n.address.to_le_bytes());
        v.push(n.mask);
        v.extend_from_slice(&n.base_color);
        v
    }

    fn decode_node(bytes: &[u8]) -> Result<OctreeNode, bendy::decoding::Error> {
        if bytes.len() != 8 {
            return Err(bendy::decoding::Error::unexpected_token(
                "8-byte OctreeNode",
                "a differently sized byte string",
            ));
        }
        Ok(OctreeNode {
            address: i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            mask: bytes[4],
            base_color: [bytes[5], bytes[6], bytes[7]],
        })
    }

    impl FromBencode for Octree {
        fn decode_bencode_object(data: Object) -> Result<Self, bendy::decoding::Error> {
            match data {
                Object::List(mut list) => {
                    let encoding_tag = u8::decode_bencode_object(list.next_object()?.unwrap())?;
                    let encoding = if encoding_tag == 0 {
                        NodeEncoding::Sparse
                    } else {
                        NodeEncoding::Packed
                    };
                    let chunk_shift = u32::decode_bencode_object(list.next_object()?.unwrap())?;
                    let root_bytes = Vec::<u8>::decode_bencode_object(list.next_object()?.unwrap())?;
                    let root = decode_node(&root_bytes)?;
                    let node_byte_strings =
                        Vec::<Vec<u8>>::decode_bencode_object(list.next_object()?.unwrap())?;
                    let mut nodes = Vec::with_capacity(node_byte_strings.len());
                    for n in node_byte_strings {
                        nodes.push(decode_node(&n)?);
                    }

                    let chunk_size = 1usize << chunk_shift;
                    let chunk_count = nodes.len() / chunk_size.max(1);
                    let mut tree = Octree::new(encoding, chunk_shift).map_err(|_| {
                        bendy::decoding::Error::unexpected_token(
                            "valid chunk_shift",
                            "out of range chunk_shift",
                        )
                    })?;
                    tree.root = root;
                    tree.nodes = nodes;
                    tree.chunk_infos = (0..chunk_count)
                        .map(|i| ChunkInfo {
                            chunk_start: (i * chunk_size) as i32,
                            access_time: 0,
                        })
                        .collect();
                    tree.chunk_sources = vec![None; chunk_count];
                    Ok(tree)
                }
                _ => Err(bendy::decoding::Error::unexpected_token(
                    "List of Octree fields",
                    "something else",
                )),
            }
        }
    }

    impl Octree {
        pub fn to_bytes(&self) -> Vec<u8> {
            self.to_bencode().expect("Octree bencode encoding is infallible")
        }

        pub fn from_bytes(bytes: &[u8]) -> Result<Octree, bendy::decoding::Error> {
            Octree::from_bencode(bytes)
        }

        pub fn save(&self, path: &str) -> std::io::Result<()> {
            std::fs::write(path, self.to_bytes())
        }

        pub fn load(path: &str) -> std::io::Result<Octree> {
            let bytes = std::fs::read(path)?;
            Octree::from_bytes(&bytes)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(color: [u8; 3]) -> OctreeNode {
        OctreeNode::leaf(color)
    }

    #[test]
    fn unpack_with_no_source_yields_an_empty_leaf_chunk() {
        let mut tree = Octree::new(NodeEncoding::Sparse, 3).unwrap();
        tree.unpack(0).unwrap();
        assert_eq!(tree.resident_chunk_count(), 1);
        let node = tree.read_node(0, true).unwrap();
        assert!(node.is_leaf());
    }

    #[test]
    fn read_node_pages_in_lazily() {
        let mut tree = Octree::new(NodeEncoding::Sparse, 3).unwrap();
        let mut children = vec![OctreeNode::default(); 8];
        children[3] = leaf([9, 9, 9]);
        tree.set_chunk_source(0, format::encode_chunk(&children)).unwrap();

        assert_eq!(tree.chunk_info(0).chunk_start, -1);
        let node = tree.read_node(3, true).unwrap();
        assert_eq!(node.base_color, [9, 9, 9]);
        assert!(tree.chunk_info(0).is_resident());
    }

    #[test]
    fn disallowed_paging_returns_leaf_fallback_without_materializing() {
        let mut tree = Octree::new(NodeEncoding::Sparse, 3).unwrap();
        tree.set_chunk_source(0, format::encode_chunk(&vec![leaf([1, 1, 1]); 8])).unwrap();
        let node = tree.read_node(0, false).unwrap();
        assert!(node.is_leaf());
        assert_eq!(tree.resident_chunk_count(), 0);
    }

    #[test]
    fn evict_then_read_reloads_from_source_not_crash() {
        let mut tree = Octree::new(NodeEncoding::Sparse, 3).unwrap();
        tree.set_chunk_source(0, format::encode_chunk(&vec![leaf([2, 2, 2]); 8])).unwrap();
        tree.read_node(0, true).unwrap();
        assert_eq!(tree.evict_lru(8), 8);
        assert_eq!(tree.resident_chunk_count(), 0);

        let node = tree.read_node(0, true).unwrap();
        assert_eq!(node.base_color, [2, 2, 2]);
    }

    #[test]
    fn eviction_prefers_least_recently_accessed_chunk() {
        let mut tree = Octree::new(NodeEncoding::Sparse, 3).unwrap();
        tree.set_chunk_source(0, format::encode_chunk(&vec![leaf([1, 0, 0]); 8])).unwrap();
        tree.set_chunk_source(8, format::encode_chunk(&vec![leaf([0, 1, 0]); 8])).unwrap();
        tree.read_node(0, true).unwrap();
        tree.advance_frame();
        tree.read_node(8, true).unwrap();
        tree.advance_frame();
        // touch chunk 0 again so it becomes the most-recently-used
        tree.read_node(0, true).unwrap();

        tree.evict_lru(8);
        assert!(!tree.chunk_info(1).is_resident()); // chunk index 1 == logical addr 8
        assert!(tree.chunk_info(0).is_resident());
    }

    #[test]
    fn packed_encoding_resolves_children_by_popcount() {
        let tree = Octree::new(NodeEncoding::Packed, 3).unwrap();
        let parent = OctreeNode::internal(100, 0b0010_1001, [0, 0, 0]);
        // present octants: 0, 3, 5 -> physical offsets 0, 1, 2
        assert_eq!(tree.child_logical_address(&parent, 0), 100);
        assert_eq!(tree.child_logical_address(&parent, 3), 101);
        assert_eq!(tree.child_logical_address(&parent, 5), 102);
    }

    #[test]
    fn sparse_encoding_resolves_children_by_octant_directly() {
        let tree = Octree::new(NodeEncoding::Sparse, 3).unwrap();
        let parent = OctreeNode::internal(100, 0b1111_1111, [0, 0, 0]);
        for o in 0..8u8 {
            assert_eq!(tree.child_logical_address(&parent, o), 100 + o as i32);
        }
    }

    #[cfg(feature = "bytecode")]
    #[test]
    fn whole_tree_round_trips_through_bencode() {
        let mut tree = Octree::new(NodeEncoding::Sparse, 3).unwrap();
        tree.set_root(OctreeNode::internal(0, 0b0000_0001, [5, 6, 7]));
        tree.set_chunk_source(0, format::encode_chunk(&vec![leaf([1, 2, 3]); 8])).unwrap();
        tree.read_node(0, true).unwrap();

        let bytes = tree.to_bytes();
        let mut reloaded = Octree::from_bytes(&bytes).unwrap();
        assert_eq!(reloaded.root(), tree.root());
        assert_eq!(reloaded.read_node(0, false).unwrap().base_color, [1, 2, 3]);
    }
}
