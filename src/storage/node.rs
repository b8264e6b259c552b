//! The fixed-size octree node record.

#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OctreeNode {
    /// Index of the first of 8 consecutive children in the logical node
    /// address space, or `-1` for "not loaded / leaf".
    pub address: i32,
    /// Bit `i` set iff child `i` exists.
    pub mask: u8,
    pub base_color: [u8; 3],
}

impl Default for OctreeNode {
    fn default() -> Self {
        Self {
            address: -1,
            mask: 0,
            base_color: [0, 0, 0],
        }
    }
}

impl OctreeNode {
    pub const NOT_LOADED: i32 = -1;

    pub fn leaf(color: [u8; 3]) -> Self {
        Self {
            address: Self::NOT_LOADED,
            mask: 0,
            base_color: color,
        }
    }

    pub fn internal(address: i32, mask: u8, base_color: [u8; 3]) -> Self {
        Self {
            address,
            mask,
            base_color,
        }
    }

    /// A node with `mask == 0` is always a leaf, whether or not it carries
    /// paged-out children logically (children "exist" only if `mask` says
    /// so; `address < 0` just means they can't be read right now).
    pub fn is_leaf(&self) -> bool {
        self.mask == 0
    }

    /// Children exist logically but the chunk holding them is paged out.
    pub fn is_paged_out(&self) -> bool {
        self.mask != 0 && self.address < 0
    }

    pub fn has_child(&self, octant: u8) -> bool {
        debug_assert!(octant < 8);
        (self.mask & (1 << octant)) != 0
    }
}

#[cfg(feature = "bytecode")]
mod bytecode {
    use super::OctreeNode;
    use bendy::decoding::{FromBencode, Object};
    use bendy::encoding::{Error as BencodeError, SingleItemEncoder, ToBencode};

    impl ToBencode for OctreeNode {
        const MAX_DEPTH: usize = 2;
        fn encode(&self, encoder: SingleItemEncoder) -> Result<(), BencodeError> {
            encoder.emit_list(|e| {
                e.emit_int(self.address)?;
                e.emit_int(self.mask)?;
                e.emit_int(self.base_color[0])?;
                e.emit_int(self.base_color[1])?;
                e.emit_int(self.base_color[2])
            })
        }
    }

    impl FromBencode for OctreeNode {
        fn decode_bencode_object(data: Object) -> Result<Self, bendy::decoding::Error> {
            match data {
                Object::List(mut list) => {
                    let address = i32::decode_bencode_object(list.next_object()?.unwrap())?;
                    let mask = u8::decode_bencode_object(list.next_object()?.unwrap())?;
                    let r = u8::decode_bencode_object(list.next_object()?.unwrap())?;
                    let g = u8::decode_bencode_object(list.next_object()?.unwrap())?;
                    let b = u8::decode_bencode_object(list.next_object()?.unwrap())?;
                    Ok(OctreeNode {
                        address,
                        mask,
                        base_color: [r, g, b],
                    })
                }
                _ => Err(bendy::decoding::Error::unexpected_token(
                    "List of OctreeNode fields",
                    "something else",
                )),
            }
        }
    }
}

/// Translation table entry for the packed encoding: the physical
/// offset of octant `o`'s child, relative to a packed node's `address`, is
/// `popcount(mask & ((1 << o) - 1))` when present.
pub fn octant_to_index(mask: u8, octant: u8) -> u8 {
    debug_assert!(octant < 8);
    let below = mask & ((1u16 << octant) as u8 - 1u8);
    below.count_ones() as u8
}

/// Precomputes `octant_to_index` over the whole `(mask, octant)` domain, the
/// way describes it being baked once at init rather than
/// recomputed with `count_ones` on every traversal step.
pub fn build_octant_to_index_table() -> Box<[[u8; 8]; 256]> {
    let mut table = Box::new([[0u8; 8]; 256]);
    for mask in 0..=255usize {
        for octant in 0..8u8 {
            table[mask][octant as usize] = octant_to_index(mask as u8, octant);
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn octant_to_index_matches_popcount_below_bit() {
        for mask in 0..=255u16 {
            for octant in 0..8u8 {
                let mask = mask as u8;
                let expected = if mask & (1 << octant) != 0 {
                    (mask & ((1u16 << octant) as u8 - 1)).count_ones() as u8
                } else {
                    0
                };
                // The property only constrains present octants ;
                // for absent octants we still compute the same "children
                // before me" count, which is harmless since callers must
                // check `has_child` first.
                if mask & (1 << octant) != 0 {
                    assert_eq!(octant_to_index(mask, octant), expected);
                }
            }
        }
    }

    #[test]
    fn precomputed_table_matches_function() {
        let table = build_octant_to_index_table();
        for mask in 0..=255usize {
            for octant in 0..8u8 {
                assert_eq!(table[mask][octant as usize], octant_to_index(mask as u8, octant));
            }
        }
    }

    #[test]
    fn leaf_has_no_children() {
        let node = OctreeNode::leaf([1, 2, 3]);
        assert!(node.is_leaf());
        for o in 0..8 {
            assert!(!node.has_child(o));
        }
    }

    #[test]
    fn paged_out_node_keeps_mask_but_loses_address() {
        let node = OctreeNode::internal(-1, 0b0000_0011, [0, 0, 0]);
        assert!(!node.is_leaf());
        assert!(node.is_paged_out());
    }
}
