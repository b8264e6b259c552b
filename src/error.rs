use std::fmt;

/// Error conditions the renderer can surface to its caller.
///
/// Most traversal-time failures (malformed chunks, empty scissor rectangles,
/// non-resident chunks with caching disabled) are *not* represented here:
/// they recover locally by treating the offending subtree as a leaf and
/// never propagate. Only the handful of conditions that are fatal or
/// caller-visible get a variant.
#[derive(Debug)]
pub enum RenderError {
    /// The dense node array could not grow to satisfy an `unpack`. Fatal:
    /// the frame in progress is aborted.
    ResourceExhausted { requested_nodes: usize },
    /// `Octree::new`-style structural validation failure (size not a power
    /// of two, chunk_shift out of range, ...).
    InvalidNodeSize(u32),
    /// A logical node address fell outside the octree's address space.
    InvalidAddress(i32),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::ResourceExhausted { requested_nodes } => write!(
                f,
                "node array exhausted: could not grow to hold {requested_nodes} more nodes"
            ),
            RenderError::InvalidNodeSize(size) => {
                write!(f, "invalid node size {size}: must be a power of two")
            }
            RenderError::InvalidAddress(addr) => {
                write!(f, "node address {addr} is outside the octree's address space")
            }
        }
    }
}

impl std::error::Error for RenderError {}

pub type RenderResult<T> = Result<T, RenderError>;
