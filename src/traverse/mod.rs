//! The two cooperating traversal modes, sharing a [`RenderContext`] instead
//! of any global mutable state.

pub mod affine;
pub mod general;

use crate::config::RenderParams;
use crate::framebuffer::Framebuffer;
use crate::octant_map::OctantMap;
use crate::order::OrderTables;
use crate::storage::Octree;

pub struct RenderContext<'a> {
    pub octree: &'a mut Octree,
    pub framebuffer: &'a mut Framebuffer,
    pub order_tables: &'a OrderTables,
    pub octant_map: &'a mut OctantMap,
    pub params: RenderParams,
    pub z_near: f32,
    pub z_far: f32,
    pub depth_scale: f32,
    pub pixel_scale: f32,
    pub ortho: bool,
}
