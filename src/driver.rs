//! Per-frame render driver: view projection, instance culling/sorting,
//! seeding each part's traversal, and the final blit.

use crate::config::RenderParams;
use crate::error::RenderResult;
use crate::framebuffer::Framebuffer;
use crate::grid::ProjectedGrid;
use crate::math::V3c;
use crate::model::{Geometry, Model, ModelInstance};
use crate::octant_map::OctantMap;
use crate::order::OrderTables;
use crate::storage::Octree;
use crate::traverse::{general, RenderContext};

/// An orthonormal view basis plus the projection constants: the view matrix
/// with the project-space scale baked in.
#[derive(Debug, Clone, Copy)]
pub struct Camera {
    pub eye: V3c<f32>,
    pub right: V3c<f32>,
    pub up: V3c<f32>,
    pub forward: V3c<f32>,
    pub pixel_scale: f32,
    pub ortho: bool,
    pub z_near: f32,
    pub z_far: f32,
    pub depth_scale: f32,
}

impl Camera {
    pub fn view_space(&self, world: V3c<f32>) -> V3c<f32> {
        let relative = world - self.eye;
        V3c::new(
            relative.dot(&self.right),
            relative.dot(&self.up),
            relative.dot(&self.forward),
        )
    }
}

pub struct Driver {
    order_tables: OrderTables,
    octant_map: OctantMap,
    framebuffer: Framebuffer,
}

impl Driver {
    pub fn new(width: u32, height: u32, background: [u8; 4], params: RenderParams) -> Self {
        Self {
            order_tables: OrderTables::new(),
            octant_map: OctantMap::new(params.map_shift),
            framebuffer: Framebuffer::new(width, height, background, params.subsample),
        }
    }

    pub fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }

    /// Renders one frame: cull, sort back-to-front, traverse every visible
    /// part, then blit. `models` is indexed by each instance's
    /// `model_index`. Takes `models` mutably because traversal pages
    /// chunks into each part's octree as it goes.
    pub fn render_frame(
        &mut self,
        models: &mut [Model],
        instances: &mut [ModelInstance],
        camera: &Camera,
        params: RenderParams,
    ) -> RenderResult<()> {
        self.framebuffer.clear([0, 0, 0, 255]);
        self.framebuffer.advance_frame();

        // 2. Frustum cull: an instance whose cage is entirely behind the
        // near plane or beyond the far plane contributes nothing.
        let mut visible: Vec<(usize, f32)> = instances
            .iter()
            .enumerate()
            .filter_map(|(i, instance)| {
                let model = &models[instance.model_index];
                let depths: Vec<f32> = model
                    .cage_vertices
                    .iter()
                    .map(|&v| camera.view_space(instance.transform.apply(v)).z)
                    .collect();
                let min_z = depths.iter().cloned().fold(f32::MAX, f32::min);
                let max_z = depths.iter().cloned().fold(f32::MIN, f32::max);
                if max_z < camera.z_near || min_z > camera.z_far {
                    None
                } else {
                    let avg_z = depths.iter().sum::<f32>() / depths.len() as f32;
                    Some((i, avg_z))
                }
            })
            .collect();

        // 3. Sort back-to-front so occlusion testing dominates overdraw.
        visible.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        for (instance_index, _) in visible {
            let instance = &instances[instance_index];
            let model = &mut models[instance.model_index];

            for (part_index, part) in model.parts.iter().enumerate() {
                let geometry_index = part.geometries[instance.current_frame[part_index] % part.geometries.len()];

                let world_corners = model.part_cage(part);
                let mut view_corners = [V3c::default(); 8];
                for (i, &corner) in world_corners.iter().enumerate() {
                    view_corners[i] = camera.view_space(instance.transform.apply(corner));
                }
                let grid = ProjectedGrid::from_corners(view_corners, camera.pixel_scale, camera.ortho);

                let Geometry::ChunkedOctree(octree) = &mut model.geometries[geometry_index] else {
                    continue;
                };
                octree.advance_frame();

                let mut ctx = RenderContext {
                    octree,
                    framebuffer: &mut self.framebuffer,
                    order_tables: &self.order_tables,
                    octant_map: &mut self.octant_map,
                    params,
                    z_near: camera.z_near,
                    z_far: camera.z_far,
                    depth_scale: camera.depth_scale,
                    pixel_scale: camera.pixel_scale,
                    ortho: camera.ortho,
                };
                let root = ctx.octree.root();
                general::render_node(&mut ctx, &grid, params.max_level, root.address, root.mask, root.base_color, 0)?;
            }
        }

        Ok(())
    }

    pub fn blit(&self, use_address: bool, depth_shift: Option<i32>, resolve_color: impl Fn(i32) -> Option<[u8; 3]>) -> Vec<u8> {
        self.framebuffer.blit(use_address, depth_shift, resolve_color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenderParams;
    use crate::model::{AffineTransform, Part};
    use crate::storage::{NodeEncoding, OctreeNode};

    fn unit_cube() -> Vec<V3c<f32>> {
        (0..8u8)
            .map(|bits| {
                V3c::new(
                    if bits & 1 != 0 { 0.5 } else { -0.5 },
                    if bits & 2 != 0 { 0.5 } else { -0.5 },
                    if bits & 4 != 0 { 0.5 } else { -0.5 },
                )
            })
            .collect()
    }

    #[test]
    fn single_leaf_orthographic_identity_view_fills_inscribed_square() {
        let mut octree = Octree::new(NodeEncoding::Sparse, 3).unwrap();
        octree.set_root(OctreeNode::leaf([255, 0, 0]));

        let mut model = Model {
            cage_vertices: unit_cube(),
            parts: vec![Part {
                vertices: [0, 1, 2, 3, 4, 5, 6, 7],
                geometries: vec![0],
            }],
            geometries: vec![Geometry::ChunkedOctree(octree)],
        };
        let mut instance = ModelInstance {
            model_index: 0,
            transform: AffineTransform::identity(),
            current_frame: vec![0],
            cage_updated_at_frame: 0,
        };

        let camera = Camera {
            eye: V3c::new(0.0, 0.0, -5.0),
            right: V3c::new(16.0, 0.0, 0.0),
            up: V3c::new(0.0, 16.0, 0.0),
            forward: V3c::new(0.0, 0.0, 1.0),
            pixel_scale: 1.0,
            ortho: true,
            z_near: 0.0,
            z_far: 100.0,
            depth_scale: 1.0,
        };

        let mut driver = Driver::new(64, 64, [0, 0, 0, 255], RenderParams::default());
        driver
            .render_frame(
                std::slice::from_mut(&mut model),
                std::slice::from_mut(&mut instance),
                &camera,
                RenderParams::default(),
            )
            .unwrap();

        let pixel = driver.framebuffer().pixel(32, 32);
        assert!(pixel.is_drawn());
        assert_eq!(pixel.color, [255, 0, 0, 255]);
    }
}
