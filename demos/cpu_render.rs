//! Renders one frame of a small hand-built octree and writes it to a PNG,
//! exercising the driver the way an integrating application would.

#[cfg(feature = "render_export")]
fn main() {
    env_logger::init();

    use voxcage_rs::math::V3c;
    use voxcage_rs::model::{AffineTransform, Model, ModelInstance, Part};
    use voxcage_rs::storage::{NodeEncoding, Octree, OctreeNode};
    use voxcage_rs::{Camera, Driver, Geometry, RenderParams};

    let viewport_size = 256u32;

    let mut octree = Octree::new(NodeEncoding::Sparse, 10).unwrap();
    octree.set_root(OctreeNode {
        address: 0,
        mask: 0b1010_0101,
        base_color: [40, 40, 40],
    });
    // Children fall back to the cache's default empty-leaf chunk since no
    // source bytes are registered; still exercises the full traversal path.

    let mut model = Model {
        cage_vertices: (0..8u8)
            .map(|bits| {
                V3c::new(
                    if bits & 1 != 0 { 4.0 } else { -4.0 },
                    if bits & 2 != 0 { 4.0 } else { -4.0 },
                    if bits & 4 != 0 { 4.0 } else { -4.0 },
                )
            })
            .collect(),
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

    let angle: f32 = 0.6;
    let radius = 16.0;
    let eye = V3c::new(angle.sin() * radius, radius * 0.5, angle.cos() * radius);
    let forward = (V3c::new(0.0, 0.0, 0.0) - eye).normalized();
    let world_up = V3c::new(0.0, 1.0, 0.0);
    let right = world_up.cross(forward).normalized();
    let up = forward.cross(right).normalized();

    let camera = Camera {
        eye,
        right,
        up,
        forward,
        pixel_scale: 200.0,
        ortho: false,
        z_near: 0.1,
        z_far: 100.0,
        depth_scale: 64.0,
    };

    let params = RenderParams::default();
    let mut driver = Driver::new(viewport_size, viewport_size, [20, 20, 24, 255], params);
    driver
        .render_frame(
            std::slice::from_mut(&mut model),
            std::slice::from_mut(&mut instance),
            &camera,
            params,
        )
        .unwrap();

    let raw = driver.blit(false, None, |_| None);

    use image::{ImageBuffer, Rgba};
    let img: ImageBuffer<Rgba<u8>, _> =
        ImageBuffer::from_raw(viewport_size, viewport_size, raw).expect("blit buffer matches viewport size");
    img.save("cpu_render.png").expect("write cpu_render.png");
    println!("wrote cpu_render.png");
}

#[cfg(not(feature = "render_export"))]
fn main() {}
