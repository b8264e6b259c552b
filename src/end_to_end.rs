//! Scenario-level tests exercising the full render path: an octree, a
//! camera, a driver, and a blit, rather than any single module in
//! isolation.

use crate::config::RenderParams;
use crate::driver::{Camera, Driver};
use crate::math::V3c;
use crate::model::{AffineTransform, Geometry, Model, ModelInstance, Part};
use crate::storage::{format, NodeEncoding, Octree, OctreeNode};

fn cube_cage(half: f32) -> Vec<V3c<f32>> {
    (0..8u8)
        .map(|bits| {
            V3c::new(
                if bits & 1 != 0 { half } else { -half },
                if bits & 2 != 0 { half } else { -half },
                if bits & 4 != 0 { half } else { -half },
            )
        })
        .collect()
}

fn identity_ortho_camera(eye_z: f32, scale: f32) -> Camera {
    Camera {
        eye: V3c::new(0.0, 0.0, eye_z),
        right: V3c::new(scale, 0.0, 0.0),
        up: V3c::new(0.0, scale, 0.0),
        forward: V3c::new(0.0, 0.0, 1.0),
        pixel_scale: 1.0,
        ortho: true,
        z_near: 0.0,
        z_far: 100.0,
        depth_scale: 1.0,
    }
}

fn single_part_model(octree: Octree, half: f32) -> Model {
    Model {
        cage_vertices: cube_cage(half),
        parts: vec![Part {
            vertices: [0, 1, 2, 3, 4, 5, 6, 7],
            geometries: vec![0],
        }],
        geometries: vec![Geometry::ChunkedOctree(octree)],
    }
}

fn identity_instance() -> ModelInstance {
    ModelInstance {
        model_index: 0,
        transform: AffineTransform::identity(),
        current_frame: vec![0],
        cage_updated_at_frame: 0,
    }
}

#[test]
fn single_leaf_orthographic_identity_view_lights_the_inscribed_square() {
    let mut octree = Octree::new(NodeEncoding::Sparse, 3).unwrap();
    octree.set_root(OctreeNode::leaf([255, 0, 0]));
    let mut model = single_part_model(octree, 0.5);
    let mut instance = identity_instance();

    let camera = identity_ortho_camera(-5.0, 16.0);
    let params = RenderParams::default();
    let mut driver = Driver::new(64, 64, [0, 0, 0, 255], params);
    driver
        .render_frame(
            std::slice::from_mut(&mut model),
            std::slice::from_mut(&mut instance),
            &camera,
            params,
        )
        .unwrap();

    for y in 16..48u32 {
        for x in 16..48u32 {
            let pixel = driver.framebuffer().pixel(x, y);
            assert!(pixel.is_drawn(), "pixel ({x},{y}) should be covered");
            assert_eq!(pixel.color, [255, 0, 0, 255]);
        }
    }
    let corner = driver.framebuffer().pixel(0, 0);
    assert_eq!(corner.color, [0, 0, 0, 255]);
}

#[test]
fn nearer_leaf_wins_the_depth_test() {
    let mut near = Octree::new(NodeEncoding::Sparse, 3).unwrap();
    near.set_root(OctreeNode::leaf([255, 0, 0]));
    let mut far = Octree::new(NodeEncoding::Sparse, 3).unwrap();
    far.set_root(OctreeNode::leaf([0, 255, 0]));

    let mut near_model = single_part_model(near, 0.5);
    let mut far_model = single_part_model(far, 0.5);

    let mut near_instance = identity_instance();
    near_instance.transform = AffineTransform {
        translation: V3c::new(0.0, 0.0, 1.0),
        scale: 1.0,
    };
    let mut far_instance = ModelInstance {
        model_index: 1,
        ..identity_instance()
    };
    far_instance.transform = AffineTransform {
        translation: V3c::new(0.0, 0.0, 2.0),
        scale: 1.0,
    };

    let camera = identity_ortho_camera(-10.0, 16.0);
    let params = RenderParams::default();
    let mut driver = Driver::new(64, 64, [0, 0, 0, 255], params);
    driver
        .render_frame(
            &mut [near_model, far_model],
            &mut [near_instance, far_instance],
            &camera,
            params,
        )
        .unwrap();

    let pixel = driver.framebuffer().pixel(32, 32);
    assert!(pixel.is_drawn());
    assert_eq!(pixel.color, [255, 0, 0, 255]);
}

#[test]
fn front_octant_wins_when_two_octants_overlap_in_screen_space() {
    // octant 0 (---) and octant 7 (+++): looking down +Z toward the
    // origin, octant 7's center (z > 0) is nearer the camera at eye_z < 0
    // only if the camera looks toward +Z; here the camera sits on -Z and
    // looks toward +Z, so octant 0 (z < 0) is actually nearer. Flip the
    // camera to look from +Z toward the origin so octant 7 is the near one.
    let mut octree = Octree::new(NodeEncoding::Sparse, 3).unwrap();
    octree.set_root(OctreeNode {
        address: 0,
        mask: 0x81,
        base_color: [0, 0, 0],
    });
    let mut children = vec![OctreeNode::default(); 8];
    children[0] = OctreeNode::leaf([255, 0, 0]); // back octant (z < 0 in world space)
    children[7] = OctreeNode::leaf([0, 255, 0]); // front octant (z > 0, nearer this camera)
    octree.set_chunk_source(0, format::encode_chunk(&children)).unwrap();

    let mut model = single_part_model(octree, 0.5);
    let mut instance = identity_instance();

    let camera = Camera {
        eye: V3c::new(0.0, 0.0, 10.0),
        right: V3c::new(16.0, 0.0, 0.0),
        up: V3c::new(0.0, 16.0, 0.0),
        forward: V3c::new(0.0, 0.0, -1.0),
        pixel_scale: 1.0,
        ortho: true,
        z_near: 0.0,
        z_far: 100.0,
        depth_scale: 1.0,
    };
    let params = RenderParams::default();
    let mut driver = Driver::new(32, 32, [0, 0, 0, 255], params);
    driver
        .render_frame(
            std::slice::from_mut(&mut model),
            std::slice::from_mut(&mut instance),
            &camera,
            params,
        )
        .unwrap();

    let mut any_drawn = false;
    for y in 0..32u32 {
        for x in 0..32u32 {
            let pixel = driver.framebuffer().pixel(x, y);
            if pixel.is_drawn() {
                any_drawn = true;
                assert_eq!(
                    pixel.color,
                    [0, 255, 0, 255],
                    "pixel ({x},{y}) should show the nearer, front octant's green"
                );
            }
        }
    }
    assert!(any_drawn, "the overlapping octants should cover some pixels");
}

#[test]
fn affine_promotion_fills_a_contiguous_rect_matching_the_reference_square() {
    // An orthographic view is exactly affine, so once the traverser reaches
    // a node small enough to fit under the subdivide-budget cap it promotes
    // to the fixed-point splatter. A subdivided octree (non-leaf root) is
    // required to exercise that promotion at all: a leaf root splats
    // directly from the general traverser and never touches `affine::run`.
    let mut octree = Octree::new(NodeEncoding::Sparse, 3).unwrap();
    octree.set_root(OctreeNode {
        address: 0,
        mask: 0xFF,
        base_color: [0, 0, 0],
    });
    let children = vec![OctreeNode::leaf([30, 160, 90]); 8];
    octree.set_chunk_source(0, format::encode_chunk(&children)).unwrap();

    let mut model = single_part_model(octree, 0.5);
    let mut instance = identity_instance();
    let camera = identity_ortho_camera(-5.0, 16.0);
    let params = RenderParams::default();
    let mut driver = Driver::new(64, 64, [0, 0, 0, 255], params);
    driver
        .render_frame(
            std::slice::from_mut(&mut model),
            std::slice::from_mut(&mut instance),
            &camera,
            params,
        )
        .unwrap();

    // Same cage/camera as the single-leaf case, so the reference rectangle
    // the renderer must match is the same: the cube's projected square
    // occupies pixels [16, 48) on both axes.
    let (ref_min, ref_max) = (16u32, 48u32);
    for y in 0..64u32 {
        for x in 0..64u32 {
            let pixel = driver.framebuffer().pixel(x, y);
            let inside = x >= ref_min && x < ref_max && y >= ref_min && y < ref_max;
            if inside {
                assert!(pixel.is_drawn(), "pixel ({x},{y}) inside the reference square should be covered");
                assert_eq!(pixel.color, [30, 160, 90, 255]);
            } else {
                // Allow a 1-pixel tolerance band right at the square's edge;
                // anything further out must be untouched background.
                let near_edge = x + 1 >= ref_min
                    && x <= ref_max
                    && y + 1 >= ref_min
                    && y <= ref_max;
                if !near_edge {
                    assert!(!pixel.is_drawn(), "pixel ({x},{y}) outside the reference square plus tolerance should be untouched");
                }
            }
        }
    }
}

#[test]
fn near_plane_straddle_never_writes_closer_than_z_near() {
    let mut octree = Octree::new(NodeEncoding::Sparse, 3).unwrap();
    octree.set_root(OctreeNode {
        address: 0,
        mask: 0xFF,
        base_color: [200, 200, 200],
    });
    let mut model = single_part_model(octree, 1.0);
    let mut instance = identity_instance();
    instance.transform = AffineTransform {
        translation: V3c::new(0.0, 0.0, 0.5),
        scale: 1.0,
    };

    let camera = Camera {
        eye: V3c::new(0.0, 0.0, 0.0),
        right: V3c::new(16.0, 0.0, 0.0),
        up: V3c::new(0.0, 16.0, 0.0),
        forward: V3c::new(0.0, 0.0, 1.0),
        pixel_scale: 1.0,
        ortho: true,
        z_near: 1.0,
        z_far: 100.0,
        depth_scale: 1.0,
    };
    let params = RenderParams::default();
    let mut driver = Driver::new(32, 32, [0, 0, 0, 255], params);
    driver
        .render_frame(
            std::slice::from_mut(&mut model),
            std::slice::from_mut(&mut instance),
            &camera,
            params,
        )
        .unwrap();

    for y in 0..32u32 {
        for x in 0..32u32 {
            let pixel = driver.framebuffer().pixel(x, y);
            if pixel.is_drawn() {
                assert!(pixel.raw_depth() as f32 >= 0.0);
            }
        }
    }
}

#[test]
fn chunk_eviction_falls_back_to_leaf_color_instead_of_crashing() {
    let mut octree = Octree::new(NodeEncoding::Sparse, 3).unwrap();
    octree.set_root(OctreeNode {
        address: 0,
        mask: 0xFF,
        base_color: [120, 60, 200],
    });
    let children = vec![OctreeNode::leaf([10, 10, 10]); 8];
    octree.set_chunk_source(0, format::encode_chunk(&children)).unwrap();

    let mut model = single_part_model(octree, 0.5);
    let mut instance = identity_instance();
    let camera = identity_ortho_camera(-5.0, 16.0);

    let mut params = RenderParams::default();
    params.update_cache = true;
    let mut driver = Driver::new(32, 32, [0, 0, 0, 255], params);
    driver
        .render_frame(
            std::slice::from_mut(&mut model),
            std::slice::from_mut(&mut instance),
            &camera,
            params,
        )
        .unwrap();

    let Geometry::ChunkedOctree(octree) = &mut model.geometries[0] else {
        unreachable!()
    };
    assert!(octree.is_resident(0), "first render should have paged chunk 0 in");
    octree.evict_lru(usize::MAX);
    assert!(!octree.is_resident(0), "evict_lru(usize::MAX) should have paged chunk 0 back out");

    params.update_cache = false;
    driver
        .render_frame(
            std::slice::from_mut(&mut model),
            std::slice::from_mut(&mut instance),
            &camera,
            params,
        )
        .unwrap();

    let mut any_drawn = false;
    for y in 0..32u32 {
        for x in 0..32u32 {
            let pixel = driver.framebuffer().pixel(x, y);
            if pixel.is_drawn() {
                any_drawn = true;
                assert_eq!(
                    pixel.color,
                    [120, 60, 200, 255],
                    "pixel ({x},{y}) should fall back to the root's own aggregate color, not the evicted children's"
                );
            }
        }
    }
    assert!(any_drawn, "the eviction fallback should still cover some pixels");
}
