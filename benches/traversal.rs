use criterion::{criterion_group, criterion_main};

use voxcage_rs::{
    model::{AffineTransform, Model, ModelInstance, Part},
    storage::{NodeEncoding, Octree, OctreeNode},
    Camera, Driver, Geometry, RenderParams,
};
use voxcage_rs::math::V3c;

fn cube_cage() -> Vec<V3c<f32>> {
    (0..8u8)
        .map(|bits| {
            V3c::new(
                if bits & 1 != 0 { 32.0 } else { -32.0 },
                if bits & 2 != 0 { 32.0 } else { -32.0 },
                if bits & 4 != 0 { 32.0 } else { -32.0 },
            )
        })
        .collect()
}

fn checkerboard_octree(depth: u8) -> Octree {
    let mut octree = Octree::new(NodeEncoding::Sparse, 10).unwrap();
    // A handful of internal levels alternating leaf colors, deep enough
    // to exercise both the general and affine traversers per frame.
    let mut mask = 0u8;
    for octant in 0..8u8 {
        if octant % 2 == 0 {
            mask |= 1 << octant;
        }
    }
    octree.set_root(OctreeNode {
        address: 0,
        mask: if depth > 0 { mask } else { 0 },
        base_color: [80, 160, 220],
    });
    octree
}

fn criterion_benchmark(c: &mut criterion::Criterion) {
    let mut model = Model {
        cage_vertices: cube_cage(),
        parts: vec![Part {
            vertices: [0, 1, 2, 3, 4, 5, 6, 7],
            geometries: vec![0],
        }],
        geometries: vec![Geometry::ChunkedOctree(checkerboard_octree(4))],
    };
    let mut instance = ModelInstance {
        model_index: 0,
        transform: AffineTransform::identity(),
        current_frame: vec![0],
        cage_updated_at_frame: 0,
    };
    let camera = Camera {
        eye: V3c::new(0.0, 0.0, -200.0),
        right: V3c::new(1.0, 0.0, 0.0),
        up: V3c::new(0.0, 1.0, 0.0),
        forward: V3c::new(0.0, 0.0, 1.0),
        pixel_scale: 300.0,
        ortho: false,
        z_near: 1.0,
        z_far: 1000.0,
        depth_scale: 16.0,
    };

    c.bench_function("render_frame 512x512 single instance", |b| {
        let params = RenderParams::default();
        let mut driver = Driver::new(512, 512, [10, 10, 10, 255], params);
        b.iter(|| {
            driver
                .render_frame(
                    std::slice::from_mut(&mut model),
                    std::slice::from_mut(&mut instance),
                    &camera,
                    params,
                )
                .unwrap();
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
