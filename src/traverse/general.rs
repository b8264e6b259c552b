//! Perspective-correct recursive traversal of a projected grid.

use super::{affine, RenderContext};
use crate::error::RenderResult;
use crate::grid::ProjectedGrid;
use crate::math::{AffineMatrix, ScreenBounds, V3c};
use crate::order::{octant as resolve_octant, axis_order as resolve_axis_order, QueueIter};
use crate::storage::OctreeNode;

/// One call per node visited. `parent_y_min` enforces "no re-testing of
/// pixels the parent already saw".
#[allow(clippy::too_many_arguments)]
pub fn render_node(
    ctx: &mut RenderContext,
    grid: &ProjectedGrid,
    level_budget: u8,
    address: i32,
    mask: u8,
    color: [u8; 3],
    parent_y_min: u32,
) -> RenderResult<()> {
    // 1. Bounds.
    let corners = (0..8u8).map(|bits| &grid.vertices[crate::grid::corner_index(bits)].projection);
    let depths: Vec<f32> = (0..8u8)
        .map(|bits| grid.vertices[crate::grid::corner_index(bits)].position.z)
        .collect();
    let bounds = ScreenBounds::from_points(corners, &depths);

    // 2. Scissor.
    let fb_w = ctx.framebuffer.width() as f32;
    let fb_h = ctx.framebuffer.height() as f32;
    if bounds.max_x < 0.0
        || bounds.max_y < 0.0
        || bounds.min_x > fb_w
        || bounds.min_y > fb_h
        || bounds.max_z < ctx.z_near
        || bounds.min_z > ctx.z_far
    {
        return Ok(());
    }

    // 3. Pixel rectangle.
    let ix_min = bounds.min_x.max(0.0).floor() as u32;
    let iy_min = (bounds.min_y.max(0.0).ceil() as u32).max(parent_y_min);
    let ix_max = (bounds.max_x.min(fb_w).ceil() as u32).min(ctx.framebuffer.width());
    let iy_max = (bounds.max_y.min(fb_h).ceil() as u32).min(ctx.framebuffer.height());
    if ix_min >= ix_max || iy_min >= iy_max {
        return Ok(());
    }

    // 4. Level / residency.
    let mut mask = mask;
    if level_budget == 0 || (!ctx.params.update_cache && !ctx.octree.is_resident(address)) {
        mask = 0;
    }
    let is_leaf = mask == 0;
    let rect_is_1x1 = ix_max - ix_min <= 1 && iy_max - iy_min <= 1;

    let mut y_min_for_children = 0u32;

    if bounds.min_z > ctx.z_near {
        let iz = ((bounds.min_z - ctx.z_near) * ctx.depth_scale) as i32;

        if rect_is_1x1 || is_leaf {
            splat_rect(ctx, ix_min, iy_min, ix_max, iy_max, iz, color, address);
            return Ok(());
        }

        let mut visible_from = None;
        'rows: for y in iy_min..iy_max {
            for x in ix_min..ix_max {
                if iz < ctx.framebuffer.pixel(x, y).raw_depth() {
                    visible_from = Some(y);
                    break 'rows;
                }
            }
        }
        let Some(first_visible_y) = visible_from else {
            return Ok(());
        };
        y_min_for_children = first_visible_y;

        if bounds.max_z < ctx.z_far && (ix_max - ix_min).max(iy_max - iy_min) < 32768 {
            if let Some(matrix) = is_approximately_affine(grid, ctx.params.distortion_tolerance) {
                return affine::run(ctx, matrix, level_budget, address, mask, color);
            }
        }
    } else if is_leaf || rect_is_1x1 {
        // 6. Near-plane straddle: only subdivision or skip; splatting forbidden.
        return Ok(());
    }

    // 7. Subdivide: each child's own grid is built from this grid's corners.
    // 8. Order.
    let x_axis = grid.vertex(2, 1, 1).position - grid.vertex(0, 1, 1).position;
    let y_axis = grid.vertex(1, 2, 1).position - grid.vertex(1, 0, 1).position;
    let z_axis = grid.vertex(1, 1, 2).position - grid.vertex(1, 1, 0).position;
    let ao = resolve_axis_order(x_axis, y_axis, z_axis);
    let start_octant = resolve_octant(x_axis, y_axis, z_axis);

    let opaque_for_cubes = ctx.params.draw_cubes && mask == 0 && !is_background(color);
    let effective_mask = if opaque_for_cubes { 0xFFu8 } else { mask };
    if effective_mask == 0 {
        return Ok(());
    }
    let queue = ctx.order_tables.reverse(ao, start_octant, effective_mask);

    let parent_node = OctreeNode {
        address,
        mask: effective_mask,
        base_color: color,
    };

    // 9. Recurse.
    for child_octant in QueueIter(queue) {
        let (child_address, child_mask, child_color) = if opaque_for_cubes {
            (address, 0xFFu8, color)
        } else {
            let logical = ctx.octree.child_logical_address(&parent_node, child_octant);
            let child = ctx.octree.read_node(logical, ctx.params.update_cache)?;
            (logical, child.mask, child.base_color)
        };
        let child_grid =
            ProjectedGrid::from_corners(grid.child_corners(child_octant), ctx.pixel_scale, ctx.ortho);
        render_node(
            ctx,
            &child_grid,
            level_budget.saturating_sub(1),
            child_address,
            child_mask,
            child_color,
            y_min_for_children,
        )?;
    }
    Ok(())
}

fn is_background(color: [u8; 3]) -> bool {
    color == [0, 0, 0]
}

fn splat_rect(
    ctx: &mut RenderContext,
    ix_min: u32,
    iy_min: u32,
    ix_max: u32,
    iy_max: u32,
    iz: i32,
    color: [u8; 3],
    address: i32,
) {
    let cx = (ix_min + ix_max) as f32 * 0.5;
    let cy = (iy_min + iy_max) as f32 * 0.5;
    let radius_sq = {
        let dx = (ix_max - ix_min) as f32 * 0.5 + 0.5;
        let dy = (iy_max - iy_min) as f32 * 0.5 + 0.5;
        (dx.max(dy)) * (dx.max(dy))
    };
    for y in iy_min..iy_max {
        for x in ix_min..ix_max {
            if ctx.params.draw_circles {
                let dx = x as f32 + 0.5 - cx;
                let dy = y as f32 + 0.5 - cy;
                if dx * dx + dy * dy > radius_sq {
                    continue;
                }
            }
            let pixel = ctx.framebuffer.pixel_mut(x, y);
            if iz < pixel.raw_depth() {
                pixel.write(iz, [color[0], color[1], color[2], 255], address);
                if ctx.params.subsample {
                    ctx.framebuffer.blend_siblings(x, y);
                }
            }
        }
    }
}

/// A "head vs. negated tail" distortion test, for each of the grid's
/// three axes; synthesizes an [`AffineMatrix`] from the half-sum of each
/// axis's two half-steps when all three pass.
pub fn is_approximately_affine(grid: &ProjectedGrid, tolerance: f32) -> Option<AffineMatrix> {
    let check_axis = |a: V3c<f32>, mid: V3c<f32>, b: V3c<f32>| -> Option<V3c<f32>> {
        let head = mid - a;
        let tail = b - mid;
        let diff = head - tail;
        if diff.x.abs() > tolerance || diff.y.abs() > tolerance || diff.z.abs() > tolerance {
            None
        } else {
            Some((head + tail) * 0.5)
        }
    };

    let center = grid.vertex(1, 1, 1).projection;
    let x_axis = check_axis(
        grid.vertex(0, 1, 1).projection,
        center,
        grid.vertex(2, 1, 1).projection,
    )?;
    let y_axis = check_axis(
        grid.vertex(1, 0, 1).projection,
        center,
        grid.vertex(1, 2, 1).projection,
    )?;
    let z_axis = check_axis(
        grid.vertex(1, 1, 0).projection,
        center,
        grid.vertex(1, 1, 2).projection,
    )?;

    Some(AffineMatrix {
        origin: center,
        x_axis,
        y_axis,
        z_axis,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_cube_corners(offset_z: f32) -> [V3c<f32>; 8] {
        let mut corners = [V3c::default(); 8];
        for bits in 0..8u8 {
            let x = if bits & 1 != 0 { 0.5 } else { -0.5 };
            let y = if bits & 2 != 0 { 0.5 } else { -0.5 };
            let z = if bits & 4 != 0 { 0.5 } else { -0.5 };
            corners[bits as usize] = V3c::new(x, y, z + offset_z);
        }
        corners
    }

    #[test]
    fn orthographic_grid_is_always_approximately_affine() {
        // Ortho projection is linear, so head == tail exactly for any tolerance.
        let grid = ProjectedGrid::from_corners(unit_cube_corners(5.0), 1.0, true);
        assert!(is_approximately_affine(&grid, 0.0).is_some());
    }

    #[test]
    fn affine_test_is_monotone_in_tolerance() {
        let grid = ProjectedGrid::from_corners(unit_cube_corners(2.0), 10.0, false);
        let loose = is_approximately_affine(&grid, 1000.0).is_some();
        let tight = is_approximately_affine(&grid, 0.0).is_some();
        // Raising tolerance cannot turn a passing grid into a failing one.
        if tight {
            assert!(loose);
        }
    }
}
