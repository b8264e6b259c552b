//! Fixed-point affine splatter: once a subtree's projection is close enough
//! to affine, render it without further reprojection using integer deltas
//! and the octant occupancy map.

use super::RenderContext;
use crate::error::RenderResult;
use crate::math::{pot_shift_for, AffineMatrix, V3c, V3i};
use crate::order::{axis_order as resolve_axis_order, octant as resolve_octant, QueueIter};
use crate::storage::OctreeNode;

/// Fractional bits of the fixed-point coordinate system. Kept constant
/// here; the "max gap" halving step folds into the `pot_shift` clamp in
/// [`setup`] instead of mutating this.
const SUBPIXEL_SHIFT: u32 = 8;

struct NodeState {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
    center: V3i,
    level: u8,
    address: i32,
    mask: u8,
    color: [u8; 3],
    parent_color: [u8; 3],
}

struct Setup {
    pot_shift: u32,
    delta: [V3i; 8],
}

fn to_fixed(v: f32, shift: u32) -> i64 {
    (v * (1i64 << shift) as f32).round() as i64
}

/// Scales `matrix`'s axes into `subpixel_shift + pot_shift` fixed point and
/// precomputes the 8 octant center deltas, guarding the total shift budget
/// so `subpixel_shift + pot_shift` never exceeds 30.
fn setup(matrix: &AffineMatrix) -> Setup {
    let max_span = matrix.max_span().max(1e-3);
    let mut pot_shift = pot_shift_for(max_span);
    if SUBPIXEL_SHIFT + pot_shift > 30 {
        pot_shift = 30 - SUBPIXEL_SHIFT;
    }

    let scale = |v: V3c<f32>| V3i::new(
        to_fixed(v.x, SUBPIXEL_SHIFT),
        to_fixed(v.y, SUBPIXEL_SHIFT),
        to_fixed(v.z, SUBPIXEL_SHIFT),
    );
    let xs = scale(matrix.x_axis);
    let ys = scale(matrix.y_axis);
    let zs = scale(matrix.z_axis);

    let sign = |v: V3i, positive: bool| if positive { v } else { V3i::new(-v.x, -v.y, -v.z) };
    let mut delta = [V3i::zero(); 8];
    for octant in 0..8u8 {
        let dx = sign(xs, octant & 1 != 0);
        let dy = sign(ys, octant & 2 != 0);
        let dz = sign(zs, octant & 4 != 0);
        delta[octant as usize] = dx + dy + dz;
    }

    Setup { pot_shift, delta }
}

fn blend(parent: [u8; 3], leaf: [u8; 3], factor: u32) -> [u8; 3] {
    let inv = 255 - factor;
    let mut out = [0u8; 3];
    for c in 0..3 {
        let old = parent[c] as u32;
        let new = leaf[c] as u32;
        out[c] = (((old * inv + new * factor + 255) >> 8).min(255)) as u8;
    }
    out
}

pub fn run(
    ctx: &mut RenderContext,
    matrix: AffineMatrix,
    level_budget: u8,
    address: i32,
    mask: u8,
    color: [u8; 3],
) -> RenderResult<()> {
    let _ = level_budget; // the affine phase runs its own level counter from 1.
    let setup = self::setup(&matrix);
    ctx.octant_map.bake(matrix.x_axis, matrix.y_axis, matrix.z_axis);
    let ao = resolve_axis_order(matrix.x_axis, matrix.y_axis, matrix.z_axis);
    let start_octant = resolve_octant(matrix.x_axis, matrix.y_axis, matrix.z_axis);

    let fb_w = ctx.framebuffer.width();
    let fb_h = ctx.framebuffer.height();
    let half_w = matrix.x_axis.x.abs() + matrix.y_axis.x.abs() + matrix.z_axis.x.abs();
    let half_h = matrix.x_axis.y.abs() + matrix.y_axis.y.abs() + matrix.z_axis.y.abs();
    let x0 = (matrix.origin.x - half_w).max(0.0) as u32;
    let y0 = (matrix.origin.y - half_h).max(0.0) as u32;
    let x1 = ((matrix.origin.x + half_w).ceil() as u32).min(fb_w);
    let y1 = ((matrix.origin.y + half_h).ceil() as u32).min(fb_h);
    if x0 >= x1 || y0 >= y1 {
        return Ok(());
    }

    let center = V3i::new(
        to_fixed(matrix.origin.x, SUBPIXEL_SHIFT),
        to_fixed(matrix.origin.y, SUBPIXEL_SHIFT),
        to_fixed(matrix.origin.z, SUBPIXEL_SHIFT),
    );

    let mut stack = vec![NodeState {
        x0,
        y0,
        x1,
        y1,
        center,
        level: 1,
        address,
        mask,
        color,
        parent_color: color,
    }];

    while let Some(state) = stack.pop() {
        let mut mask = state.mask;
        if !ctx.params.update_cache && !ctx.octree.is_resident(state.address) {
            mask = 0;
        }
        let opaque_for_cubes = ctx.params.draw_cubes && mask == 0 && state.color != [0, 0, 0];
        let effective_mask = if opaque_for_cubes { 0xFFu8 } else { mask };

        if state.level >= ctx.params.max_level || effective_mask == 0 {
            splat(ctx, &state);
            continue;
        }

        let depth = (state.center.z >> SUBPIXEL_SHIFT) as i32;
        let mut any_visible = false;
        'rows: for y in state.y0..state.y1 {
            for x in state.x0..state.x1 {
                if depth < ctx.framebuffer.pixel(x, y).raw_depth() {
                    any_visible = true;
                    break 'rows;
                }
            }
        }
        if !any_visible {
            continue;
        }

        let side = (state.x1 - state.x0).max(state.y1 - state.y0);
        let parent_node = OctreeNode {
            address: state.address,
            mask: effective_mask,
            base_color: state.color,
        };

        if side <= ctx.params.splat_at as u32 {
            let queue = ctx.order_tables.forward(ao, start_octant, effective_mask);
            for child_octant in QueueIter(queue) {
                splat_child_point(ctx, &setup, &state, &parent_node, child_octant, opaque_for_cubes)?;
            }
            continue;
        }

        // Assign every pixel in the parent's rect to the nearest octant the
        // baked occupancy map says can cover it, rather than a screen-axis
        // midpoint split — the true split boundary between two octants is
        // perpendicular to their axis's 2D projection, which is exactly
        // what the map's `rotate90` face-normal test encodes, and is a
        // straight vertical/horizontal line only when the view has no roll
        // or shear.
        let rescale = (1u32 << (state.level.saturating_sub(1))) as f32;
        let center_x = state.center.x as f32 / (1i64 << SUBPIXEL_SHIFT) as f32;
        let center_y = state.center.y as f32 / (1i64 << SUBPIXEL_SHIFT) as f32;
        let mut bounds = [None::<(u32, u32, u32, u32)>; 8];
        for y in state.y0..state.y1 {
            let dy = (y as f32 + 0.5 - center_y) * rescale;
            for x in state.x0..state.x1 {
                let dx = (x as f32 + 0.5 - center_x) * rescale;
                let mut candidates = ctx.octant_map.sample(dx, dy) & effective_mask;
                if candidates == 0 {
                    candidates = effective_mask;
                }
                let nearest = match QueueIter(ctx.order_tables.forward(ao, start_octant, candidates)).next() {
                    Some(o) => o,
                    None => continue,
                };
                bounds[nearest as usize] = Some(match bounds[nearest as usize] {
                    Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x + 1), y1.max(y + 1)),
                    None => (x, y, x + 1, y + 1),
                });
            }
        }

        let queue = ctx.order_tables.reverse(ao, start_octant, effective_mask);
        for child_octant in QueueIter(queue) {
            let Some((nx0, ny0, nx1, ny1)) = bounds[child_octant as usize] else {
                continue;
            };
            let (child_address, child_mask, child_color) = if opaque_for_cubes {
                (state.address, 0xFFu8, state.color)
            } else {
                let logical = ctx.octree.child_logical_address(&parent_node, child_octant);
                let child = ctx.octree.read_node(logical, ctx.params.update_cache)?;
                (logical, child.mask, child.base_color)
            };
            let d = setup.delta[child_octant as usize].shr(state.level as u32);
            let child_center = state.center + d;
            stack.push(NodeState {
                x0: nx0,
                y0: ny0,
                x1: nx1,
                y1: ny1,
                center: child_center,
                level: state.level + 1,
                address: child_address,
                mask: child_mask,
                color: child_color,
                parent_color: state.color,
            });
        }
    }
    Ok(())
}

fn splat(ctx: &mut RenderContext, state: &NodeState) {
    let depth = (state.center.z >> SUBPIXEL_SHIFT) as i32;
    let color = if state.level >= ctx.params.max_level {
        blend(state.parent_color, state.color, 64)
    } else {
        state.color
    };
    let cx = (state.x0 + state.x1) as f32 * 0.5;
    let cy = (state.y0 + state.y1) as f32 * 0.5;
    let radius = ((state.x1 - state.x0).max(state.y1 - state.y0) as f32 * 0.5) + 0.5;
    for y in state.y0..state.y1 {
        for x in state.x0..state.x1 {
            if ctx.params.draw_circles {
                let dx = x as f32 + 0.5 - cx;
                let dy = y as f32 + 0.5 - cy;
                if dx * dx + dy * dy > radius * radius {
                    continue;
                }
            }
            let pixel = ctx.framebuffer.pixel_mut(x, y);
            if depth < pixel.raw_depth() {
                pixel.write(depth, [color[0], color[1], color[2], 255], state.address);
                if ctx.params.subsample {
                    ctx.framebuffer.blend_siblings(x, y);
                }
            }
        }
    }
}

fn splat_child_point(
    ctx: &mut RenderContext,
    setup: &Setup,
    state: &NodeState,
    parent_node: &OctreeNode,
    child_octant: u8,
    opaque_for_cubes: bool,
) -> RenderResult<()> {
    let (child_address, child_color) = if opaque_for_cubes {
        (state.address, state.color)
    } else {
        let logical = ctx.octree.child_logical_address(parent_node, child_octant);
        let child = ctx.octree.read_node(logical, ctx.params.update_cache)?;
        (logical, child.base_color)
    };
    let d = setup.delta[child_octant as usize].shr(state.level as u32);
    let c = state.center + d;
    let px = (c.x >> SUBPIXEL_SHIFT) as i64;
    let py = (c.y >> SUBPIXEL_SHIFT) as i64;
    if px < state.x0 as i64 || px >= state.x1 as i64 || py < state.y0 as i64 || py >= state.y1 as i64 {
        return Ok(());
    }
    let depth = (c.z >> SUBPIXEL_SHIFT) as i32;
    let radius = 1i64 << ctx.params.radius_shift;
    for oy in -radius..=radius {
        for ox in -radius..=radius {
            if ctx.params.draw_circles && ox * ox + oy * oy > radius * radius {
                continue;
            }
            let x = px + ox;
            let y = py + oy;
            if x < state.x0 as i64 || x >= state.x1 as i64 || y < state.y0 as i64 || y >= state.y1 as i64 {
                continue;
            }
            let pixel = ctx.framebuffer.pixel_mut(x as u32, y as u32);
            if depth < pixel.raw_depth() {
                pixel.write(depth, [child_color[0], child_color[1], child_color[2], 255], child_address);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_keeps_shift_budget_within_thirty_bits() {
        let matrix = AffineMatrix {
            origin: V3c::new(0.0, 0.0, 0.0),
            x_axis: V3c::new(1.0e6, 0.0, 0.0),
            y_axis: V3c::new(0.0, 1.0e6, 0.0),
            z_axis: V3c::new(0.0, 0.0, 1.0e6),
        };
        let s = setup(&matrix);
        assert!(SUBPIXEL_SHIFT + s.pot_shift <= 30);
    }

    #[test]
    fn opposite_octant_deltas_are_negations() {
        let matrix = AffineMatrix {
            origin: V3c::new(0.0, 0.0, 0.0),
            x_axis: V3c::new(4.0, 0.0, 0.0),
            y_axis: V3c::new(0.0, 4.0, 0.0),
            z_axis: V3c::new(0.0, 0.0, 4.0),
        };
        let s = setup(&matrix);
        assert_eq!(s.delta[0].x, -s.delta[1].x);
        assert_eq!(s.delta[0].y, -s.delta[2].y);
        assert_eq!(s.delta[0].z, -s.delta[4].z);
    }

    #[test]
    fn blend_is_identity_at_zero_factor() {
        assert_eq!(blend([10, 20, 30], [99, 98, 97], 0), [10, 20, 30]);
    }
}
