//! The octant occupancy map: a square bitmask image baking, per pixel,
//! which of a node's 8 octants project over it — letting the affine
//! splatter skip per-pixel traversal.

use crate::math::V3c;

/// 2D rotate-90 of a vector's (x, y) components, used as a parallelepiped
/// face normal.
fn rotate90(v: V3c<f32>) -> (f32, f32) {
    (v.y, -v.x)
}

fn margin(normal: (f32, f32), a: V3c<f32>, b: V3c<f32>) -> f32 {
    let dot = |n: (f32, f32), v: V3c<f32>| (n.0 * v.x + n.1 * v.y).abs();
    0.5 * (dot(normal, a) + dot(normal, b))
}

pub struct OctantMap {
    shift: u8,
    bits: Vec<u8>,
    /// Half-extent, in the same screen-pixel units as the axes passed to
    /// [`bake`], that the baked texel grid spans: texel `(0,0)` is
    /// `(-bound, -bound)`, texel `(side-1, side-1)` is `(bound, bound)`.
    bound: f32,
}

impl OctantMap {
    pub fn new(shift: u8) -> Self {
        let side = 1usize << shift;
        Self {
            shift,
            bits: vec![0u8; side * side],
            bound: 1e-6,
        }
    }

    pub fn side(&self) -> usize {
        1usize << self.shift
    }

    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.bits[y * self.side() + x]
    }

    /// Looks up the octant bitmask for a point `(dx, dy)` pixels away from
    /// the baked node's screen-space center, at the same level the map was
    /// baked for. Out-of-range offsets clamp to the nearest edge texel
    /// rather than wrapping or panicking.
    pub fn sample(&self, dx: f32, dy: f32) -> u8 {
        let side = self.side();
        let to_texel = |d: f32| {
            let normalized = (d / self.bound).clamp(-1.0, 1.0);
            let t = ((normalized + 1.0) * 0.5 * side as f32) as isize;
            t.clamp(0, side as isize - 1) as usize
        };
        self.get(to_texel(dx), to_texel(dy))
    }

    /// Bakes the map from the node's three half-extent axes (each already
    /// scaled to the node's half-size). Each octant's 2D center sits at
    /// `±0.5·axis` for each axis per its sign bits (bit0 = x, bit1 = y,
    /// bit2 = z, in `(z⊗y⊗x)` order); containment is tested with three dot
    /// products against shared face
    /// normals, one per axis pair, against a margin bounding the
    /// parallelepiped.
    pub fn bake(&mut self, x_axis: V3c<f32>, y_axis: V3c<f32>, z_axis: V3c<f32>) {
        let n_x = rotate90(x_axis);
        let n_y = rotate90(y_axis);
        let n_z = rotate90(z_axis);
        let margin_x = margin(n_x, y_axis, z_axis);
        let margin_y = margin(n_y, z_axis, x_axis);
        let margin_z = margin(n_z, x_axis, y_axis);

        let bound = (x_axis.x.abs()
            + x_axis.y.abs()
            + y_axis.x.abs()
            + y_axis.y.abs()
            + z_axis.x.abs()
            + z_axis.y.abs())
        .max(1e-6);
        self.bound = bound;

        let side = self.side();
        for py in 0..side {
            let v = ((py as f32 + 0.5) / side as f32 * 2.0 - 1.0) * bound;
            for px in 0..side {
                let u = ((px as f32 + 0.5) / side as f32 * 2.0 - 1.0) * bound;

                let mut mask = 0u8;
                for octant in 0..8u8 {
                    let sx = if octant & 1 != 0 { 0.5 } else { -0.5 };
                    let sy = if octant & 2 != 0 { 0.5 } else { -0.5 };
                    let sz = if octant & 4 != 0 { 0.5 } else { -0.5 };
                    let cx = sx * x_axis.x + sy * y_axis.x + sz * z_axis.x;
                    let cy = sx * x_axis.y + sy * y_axis.y + sz * z_axis.y;
                    let (rx, ry) = (u - cx, v - cy);

                    let inside = (n_x.0 * rx + n_x.1 * ry).abs() <= margin_x
                        && (n_y.0 * rx + n_y.1 * ry).abs() <= margin_y
                        && (n_z.0 * rx + n_z.1 * ry).abs() <= margin_z;
                    if inside {
                        mask |= 1 << octant;
                    }
                }
                self.bits[py * side + px] = mask;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_aligned_octants_match_quadrant_signs() {
        let mut map = OctantMap::new(6);
        let x = V3c::new(1.0, 0.0, 0.0);
        let y = V3c::new(0.0, 1.0, 0.0);
        let z = V3c::new(0.0, 0.0, 1.0);
        map.bake(x, y, z);

        let side = map.side();
        let texel = map.get(side * 3 / 4, side * 3 / 4);
        // The ++ quadrant should include octants with x and y sign bits set...
        assert!(texel & (1 << 3) != 0);
        // ...but not the -- octant.
        assert!(texel & (1 << 0) == 0);
    }

    #[test]
    fn degenerate_z_axis_does_not_split_the_map() {
        // z contributes nothing to the 2D projection, so both z-sign
        // octants sharing an xy quadrant must always agree.
        let mut map = OctantMap::new(5);
        let x = V3c::new(1.0, 0.0, 0.0);
        let y = V3c::new(0.0, 1.0, 0.0);
        let z = V3c::new(0.0, 0.0, 1.0);
        map.bake(x, y, z);
        for texel in &map.bits {
            assert_eq!(texel & 0b0000_0001 != 0, texel & 0b0000_0100 != 0);
            assert_eq!(texel & 0b0000_0010 != 0, texel & 0b0000_1000 != 0);
        }
    }

    #[test]
    fn map_side_matches_shift() {
        let map = OctantMap::new(7);
        assert_eq!(map.side(), 128);
    }

    #[test]
    fn sample_agrees_with_get_at_the_matching_texel() {
        let mut map = OctantMap::new(6);
        let x = V3c::new(4.0, 0.0, 0.0);
        let y = V3c::new(0.0, 4.0, 0.0);
        let z = V3c::new(0.0, 0.0, 4.0);
        map.bake(x, y, z);

        let bits = map.sample(3.0, 3.0);
        assert_eq!(bits, map.get(map.side() * 3 / 4, map.side() * 3 / 4));
        assert!(bits & (1 << 3) != 0);
    }

    #[test]
    fn sample_clamps_out_of_range_offsets() {
        let mut map = OctantMap::new(5);
        map.bake(
            V3c::new(1.0, 0.0, 0.0),
            V3c::new(0.0, 1.0, 0.0),
            V3c::new(0.0, 0.0, 1.0),
        );
        assert_eq!(map.sample(1.0e6, 1.0e6), map.get(map.side() - 1, map.side() - 1));
        assert_eq!(map.sample(-1.0e6, -1.0e6), map.get(0, 0));
    }
}
