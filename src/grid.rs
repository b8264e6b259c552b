//! Projected grids: the 3×3×3 array of corners and midpoints the general
//! traverser subdivides at each recursion step.

use crate::math::V3c;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProjectedVertex {
    pub position: V3c<f32>,
    pub projection: V3c<f32>,
}

/// `(x·z', y·z', z' = pixel_scale/z)` for perspective; identity for ortho.
pub fn project(position: V3c<f32>, pixel_scale: f32, ortho: bool) -> V3c<f32> {
    if ortho {
        position
    } else {
        let pz = pixel_scale / position.z;
        V3c::new(position.x * pz, position.y * pz, pz)
    }
}

fn grid_index(ix: usize, iy: usize, iz: usize) -> usize {
    iz * 9 + iy * 3 + ix
}

fn bit_to_coord(bit: u8) -> usize {
    if bit == 0 {
        0
    } else {
        2
    }
}

/// Grid index of octant-corner-bits `bits` (bit0 = x, bit1 = y, bit2 = z; 0
/// = low, 1 = high), i.e. one of the 8 outer corners of the 3×3×3 grid.
pub fn corner_index(bits: u8) -> usize {
    grid_index(
        bit_to_coord(bits & 1),
        bit_to_coord((bits >> 1) & 1),
        bit_to_coord((bits >> 2) & 1),
    )
}

/// For child octant `octant`, the grid indices of its 8 corners, in the
/// same bit-ordered convention as [`corner_index`].
pub fn subgrid_corner_indices(octant: u8) -> [usize; 8] {
    let span = |bit: u8| if bit == 0 { [0usize, 1] } else { [1usize, 2] };
    let xs = span(octant & 1);
    let ys = span((octant >> 1) & 1);
    let zs = span((octant >> 2) & 1);
    let mut out = [0usize; 8];
    for c in 0..8u8 {
        let ix = xs[(c & 1) as usize];
        let iy = ys[((c >> 1) & 1) as usize];
        let iz = zs[((c >> 2) & 1) as usize];
        out[c as usize] = grid_index(ix, iy, iz);
    }
    out
}

#[derive(Debug, Clone, Copy)]
pub struct ProjectedGrid {
    pub vertices: [ProjectedVertex; 27],
}

impl ProjectedGrid {
    pub fn from_corners(corners: [V3c<f32>; 8], pixel_scale: f32, ortho: bool) -> Self {
        let mut vertices = [ProjectedVertex::default(); 27];
        for bits in 0..8u8 {
            let position = corners[bits as usize];
            vertices[corner_index(bits)] = ProjectedVertex {
                position,
                projection: project(position, pixel_scale, ortho),
            };
        }
        let mut grid = Self { vertices };
        grid.subdivide(pixel_scale, ortho);
        grid
    }

    pub fn vertex(&self, ix: usize, iy: usize, iz: usize) -> &ProjectedVertex {
        &self.vertices[grid_index(ix, iy, iz)]
    }

    /// Fills the 19 missing midpoints, each by position-averaging exactly
    /// two already-known vertices and reprojecting. Visits indices in order
    /// of how many axes sit at the middle coordinate, so each midpoint's
    /// two parents are always already computed.
    fn subdivide(&mut self, pixel_scale: f32, ortho: bool) {
        let mut indices: Vec<(usize, usize, usize)> = Vec::with_capacity(19);
        for iz in 0..3 {
            for iy in 0..3 {
                for ix in 0..3 {
                    let mids = (ix == 1) as u8 + (iy == 1) as u8 + (iz == 1) as u8;
                    if mids > 0 {
                        indices.push((ix, iy, iz));
                    }
                }
            }
        }
        indices.sort_by_key(|&(ix, iy, iz)| (ix == 1) as u8 + (iy == 1) as u8 + (iz == 1) as u8);

        for (ix, iy, iz) in indices {
            let (ax, ay, az) = if ix == 1 {
                (0, iy, iz)
            } else if iy == 1 {
                (ix, 0, iz)
            } else {
                (ix, iy, 0)
            };
            let (bx, by, bz) = if ix == 1 {
                (2, iy, iz)
            } else if iy == 1 {
                (ix, 2, iz)
            } else {
                (ix, iy, 2)
            };
            let a = self.vertex(ax, ay, az).position;
            let b = self.vertex(bx, by, bz).position;
            let position = a.midpoint(&b);
            self.vertices[grid_index(ix, iy, iz)] = ProjectedVertex {
                position,
                projection: project(position, pixel_scale, ortho),
            };
        }
    }

    /// The 8 corners of `octant`'s child grid, for seeding its own
    /// `ProjectedGrid` at the next recursion level.
    pub fn child_corners(&self, octant: u8) -> [V3c<f32>; 8] {
        let indices = subgrid_corner_indices(octant);
        let mut out = [V3c::default(); 8];
        for (i, &idx) in indices.iter().enumerate() {
            out[i] = self.vertices[idx].position;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_cube_corners() -> [V3c<f32>; 8] {
        let mut corners = [V3c::default(); 8];
        for bits in 0..8u8 {
            let x = if bits & 1 != 0 { 1.0 } else { -1.0 };
            let y = if bits & 2 != 0 { 1.0 } else { -1.0 };
            let z = if bits & 4 != 0 { 1.0 } else { -1.0 };
            corners[bits as usize] = V3c::new(x, y, z);
        }
        corners
    }

    #[test]
    fn edge_midpoint_is_average_of_its_two_corners() {
        let grid = ProjectedGrid::from_corners(unit_cube_corners(), 1.0, true);
        let mid = grid.vertex(1, 0, 0).position;
        let a = grid.vertex(0, 0, 0).position;
        let b = grid.vertex(2, 0, 0).position;
        assert_eq!(mid, a.midpoint(&b));
    }

    #[test]
    fn center_is_average_of_opposite_face_centers() {
        let grid = ProjectedGrid::from_corners(unit_cube_corners(), 1.0, true);
        let center = grid.vertex(1, 1, 1).position;
        let front = grid.vertex(1, 1, 0).position;
        let back = grid.vertex(1, 1, 2).position;
        assert_eq!(center, front.midpoint(&back));
        assert_eq!(center, V3c::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn ortho_projection_is_identity() {
        let p = V3c::new(1.0, 2.0, 3.0);
        assert_eq!(project(p, 1.0, true), p);
    }

    #[test]
    fn perspective_projection_divides_xy_by_z() {
        let p = V3c::new(2.0, 4.0, 2.0);
        let projected = project(p, 10.0, false);
        // pz = pixel_scale / z = 5
        assert_eq!(projected, V3c::new(10.0, 20.0, 5.0));
    }

    #[test]
    fn child_corners_cover_the_right_octant_of_the_grid() {
        let grid = ProjectedGrid::from_corners(unit_cube_corners(), 1.0, true);
        // Octant 0 (all-low) child corners should all have non-positive xyz.
        let corners = grid.child_corners(0);
        for c in corners {
            assert!(c.x <= 0.0 && c.y <= 0.0 && c.z <= 0.0);
        }
        // Octant 7 (all-high) should all be non-negative.
        let corners = grid.child_corners(7);
        for c in corners {
            assert!(c.x >= 0.0 && c.y >= 0.0 && c.z >= 0.0);
        }
    }
}
