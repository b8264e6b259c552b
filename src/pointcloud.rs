//! External collaborator seam for the point-cloud readers — out of scope
//! here, declared with no bodies so the (also out-of-scope) discretization
//! pipeline has a stable target to implement against.

use crate::math::V3c;

pub struct PointSample {
    pub position: V3c<f32>,
    pub color: [u8; 4],
    pub normal: V3c<f32>,
}

pub trait PointCloudReader {
    fn read(&mut self) -> Option<PointSample>;
}
