//! `Model` / `ModelInstance` / `Part` and the tagged `Geometry` variant:
//! a tagged enum in place of dynamic dispatch over geometry kinds.

use crate::math::V3c;
use crate::storage::Octree;

/// A per-part geometry reference. The hot path monomorphizes over
/// `ChunkedOctree`; `Other` exists so a part can opt into a future geometry
/// representation without every consumer matching on a trait object.
pub enum Geometry {
    ChunkedOctree(Octree),
    Other(Box<dyn std::any::Any>),
}

/// Eight indices into a model's `cage_vertices`, and the animation-frame
/// geometry indices this part cycles through.
pub struct Part {
    pub vertices: [usize; 8],
    pub geometries: Vec<usize>,
}

pub struct Model {
    pub cage_vertices: Vec<V3c<f32>>,
    pub parts: Vec<Part>,
    pub geometries: Vec<Geometry>,
}

impl Model {
    pub fn part_cage(&self, part: &Part) -> [V3c<f32>; 8] {
        let mut corners = [V3c::default(); 8];
        for (i, &vi) in part.vertices.iter().enumerate() {
            corners[i] = self.cage_vertices[vi];
        }
        corners
    }
}

/// An instance of a [`Model`]: its transform, the current animation frame
/// per part, and the frame number its cage was last re-projected at.
pub struct ModelInstance {
    pub model_index: usize,
    pub transform: AffineTransform,
    pub current_frame: Vec<usize>,
    pub cage_updated_at_frame: i32,
}

/// A rigid/scale transform from model space to world space, kept separate
/// from [`crate::math::AffineMatrix`] (which is a screen-space projection
/// result, not an input transform).
#[derive(Debug, Clone, Copy)]
pub struct AffineTransform {
    pub translation: V3c<f32>,
    pub scale: f32,
}

impl AffineTransform {
    pub fn identity() -> Self {
        Self {
            translation: V3c::default(),
            scale: 1.0,
        }
    }

    pub fn apply(&self, point: V3c<f32>) -> V3c<f32> {
        point * self.scale + self.translation
    }
}
