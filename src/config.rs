//! Rendering parameters: the single config carrier threaded through the
//! driver and both traversers in place of any global toggle.

#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderParams {
    /// Cap on recursion depth. 0..=16.
    pub max_level: u8,
    /// `log2(side)` of the octant-map bitmask image. 4..=8.
    pub map_shift: u8,
    /// Pixel-rectangle side at or below which the affine splatter enumerates
    /// children directly instead of consulting the octant map. 1..=8.
    pub splat_at: u8,
    /// Pixels of projection nonlinearity permitted before affine promotion.
    pub distortion_tolerance: f32,
    /// 0 means the framebuffer tracks the display size; otherwise caps
    /// `max(w, h)` at this value.
    pub render_size: u32,
    /// Bit shift applied to the precomputed disk radius in "circles" mode.
    pub radius_shift: u8,
    /// Enables the 2x2 jittered subsample accumulation buffer.
    pub subsample: bool,
    /// Restrict leaf splats to an inscribed disk instead of the full rect.
    pub draw_circles: bool,
    /// Treat every non-empty leaf as a full 8-child cube for bounding-box
    /// visualization.
    pub draw_cubes: bool,
    /// Whether chunk eviction/re-paging is allowed mid-render.
    pub update_cache: bool,
    /// When true, a pixel's displayed color is resampled from the node at
    /// `pixel.address` rather than the color written at splat time.
    pub use_address: bool,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            max_level: 12,
            map_shift: 6,
            splat_at: 2,
            distortion_tolerance: 1.0,
            render_size: 0,
            radius_shift: 0,
            subsample: false,
            draw_circles: false,
            draw_cubes: false,
            update_cache: true,
            use_address: false,
        }
    }
}

/// Which fields of a [`RenderParams`] were out of their valid range and got
/// silently clamped rather than rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClampedFields(pub Vec<&'static str>);

impl RenderParams {
    /// Builds params from `wanted`, clamping every field the documented bounds and
    /// reporting which ones moved. Never fails: there is no invalid input
    /// short of NaN, which is treated as the field's default.
    pub fn new(wanted: RenderParams) -> (RenderParams, ClampedFields) {
        let mut p = wanted;
        let mut clamped = Vec::new();

        let max_level = p.max_level.min(16);
        if max_level != p.max_level {
            clamped.push("max_level");
        }
        p.max_level = max_level;

        let map_shift = p.map_shift.clamp(4, 8);
        if map_shift != p.map_shift {
            clamped.push("map_shift");
        }
        p.map_shift = map_shift;

        let splat_at = p.splat_at.clamp(1, 8);
        if splat_at != p.splat_at {
            clamped.push("splat_at");
        }
        p.splat_at = splat_at;

        let tolerance = if p.distortion_tolerance.is_sign_negative() || p.distortion_tolerance.is_nan()
        {
            0.0
        } else {
            p.distortion_tolerance
        };
        if tolerance != p.distortion_tolerance {
            clamped.push("distortion_tolerance");
        }
        p.distortion_tolerance = tolerance;

        (p, ClampedFields(clamped))
    }

    /// The octant map's side length, `1 << map_shift`.
    pub fn map_side(&self) -> usize {
        1usize << self.map_shift
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_fields_are_clamped_not_rejected() {
        let wanted = RenderParams {
            max_level: 255,
            map_shift: 20,
            splat_at: 0,
            distortion_tolerance: -5.0,
            ..Default::default()
        };
        let (clamped, report) = RenderParams::new(wanted);
        assert_eq!(clamped.max_level, 16);
        assert_eq!(clamped.map_shift, 8);
        assert_eq!(clamped.splat_at, 1);
        assert_eq!(clamped.distortion_tolerance, 0.0);
        assert_eq!(
            report.0,
            vec!["max_level", "map_shift", "splat_at", "distortion_tolerance"]
        );
    }

    #[test]
    fn in_range_fields_pass_through_untouched() {
        let wanted = RenderParams::default();
        let (clamped, report) = RenderParams::new(wanted);
        assert_eq!(clamped, wanted);
        assert!(report.0.is_empty());
    }

    #[test]
    fn map_side_is_power_of_two() {
        let params = RenderParams {
            map_shift: 6,
            ..Default::default()
        };
        assert_eq!(params.map_side(), 64);
    }
}
