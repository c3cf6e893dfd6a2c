//! Dispatch sizing for the engine's kernel plans.
//!
//! The two-stage reduction geometry is a contract shared with the kernel
//! sources: stage one aggregates fixed-size blocks along each row into
//! per-group partial results, stage two combines the partials in a single
//! group. Work sizes always round up, so a dispatch covers every pixel and
//! boundary items clamp their own out-of-range reads.

use crate::driver::DispatchGrid;
use crate::scene::ImageSize;

/// Pixels consumed by one stage-one work item along its row.
pub const REDUCTION_BLOCK: u32 = 32;
/// Stage-one work-group width.
pub const REDUCTION_GROUP_WIDTH: u32 = 16;
/// Stage-one work-group height.
pub const REDUCTION_GROUP_HEIGHT: u32 = 8;
/// Stage-two group size; also its entire global size.
pub const COMBINE_GROUP_SIZE: u32 = 256;
/// Words in one per-group partial result and in the final result.
pub const REDUCTION_BINS: usize = 256;

const fn div_ceil(a: u32, b: u32) -> u32 {
    (a + b - 1) / b
}

/// Geometry of a stage-one (partial aggregation) dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReductionGrid {
    pub items_per_row: u32,
    pub groups: [u32; 2],
    pub grid: DispatchGrid,
}

impl ReductionGrid {
    /// Total number of work groups, which is also the number of partial
    /// results stage two consumes.
    #[must_use]
    pub const fn group_count(&self) -> u32 {
        self.groups[0] * self.groups[1]
    }
}

/// Stage-one geometry for an image of the given size.
#[must_use]
pub fn reduction_partial_grid(size: ImageSize) -> ReductionGrid {
    let items_per_row = div_ceil(size.width, REDUCTION_BLOCK);
    let groups = [
        div_ceil(items_per_row, REDUCTION_GROUP_WIDTH),
        div_ceil(size.height, REDUCTION_GROUP_HEIGHT),
    ];
    let local = [REDUCTION_GROUP_WIDTH, REDUCTION_GROUP_HEIGHT];
    ReductionGrid {
        items_per_row,
        groups,
        grid: DispatchGrid {
            global: [groups[0] * local[0], groups[1] * local[1]],
            local: Some(local),
        },
    }
}

/// Stage-two geometry: one group of [`COMBINE_GROUP_SIZE`] items.
#[must_use]
pub fn reduction_combine_grid() -> DispatchGrid {
    DispatchGrid {
        global: [COMBINE_GROUP_SIZE, 1],
        local: Some([COMBINE_GROUP_SIZE, 1]),
    }
}

/// Geometry for a general image-to-image kernel: one work item per pixel,
/// grouping left to the backend.
#[must_use]
pub fn image_grid(size: ImageSize) -> DispatchGrid {
    DispatchGrid {
        global: [size.width, size.height],
        local: None,
    }
}
