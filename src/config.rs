//! Ambient configuration knobs for the pipeline core.
//!
//! Mirrors the teacher crate's `Parameters<R>` struct: a plain, programmatically constructed
//! configuration value. CLI/flag parsing is an explicit Non-goal of the core and lives in an
//! external front-end, not in this crate.

use crate::numeric_types::{Index, Real};

/// Caps and memory-budget knobs for octree bucket recursion (see [`crate::octree`]).
#[derive(Clone, Debug)]
pub struct BucketingConfig<I: Index> {
    /// Maximum number of splats a single emitted bucket may contain
    pub max_bucket_splats: u64,
    /// Maximum number of cells a bucket may span along any axis
    pub max_cells: I,
    /// Upper bound on the number of microblocks a single recursion level may tile the cell into
    pub max_split: u64,
    /// Bucket size (in grid cells) used internally by the blob index fast path
    pub internal_bucket_size: I,
}

/// Per-stage queue depths and per-device buffer sizes for the worker pipeline (see
/// [`crate::pipeline`]).
#[derive(Clone, Debug)]
pub struct PipelineConfig<I: Index, R: Real> {
    pub bucketing: BucketingConfig<I>,
    /// Edge length of a grid cell, in world units
    pub cube_size: R,
    /// Number of reader workers
    pub reader_workers: usize,
    /// Number of bucket-loader workers
    pub bucket_loader_workers: usize,
    /// Number of copy-stage workers
    pub copy_workers: usize,
    /// Number of logical GPU devices, each backed by its own [`crate::pipeline::device::DeviceWorkerGroup`]
    pub num_devices: usize,
    /// Number of worker threads per device
    pub device_workers_per_device: usize,
    /// Maximum splats a single device item (pinned buffer slice) may hold
    pub max_device_item_splats: u64,
    /// Depth of each stage's bounded work queue
    pub queue_depth: usize,
    /// Capacity of the pinned host staging buffer, in splats
    pub pinned_buffer_splats: u64,
}

impl<I: Index, R: Real> PipelineConfig<I, R> {
    /// A small configuration suitable for unit/integration tests: single-threaded stages, tiny
    /// buffers, and caps chosen so that realistic small fixtures actually subdivide.
    pub fn for_tests(cube_size: R, max_cells: I, internal_bucket_size: I) -> Self {
        Self {
            bucketing: BucketingConfig {
                max_bucket_splats: 64,
                max_cells,
                max_split: 64,
                internal_bucket_size,
            },
            cube_size,
            reader_workers: 1,
            bucket_loader_workers: 1,
            copy_workers: 1,
            num_devices: 1,
            device_workers_per_device: 1,
            max_device_item_splats: 256,
            queue_depth: 4,
            pinned_buffer_splats: 1024,
        }
    }
}
