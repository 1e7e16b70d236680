//!
//! Out-of-core data-flow core for surface reconstruction of very large oriented splat clouds.
//! Turns a stream of splats (position, normal, influence radius) into watertight mesh chunks by
//! routing them from disk through a bounded memory hierarchy into GPU-shaped compute stages.
//! Entry point is [`pipeline::Pipeline`].
//!

/// Re-export the version of nalgebra used by this crate
pub use nalgebra;

mod aabb;
/// Differentially-coded on-disk index mapping splats to the buckets they touch
pub mod blob;
/// Bounded byte arena used to stage splats between pipeline stages
pub mod circular_buffer;
/// Ambient configuration knobs for the pipeline (memory budgets, queue depths, device counts)
pub mod config;
/// Error types returned by the pipeline core
pub mod error;
/// Generic top-down octree traversal shared by bucket recursion and histogramming
pub mod generic_tree;
/// Uniform reconstruction grid and octree node addressing
pub mod grid;
/// Trait boundaries for the external collaborators (splat source, device kernels, mesh sink)
pub mod io;
/// Morton (Z-order) codes
pub mod morton;
mod numeric_types;
/// Recursive octree bucketing of a splat set into GPU-sized work units
pub mod octree;
/// The multi-stage worker pipeline (reader, bucket loader, copy, device, mesher)
pub mod pipeline;
/// Run-length encoded splat id ranges
pub mod range;
/// Core data model: splats, blob records, chunk ids, bucket work units
pub mod splat;
/// Per-bucket GPU-resident splat tree construction
pub mod splat_tree;
/// Process-wide named counter registry
pub mod stats;
/// Generic worker-pool framework: item pool + bounded work queue
pub mod worker;
/// Thread-local buffer reuse between pipeline runs
pub(crate) mod workspace;

pub use aabb::AxisAlignedBoundingBox3d;
pub use config::PipelineConfig;
pub use error::PipelineError;
pub use grid::{GridConstructionError, UniformGrid};
pub use numeric_types::{Index, Real, ThreadSafe};
pub use pipeline::Pipeline;

pub(crate) type HashState = fxhash::FxBuildHasher;
pub(crate) type MapType<K, V> = std::collections::HashMap<K, V, HashState>;
pub(crate) fn new_map<K, V>() -> MapType<K, V> {
    MapType::with_hasher(HashState::default())
}

/// Initializes the global thread pool used by this library with the given parameters.
///
/// Initialization of the global thread pool happens exactly once.
/// Therefore, if you call `initialize_thread_pool` a second time, it will return an error.
/// An `Ok` result indicates that this is the first initialization of the thread pool.
pub fn initialize_thread_pool(num_threads: usize) -> Result<(), anyhow::Error> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()?;
    Ok(())
}
