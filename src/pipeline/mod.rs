//! The worker-pool pipeline (§4.7-4.10): Reader → BucketLoader → Copy → DeviceWorkerGroup(×N) →
//! Mesher, connected by bounded queues under strict memory budgets. The reader and bucket-loader
//! stages run synchronously on the driving thread (their inputs — an exclusive splat stream, a
//! recursive bucket traversal — are inherently sequential per file); the copy, device and mesher
//! stages each own their own OS thread pool and communicate through the types in this module.

pub mod bucket_loader;
pub mod copy;
pub mod device;
pub mod gate;
pub mod mesher;
pub mod reader;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::grid::UniformGrid;
use crate::io::{DeviceKernels, MeshSink, SplatStream};
use crate::numeric_types::{Index, Real};
use copy::CopyGroup;
use device::DeviceWorkerGroup;
use gate::DispatchGate;
use mesher::MesherGroup;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

/// Assembles the full worker pipeline for one reconstruction run.
///
/// `K` is the device-kernel façade (splat-tree build + MLS + Marching Cubes) and `S` is the mesh
/// sink; both are injected so the core never depends on a concrete OpenCL or mesh-writer
/// implementation (see [`crate::io`]).
pub struct Pipeline<I: Index, R: Real, K: DeviceKernels<R> + 'static, S: MeshSink<K::MeshBlock> + 'static> {
    config: PipelineConfig<I, R>,
    copy: CopyGroup<R, K, S>,
    mesher: Arc<MesherGroup<K::MeshBlock, S>>,
}

impl<I: Index, R: Real, K: DeviceKernels<R> + 'static, S: MeshSink<K::MeshBlock> + 'static> Pipeline<I, R, K, S> {
    /// Builds a pipeline with one [`DeviceWorkerGroup`] per logical device in `config`, all
    /// sharing the same kernel façade and mesh sink.
    pub fn new(config: PipelineConfig<I, R>, kernels: Arc<K>, sink: Arc<S>) -> Self {
        let mesher = Arc::new(MesherGroup::new(sink));
        let gate = Arc::new(DispatchGate::new());
        let splat_size = std::mem::size_of::<crate::splat::Splat<R>>();
        let shared_buffer = Arc::new(crate::circular_buffer::CircularBuffer::new(
            config.pinned_buffer_splats as usize * splat_size,
        ));
        let devices: Vec<_> = (0..config.num_devices)
            .map(|_| {
                Arc::new(DeviceWorkerGroup::new(
                    config.device_workers_per_device,
                    config.max_device_item_splats,
                    Arc::clone(&kernels),
                    Arc::clone(&mesher),
                    Arc::clone(&shared_buffer),
                    Arc::clone(&gate),
                ))
            })
            .collect();
        let copy = CopyGroup::new(shared_buffer, devices, gate, config.max_device_item_splats);
        Self { config, copy, mesher }
    }

    /// Runs the pipeline to completion over one splat stream: reads it chunk by chunk, bucketing
    /// and dispatching each chunk as it arrives rather than waiting for the whole stream (the
    /// reader never holds more than one buffer's worth of splats at a time — see
    /// [`reader::for_each_chunk`]). Blocks until every bucket has been dispatched; device work may
    /// still be draining when this returns (callers needing full drain should keep the `Pipeline`
    /// alive until its `MeshSink` has observed every expected chunk).
    pub fn run(self, stream: &mut dyn SplatStream<R>, grid: &UniformGrid<I, R>) -> Result<(), PipelineError> {
        let generation = AtomicU32::new(0);
        reader::for_each_chunk(stream, |chunk_splats, chunk_ids| {
            bucket_loader::run(chunk_splats, chunk_ids, grid, &self.config.bucketing, &self.copy, &generation)
        })?;
        self.copy.stop();
        match Arc::try_unwrap(self.mesher) {
            Ok(mesher) => mesher.stop(),
            Err(_) => {
                // A device thread has not yet released its mesher handle; this should not happen
                // once `copy.stop()` has joined every device worker, but fall back to a no-op
                // rather than panicking during shutdown.
                log::warn!("mesher group still referenced after device shutdown, not joined");
            }
        }
        Ok(())
    }
}
