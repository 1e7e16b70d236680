//! DeviceWorkerGroup (§4.9): one worker pool per physical GPU. Each worker builds the bucket's
//! splat tree, runs MLS + Marching Cubes (via [`DeviceKernels`]) and forwards the resulting mesh
//! block to the [`MesherGroup`], then credits the splats back to `unallocated_` so the copy stage
//! can pick this device again.

use crate::circular_buffer::{Allocation, CircularBuffer};
use crate::io::DeviceKernels;
use crate::numeric_types::Real;
use crate::pipeline::gate::DispatchGate;
use crate::pipeline::mesher::MesherGroup;
use crate::splat::{ChunkId, Splat};
use crate::stats;
use crate::worker::WorkerGroup;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// One bucket's worth of work inside a batched [`DeviceJob`]: which chunk it produces, its slice
/// of the batch's combined splat buffer, and the progress-accounting count the copy stage already
/// computed for it.
#[derive(Copy, Clone, Debug)]
pub struct SubItem {
    pub chunk_id: ChunkId,
    pub offset: usize,
    pub count: usize,
    pub progress_splats: u64,
}

/// One batch of buckets handed from the copy stage to a device (§4.8 "flush"): a single pinned
/// allocation and copy event cover every [`SubItem`] in `items`, each slicing its own range out of
/// the shared `splats` buffer.
pub struct DeviceJob<R: Real> {
    pub items: Vec<SubItem>,
    pub splats: Vec<Splat<R>>,
    pub alloc: Allocation,
}

struct DeviceShared {
    unallocated: AtomicI64,
}

/// One physical GPU's worker pool
pub struct DeviceWorkerGroup<R: Real, K: DeviceKernels<R> + 'static, S: crate::io::MeshSink<K::MeshBlock> + 'static> {
    shared: Arc<DeviceShared>,
    workers: WorkerGroup<DeviceJob<R>>,
    _marker: std::marker::PhantomData<(K, S)>,
}

impl<R: Real, K: DeviceKernels<R> + 'static, S: crate::io::MeshSink<K::MeshBlock> + 'static> DeviceWorkerGroup<R, K, S> {
    /// Spawns `num_workers` device worker threads, each able to service up to `capacity_splats`
    /// splats of in-flight work at a time. Finished mesh blocks are forwarded to `mesher`; the
    /// staging bytes the copy stage reserved for this job are returned to `buffer`.
    pub fn new(
        num_workers: usize,
        capacity_splats: u64,
        kernels: Arc<K>,
        mesher: Arc<MesherGroup<K::MeshBlock, S>>,
        buffer: Arc<CircularBuffer>,
        gate: Arc<DispatchGate>,
    ) -> Self {
        let shared = Arc::new(DeviceShared {
            unallocated: AtomicI64::new(capacity_splats as i64),
        });
        let shared_for_worker = Arc::clone(&shared);
        let workers = WorkerGroup::start(num_workers, move |job: DeviceJob<R>| {
            let mut n = 0u64;
            for item in &job.items {
                let slice = &job.splats[item.offset..item.offset + item.count];
                let block = kernels.reconstruct_bucket(slice);
                mesher.submit(item.chunk_id, block);
                stats::global().add("device.progress_splats", item.progress_splats as i64);
                n += item.count as u64;
            }
            buffer.free(job.alloc);
            shared_for_worker.unallocated.fetch_add(n as i64, Ordering::SeqCst);
            gate.notify();
        });
        Self {
            shared,
            workers,
            _marker: std::marker::PhantomData,
        }
    }

    /// Current unallocated splat-capacity budget; may be transiently negative? never -- decremented
    /// only by [`DeviceWorkerGroup::submit`], which the caller must only invoke after observing
    /// [`DeviceWorkerGroup::can_get`].
    pub fn unallocated(&self) -> i64 {
        self.shared.unallocated.load(Ordering::SeqCst)
    }

    /// Non-blocking capacity probe, so the copy stage can poll across devices (§4.9)
    pub fn can_get(&self) -> bool {
        self.unallocated() > 0
    }

    /// Charges `job` against this device's budget and enqueues it
    pub fn submit(&self, job: DeviceJob<R>) {
        let n: i64 = job.items.iter().map(|item| item.count as i64).sum();
        self.shared.unallocated.fetch_sub(n, Ordering::SeqCst);
        self.workers.push(job);
    }

    /// Drains the queue and joins every worker thread
    pub fn stop(self) {
        self.workers.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circular_buffer::CircularBuffer;
    use crate::pipeline::gate::DispatchGate;
    use crate::pipeline::mesher::MesherGroup;
    use nalgebra::Vector3;
    use parking_lot::Mutex;

    struct EchoKernels;
    impl DeviceKernels<f64> for EchoKernels {
        type MeshBlock = usize;
        fn reconstruct_bucket(&self, splats: &[Splat<f64>]) -> usize {
            splats.len()
        }
    }

    struct RecordingSink {
        blocks: Mutex<Vec<usize>>,
    }
    impl crate::io::MeshSink<usize> for RecordingSink {
        fn accept(&self, _chunk_id: ChunkId, block: usize) {
            self.blocks.lock().push(block);
        }
    }

    #[test]
    fn unallocated_is_restored_after_each_job_completes() {
        let buffer = Arc::new(CircularBuffer::new(1024));
        let sink = Arc::new(RecordingSink { blocks: Mutex::new(Vec::new()) });
        let mesher = Arc::new(MesherGroup::new(sink));
        let gate = Arc::new(DispatchGate::new());
        let device = DeviceWorkerGroup::<f64, EchoKernels, RecordingSink>::new(
            2,
            100,
            Arc::new(EchoKernels),
            Arc::clone(&mesher),
            Arc::clone(&buffer),
            gate,
        );

        assert_eq!(device.unallocated(), 100);
        let splats = vec![Splat::new(Vector3::zeros(), Vector3::new(0.0, 0.0, 1.0), 1.0); 10];
        let alloc = buffer.alloc(10);
        device.submit(DeviceJob {
            items: vec![SubItem {
                chunk_id: ChunkId::new(0, [0, 0, 0]),
                offset: 0,
                count: 10,
                progress_splats: 10,
            }],
            splats,
            alloc,
        });
        assert!(device.unallocated() <= 100);

        // give the worker a moment to finish and credit the budget back
        for _ in 0..200 {
            if device.unallocated() == 100 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(device.unallocated(), 100);
        device.stop();
        Arc::try_unwrap(mesher).ok().unwrap().stop();
    }
}
