//! CopyGroup (§4.8): accumulates emitted buckets into a pending batch, staging them into a pinned
//! host buffer and dispatching the whole batch to whichever device currently has the most free
//! splat capacity once it would overflow `batch_splats` (or on an explicit [`CopyGroup::flush`]).

use crate::circular_buffer::CircularBuffer;
use crate::io::DeviceKernels;
use crate::numeric_types::Real;
use crate::pipeline::device::{DeviceJob, DeviceWorkerGroup, SubItem};
use crate::pipeline::gate::DispatchGate;
use crate::splat::{ChunkId, Splat};
use crate::stats;
use parking_lot::Mutex;
use std::sync::Arc;

struct PendingBatch<R: Real> {
    items: Vec<SubItem>,
    splats: Vec<Splat<R>>,
}

impl<R: Real> Default for PendingBatch<R> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            splats: Vec::new(),
        }
    }
}

pub struct CopyGroup<R: Real, K: DeviceKernels<R> + 'static, S: crate::io::MeshSink<K::MeshBlock> + 'static> {
    buffer: Arc<CircularBuffer>,
    devices: Vec<Arc<DeviceWorkerGroup<R, K, S>>>,
    gate: Arc<DispatchGate>,
    splat_size: usize,
    batch_splats: u64,
    pending: Mutex<PendingBatch<R>>,
}

impl<R: Real, K: DeviceKernels<R> + 'static, S: crate::io::MeshSink<K::MeshBlock> + 'static> CopyGroup<R, K, S> {
    /// `buffer` must be the same instance passed to every device in `devices`, since allocations
    /// made here are freed back by whichever device worker finishes the job. `batch_splats` bounds
    /// how many splats accumulate in one pending batch before it is flushed as a single
    /// [`DeviceJob`].
    pub fn new(
        buffer: Arc<CircularBuffer>,
        devices: Vec<Arc<DeviceWorkerGroup<R, K, S>>>,
        gate: Arc<DispatchGate>,
        batch_splats: u64,
    ) -> Self {
        let splat_size = std::mem::size_of::<Splat<R>>();
        Self {
            buffer,
            devices,
            gate,
            splat_size,
            batch_splats: batch_splats.max(1),
            pending: Mutex::new(PendingBatch::default()),
        }
    }

    /// The pinned staging buffer backing this copy stage, also shared with every device worker
    /// group so jobs can be freed back into it on completion
    pub fn buffer(&self) -> &Arc<CircularBuffer> {
        &self.buffer
    }

    /// Appends one bucket's splats to the pending batch (§4.8 operator steps 2-3), flushing first
    /// if they would overflow `batch_splats`, and flushing again immediately if the addition fills
    /// it exactly.
    pub fn dispatch(&self, chunk_id: ChunkId, splats: Vec<Splat<R>>, progress_splats: u64) {
        let n = splats.len();
        stats::global().add("copy.splats_staged", n as i64);

        let mut pending = self.pending.lock();
        if !pending.items.is_empty() && pending.splats.len() + n > self.batch_splats as usize {
            self.flush_locked(&mut pending);
        }
        let offset = pending.splats.len();
        pending.splats.extend(splats);
        pending.items.push(SubItem {
            chunk_id,
            offset,
            count: n,
            progress_splats,
        });
        if pending.splats.len() >= self.batch_splats as usize {
            self.flush_locked(&mut pending);
        }
    }

    /// Flushes any currently pending buckets as one batched [`DeviceJob`] (§4.8 "Flush"), picking
    /// whichever device currently has the most free capacity.
    pub fn flush(&self) {
        let mut pending = self.pending.lock();
        self.flush_locked(&mut pending);
    }

    fn flush_locked(&self, pending: &mut PendingBatch<R>) {
        if pending.items.is_empty() {
            return;
        }
        let items = std::mem::take(&mut pending.items);
        let splats = std::mem::take(&mut pending.splats);
        let alloc = self.buffer.alloc(splats.len() * self.splat_size);

        let device = self.gate.wait_and_retry(|| {
            self.devices
                .iter()
                .filter(|d| d.can_get())
                .max_by_key(|d| d.unallocated())
                .cloned()
        });

        device.submit(DeviceJob { items, splats, alloc });
    }

    /// Flushes any remaining pending batch, then stops every device worker group in turn (the
    /// copy stage itself has no worker threads of its own: `dispatch` runs on the bucket-loader's
    /// calling thread).
    pub fn stop(self) {
        self.flush();
        for device in self.devices {
            match Arc::try_unwrap(device) {
                Ok(device) => device.stop(),
                Err(_) => panic!("device worker group still has outstanding references at shutdown"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
        blocks: Mutex<Vec<(ChunkId, usize)>>,
    }
    impl crate::io::MeshSink<usize> for RecordingSink {
        fn accept(&self, chunk_id: ChunkId, block: usize) {
            self.blocks.lock().push((chunk_id, block));
        }
    }

    #[test]
    fn dispatch_prefers_the_device_with_more_free_capacity() {
        let sink = Arc::new(RecordingSink { blocks: Mutex::new(Vec::new()) });
        let mesher = Arc::new(MesherGroup::new(Arc::clone(&sink)));
        let gate = Arc::new(DispatchGate::new());
        let splat_size = std::mem::size_of::<Splat<f64>>();
        let buffer = Arc::new(CircularBuffer::new(1024 * splat_size));
        let small = Arc::new(DeviceWorkerGroup::<f64, EchoKernels, RecordingSink>::new(
            1,
            5,
            Arc::new(EchoKernels),
            Arc::clone(&mesher),
            Arc::clone(&buffer),
            Arc::clone(&gate),
        ));
        let large = Arc::new(DeviceWorkerGroup::<f64, EchoKernels, RecordingSink>::new(
            1,
            500,
            Arc::new(EchoKernels),
            Arc::clone(&mesher),
            Arc::clone(&buffer),
            Arc::clone(&gate),
        ));

        let copy = CopyGroup::new(buffer, vec![Arc::clone(&small), Arc::clone(&large)], gate, 4);
        let splats = vec![Splat::new(Vector3::zeros(), Vector3::new(0.0, 0.0, 1.0), 1.0); 4];
        copy.dispatch(ChunkId::new(0, [0, 0, 0]), splats, 4);

        // the larger device should have been picked, not the smaller one
        assert_eq!(large.unallocated(), 496);
        assert_eq!(small.unallocated(), 5);
        drop(small);
        drop(large);

        for _ in 0..200 {
            if sink.blocks.lock().len() == 1 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        copy.stop();
        Arc::try_unwrap(mesher).ok().unwrap().stop();
        assert_eq!(sink.blocks.lock().len(), 1);
    }

    #[test]
    fn dispatch_batches_buckets_until_flush() {
        let sink = Arc::new(RecordingSink { blocks: Mutex::new(Vec::new()) });
        let mesher = Arc::new(MesherGroup::new(Arc::clone(&sink)));
        let gate = Arc::new(DispatchGate::new());
        let splat_size = std::mem::size_of::<Splat<f64>>();
        let buffer = Arc::new(CircularBuffer::new(1024 * splat_size));
        let device = Arc::new(DeviceWorkerGroup::<f64, EchoKernels, RecordingSink>::new(
            1,
            1000,
            Arc::new(EchoKernels),
            Arc::clone(&mesher),
            Arc::clone(&buffer),
            Arc::clone(&gate),
        ));
        // batch_splats=10 is well above the two 3-splat dispatches below, so neither should reach
        // the device until an explicit flush.
        let copy = CopyGroup::new(buffer, vec![Arc::clone(&device)], gate, 10);
        let small = || vec![Splat::new(Vector3::zeros(), Vector3::new(0.0, 0.0, 1.0), 1.0); 3];

        copy.dispatch(ChunkId::new(0, [0, 0, 0]), small(), 3);
        copy.dispatch(ChunkId::new(1, [1, 0, 0]), small(), 3);
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(sink.blocks.lock().len(), 0, "buckets below the batch threshold must not dispatch early");

        copy.flush();
        drop(device);

        for _ in 0..200 {
            if sink.blocks.lock().len() == 2 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        copy.stop();
        Arc::try_unwrap(mesher).ok().unwrap().stop();
        assert_eq!(sink.blocks.lock().len(), 2);
    }
}
