//! MesherGroup (§4.10): the single, non-thread-safe mesh assembler. All devices funnel their
//! finished mesh blocks through this one worker, which routes them to the [`crate::io::MeshSink`]
//! keyed by chunk id; the sink itself re-serialises generations that complete out of order.

use crate::io::MeshSink;
use crate::splat::ChunkId;
use crate::stats;
use crate::worker::WorkerGroup;
use std::marker::PhantomData;
use std::sync::Arc;

pub struct MesherGroup<B: Send + 'static, S: MeshSink<B> + 'static> {
    workers: WorkerGroup<(ChunkId, B)>,
    _marker: PhantomData<S>,
}

impl<B: Send + 'static, S: MeshSink<B> + 'static> MesherGroup<B, S> {
    /// Spawns the single mesher worker, routing every block it receives to `sink`
    pub fn new(sink: Arc<S>) -> Self {
        let workers = WorkerGroup::start(1, move |(chunk_id, block): (ChunkId, B)| {
            sink.accept(chunk_id, block);
            stats::global().add("mesher.blocks_accepted", 1);
        });
        Self {
            workers,
            _marker: PhantomData,
        }
    }

    /// Hands one device's mesh block to the mesher for routing; never blocks the caller beyond
    /// the bounded work queue's own capacity
    pub fn submit(&self, chunk_id: ChunkId, block: B) {
        self.workers.push((chunk_id, block));
    }

    /// Drains the queue and joins the mesher thread
    pub fn stop(self) {
        self.workers.stop();
    }
}
