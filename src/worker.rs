//! Generic worker-pool framework (§4.7) shared by every pipeline stage.
//!
//! A `WorkerGroup` owns a reusable item pool (pre-allocated work items, "charged" against a size
//! budget while checked out) and a bounded FIFO work queue. Workers pop from the queue, run the
//! stage's operator on the item, then return it to the pool. `stop()` pushes one sentinel per
//! worker and joins all threads.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

/// A reusable work item plus the size it was checked out against, returned to the pool on completion.
struct Slot<T> {
    item: T,
    size: u64,
}

struct PoolState<T> {
    free: Vec<Slot<T>>,
    /// Running total of every free slot's `size`, the pool's available "capacity"
    available: u64,
}

/// A bounded pool of reusable work items, each able to hold up to some size budget.
pub struct ItemPool<T> {
    state: Mutex<PoolState<T>>,
    not_empty: Condvar,
}

impl<T> ItemPool<T> {
    /// Creates a pool pre-populated with `items`, each implicitly sized `item_size`
    pub fn new(items: Vec<T>, item_size: u64) -> Self {
        let free = items.into_iter().map(|item| Slot { item, size: item_size }).collect::<Vec<_>>();
        let available = free.len() as u64 * item_size;
        Self {
            state: Mutex::new(PoolState { free, available }),
            not_empty: Condvar::new(),
        }
    }

    /// Blocks until an item is available whose slot size covers `size`, then checks it out
    pub fn get(&self, size: u64) -> T {
        let mut guard = self.state.lock();
        loop {
            if let Some(idx) = guard.free.iter().position(|slot| slot.size >= size) {
                let slot = guard.free.remove(idx);
                guard.available -= slot.size;
                return slot.item;
            }
            self.not_empty.wait(&mut guard);
        }
    }

    /// Non-blocking: `true` iff at least one item is currently free
    pub fn can_get(&self) -> bool {
        !self.state.lock().free.is_empty()
    }

    /// Returns `item` to the pool (with the given slot size) and wakes one waiter
    pub fn free_item(&self, item: T, size: u64) {
        let mut guard = self.state.lock();
        guard.available += size;
        guard.free.push(Slot { item, size });
        drop(guard);
        self.not_empty.notify_one();
    }

    /// Total size budget currently sitting unallocated in the pool
    pub fn available(&self) -> u64 {
        self.state.lock().available
    }
}

enum Message<T> {
    Work(T),
    Stop,
}

struct QueueState<T> {
    queue: VecDeque<Message<T>>,
}

/// A bounded FIFO queue of work items, shared between a stage's producer(s) and its workers.
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(QueueState { queue: VecDeque::new() }),
            not_empty: Condvar::new(),
        }
    }
}

impl<T> WorkQueue<T> {
    /// Enqueues one item of work, waking one consumer
    pub fn push(&self, item: T) {
        let mut guard = self.state.lock();
        guard.queue.push_back(Message::Work(item));
        drop(guard);
        self.not_empty.notify_one();
    }

    fn push_stop(&self) {
        let mut guard = self.state.lock();
        guard.queue.push_back(Message::Stop);
        drop(guard);
        self.not_empty.notify_one();
    }

    /// Blocks until an item or a stop sentinel is available
    fn pop(&self) -> Message<T> {
        let mut guard = self.state.lock();
        loop {
            if let Some(msg) = guard.queue.pop_front() {
                return msg;
            }
            self.not_empty.wait(&mut guard);
        }
    }
}

/// A fixed-size pool of OS threads draining a [`WorkQueue`] with a caller-supplied operator.
///
/// Ordering is FIFO within one group; there is no cross-group ordering guarantee (see §5).
pub struct WorkerGroup<T> {
    queue: Arc<WorkQueue<T>>,
    handles: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> WorkerGroup<T> {
    /// Spawns `num_workers` threads, each looping "pop, run `operator`, repeat" until stopped
    pub fn start<F>(num_workers: usize, operator: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let queue = Arc::new(WorkQueue::default());
        let operator = Arc::new(operator);
        let handles = (0..num_workers)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let operator = Arc::clone(&operator);
                std::thread::spawn(move || {
                    while let Message::Work(item) = queue.pop() {
                        operator(item);
                    }
                })
            })
            .collect();
        Self { queue, handles }
    }

    /// Enqueues one item of work for some worker to pick up
    pub fn push(&self, item: T) {
        self.queue.push(item);
    }

    /// Sends one stop sentinel per worker and joins every thread
    pub fn stop(mut self) {
        for _ in 0..self.handles.len() {
            self.queue.push_stop();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn item_pool_blocks_until_an_item_is_freed() {
        let pool = Arc::new(ItemPool::new(vec![1u32], 10));
        let first = pool.get(10);
        assert_eq!(pool.available(), 0);

        let pool2 = Arc::clone(&pool);
        let handle = std::thread::spawn(move || pool2.get(10));
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(!handle.is_finished());

        pool.free_item(first, 10);
        let second = handle.join().unwrap();
        assert_eq!(second, 1);
    }

    #[test]
    fn can_get_reports_without_blocking() {
        let pool = ItemPool::new(vec![()], 1);
        assert!(pool.can_get());
        #[allow(clippy::let_unit_value)]
        let item = pool.get(1);
        assert!(!pool.can_get());
        pool.free_item(item, 1);
        assert!(pool.can_get());
    }

    #[test]
    fn worker_group_processes_all_pushed_items_then_stops_cleanly() {
        let total = Arc::new(AtomicU64::new(0));
        let total_clone = Arc::clone(&total);
        let group = WorkerGroup::start(4, move |n: u64| {
            total_clone.fetch_add(n, Ordering::SeqCst);
        });
        for i in 1..=100u64 {
            group.push(i);
        }
        group.stop();
        assert_eq!(total.load(Ordering::SeqCst), (1..=100u64).sum::<u64>());
    }
}
