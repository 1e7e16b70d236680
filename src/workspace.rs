//! Workspace for reusing allocated memory across bucket-recursion calls, avoiding one allocation
//! per splat range per level (§4.4: "two passes per level let the algorithm size per-cell range
//! arrays exactly" — the arrays themselves are pooled here).

use crate::numeric_types::{Index, Real};
use crate::range::Range;
use std::cell::RefCell;
use std::fmt;
use std::fmt::Debug;
use std::marker::PhantomData;
use thread_local::ThreadLocal;

/// Collection of thread local workspaces used to reduce allocations across repeated bucket
/// recursion calls on the same thread pool.
pub struct BucketingWorkspace<I: Index, R: Real> {
    local_workspaces: ThreadLocal<RefCell<LocalBucketingWorkspace>>,
    _marker: PhantomData<(I, R)>,
}

impl<I: Index, R: Real> Default for BucketingWorkspace<I, R> {
    fn default() -> Self {
        Self {
            local_workspaces: ThreadLocal::default(),
            _marker: PhantomData,
        }
    }
}

impl<I: Index, R: Real> BucketingWorkspace<I, R> {
    /// Returns a reference to this thread's local workspace, creating it on first access
    pub(crate) fn get_local(&self) -> &RefCell<LocalBucketingWorkspace> {
        self.local_workspaces.get_or_default()
    }
}

impl<I: Index, R: Real> Clone for BucketingWorkspace<I, R> {
    /// Returns a new, empty workspace: thread-local buffers are never shared across clones
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl<I: Index, R: Real> Debug for BucketingWorkspace<I, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketingWorkspace").finish()
    }
}

/// Reusable scratch buffers for one thread's share of a bucket-recursion histogram/partition pass.
#[derive(Default)]
pub(crate) struct LocalBucketingWorkspace {
    /// Flat output-range buffer reused across recursion levels
    pub range_buffer: Vec<Range>,
    /// Per-cell splat counts reused across histogram passes
    pub counts: Vec<u64>,
}

impl LocalBucketingWorkspace {
    /// Clears the buffers but keeps their allocated capacity
    pub(crate) fn clear(&mut self) {
        self.range_buffer.clear();
        self.counts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_workspace_reused_across_clear_calls() {
        let mut ws = LocalBucketingWorkspace::default();
        ws.range_buffer.push(Range::new(0, 0, 1));
        let cap_before = ws.range_buffer.capacity();
        ws.clear();
        assert_eq!(ws.range_buffer.len(), 0);
        assert_eq!(ws.range_buffer.capacity(), cap_before);
    }

    #[test]
    fn clone_of_bucketing_workspace_is_independent() {
        let ws: BucketingWorkspace<i64, f64> = BucketingWorkspace::default();
        ws.get_local().borrow_mut().range_buffer.push(Range::new(0, 0, 1));
        let cloned = ws.clone();
        assert!(cloned.get_local().borrow().range_buffer.is_empty());
    }
}
