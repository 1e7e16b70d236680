//! Generic top-down octree traversal, shared by the virtual grid traversal ([`crate::grid`])
//! and the bucket-recursion histogram/pick passes ([`crate::octree`]).
//!
//! Concrete node types (e.g. [`crate::grid::Node`]) implement [`OctreeNode`] once; every
//! algorithm that needs a deterministic top-down, Morton-ordered octree walk reuses the single
//! [`visit_top_down`] driver instead of re-implementing recursion.

/// A node of an 8-ary tree that can be visited top-down and pruned against some bounds.
pub trait OctreeNode: Copy {
    /// External bounds the traversal is pruned against (e.g. the microblock extents of a grid)
    type Bounds;

    /// Returns `true` iff this node's cell lies entirely outside `bounds` and should be skipped
    /// without invoking the visitor.
    fn is_entirely_outside(&self, bounds: &Self::Bounds) -> bool;

    /// Returns `true` iff this node has no children to recurse into (a leaf of the virtual tree)
    fn is_leaf(&self) -> bool;

    /// Returns child `idx` (`idx` in `[0, 8)`), in Morton order
    fn child(&self, idx: u32) -> Self;
}

/// Recursively visits `root` and its descendants top-down. A node entirely outside `bounds` is
/// pruned (the visitor is never called for it or its subtree). Otherwise the visitor `f` is
/// called with the node; if it returns `true` and the node is not a leaf, all 8 children are
/// visited next, in ascending Morton order.
pub fn visit_top_down<N, F>(root: N, bounds: &N::Bounds, f: &mut F)
where
    N: OctreeNode,
    F: FnMut(N) -> bool,
{
    if root.is_entirely_outside(bounds) {
        return;
    }
    if !f(root) {
        return;
    }
    if root.is_leaf() {
        return;
    }
    for idx in 0..8u32 {
        visit_top_down(root.child(idx), bounds, f);
    }
}
