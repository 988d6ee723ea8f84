//! The position module holds the [Position] type and the bisection tree algebra over it.

/// A [Position] is a node within the perfect binary tree that the bisection game is played over.
/// Its "Generalized Index" is calculated as `2^{depth} + index_at_depth`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position {
    depth: u32,
    index_at_depth: u64,
}

/// Computes a generalized index from a depth and index at depth.
///
/// ### Takes
/// - `depth`: The depth of the generalized index.
/// - `index_at_depth`: The index at depth of the generalized index.
///
/// ### Returns
/// - `u128`: The generalized index: `2^{depth} + index_at_depth`.
pub fn compute_gindex(depth: u32, index_at_depth: u64) -> u128 {
    (1u128 << depth) | index_at_depth as u128
}

impl Position {
    /// The root [Position] of every game tree.
    pub const ROOT: Position = Position::new(0, 0);

    /// Creates a new [Position] from a depth and an index at that depth.
    pub const fn new(depth: u32, index_at_depth: u64) -> Self {
        Self {
            depth,
            index_at_depth,
        }
    }

    /// Decodes a generalized index into a [Position]. Returns [None] for `0`, which does not
    /// name any node in the tree.
    pub fn from_gindex(gindex: u128) -> Option<Self> {
        if gindex == 0 {
            return None;
        }
        let depth = 127 - gindex.leading_zeros();
        Some(Self::new(depth, (gindex - (1 << depth)) as u64))
    }

    /// Returns the generalized index of the [Position].
    pub fn to_gindex(&self) -> u128 {
        compute_gindex(self.depth, self.index_at_depth)
    }

    /// Returns the depth of the [Position] within the tree.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Returns the index at depth of the [Position] within the tree.
    pub fn index_at_depth(&self) -> u64 {
        self.index_at_depth
    }

    pub fn is_root(&self) -> bool {
        self.depth == 0
    }

    /// Returns the left child [Position] relative to the current [Position].
    pub fn left(&self) -> Self {
        Self::new(self.depth + 1, self.index_at_depth << 1)
    }

    /// Returns the right child [Position] relative to the current [Position].
    pub fn right(&self) -> Self {
        Self::new(self.depth + 1, (self.index_at_depth << 1) | 1)
    }

    /// Returns the parent [Position] relative to the current [Position]. The root is its own
    /// parent.
    pub fn parent(&self) -> Self {
        if self.is_root() {
            return *self;
        }
        Self::new(self.depth - 1, self.index_at_depth >> 1)
    }

    /// Returns the rightmost [Position] at `max_depth` that commits to the same trace index as the
    /// current [Position].
    pub fn right_index(&self, max_depth: u32) -> Self {
        let remaining = max_depth - self.depth;
        let index = ((self.index_at_depth as u128) << remaining) | ((1u128 << remaining) - 1);
        Self::new(max_depth, index as u64)
    }

    /// Returns the trace index that the current [Position] commits to.
    pub fn trace_index(&self, max_depth: u32) -> u64 {
        self.right_index(max_depth).index_at_depth
    }

    /// The attack move against the current [Position]: its left child.
    pub fn attack(&self) -> Self {
        self.left()
    }

    /// The defense move of the current [Position]: up to the parent, over to the parent's right
    /// child and down to that node's left child.
    pub fn defend(&self) -> Self {
        Self::new(self.depth + 1, (self.index_at_depth | 1) << 1)
    }

    /// Returns the relative [Position] for an attack or defense move against the current
    /// [Position].
    pub fn make_move(&self, is_attack: bool) -> Self {
        if is_attack {
            self.attack()
        } else {
            self.defend()
        }
    }
}
