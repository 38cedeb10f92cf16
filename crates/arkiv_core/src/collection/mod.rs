//! Ordered, key-indexed child collections.

mod sorted;

pub use sorted::SortedChildren;
