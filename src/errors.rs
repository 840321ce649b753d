//! Crate-wide error types.
//!
//! Per the subsystem's error model, only *construction-time* failures
//! (layout registration, index-space exhaustion) are represented as
//! `Result`s. Dispatch mismatches and pre-finalization lattice misuse are
//! programmer errors and panic; export-gate rejections are silent no-ops.
//! See `errors::BespokeError` for the former, and `registry`/`lattice`/
//! `export` for the latter two.

use thiserror::Error;

use crate::registry::LayoutIndex;

#[derive(Debug, Error)]
pub enum BespokeError {
    #[error("layout description {description:?} is already registered")]
    DuplicateDescription { description: String },

    #[error("parent layout {parent:?} is not registered")]
    UnknownParent { parent: LayoutIndex },

    #[error("parent {parent:?} is an ancestor of sibling parent {other:?}; edges must form a covering relation")]
    ParentIsAncestorOfParent {
        parent: LayoutIndex,
        other: LayoutIndex,
    },

    #[error("layout index space exhausted (2^15 indices are all reserved)")]
    IndexSpaceExhausted,

    #[error("reserve_indices block size {n} is not a power of two")]
    NotPowerOfTwo { n: u16 },

    #[error(
        "layout has {count} parents including liveable parent {liveable_parent:?}; \
         a non-liveable layout must have exactly one parent when any parent is liveable \
         (ambiguous least-liveable-ancestor)"
    )]
    AmbiguousLiveableAncestor {
        liveable_parent: LayoutIndex,
        count: usize,
    },

    #[error("the root layout (Top) cannot declare parents")]
    RootWithParents,

    #[error("only the root layout may be registered with no parents")]
    NonRootWithNoParents,
}
