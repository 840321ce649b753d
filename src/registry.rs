//! C1 — Layout Registry.
//!
//! Layouts are registered once, during single-threaded startup, and the
//! registry is then finalized: index allocation and parent-edge validation
//! happen under a lock during registration, and once `finalize()` runs the
//! whole layout table is frozen into a lock-free snapshot (mirrors the
//! split between `axiom`'s mutable `building` phase for a module's globals
//! and the frozen `Arc` handed to callers afterward, see
//! `axiom::module_loader::load_local_module`).

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::errors::BespokeError;
use crate::jit_emit::{AbstractEmit, ConcreteEmit, JitEmit};
use crate::vtable::{BespokeArrayOps, OperationVtable};

/// 15-bit payload, top bit reserved to flag "this array is not vanilla".
/// Vanilla arrays are represented outside the registry entirely and use the
/// sentinel index `0`, which `reserve_indices` never hands out.
pub const INDEX_SPACE: u32 = 1 << 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayoutIndex(pub(crate) u16);

impl LayoutIndex {
    pub const VANILLA: LayoutIndex = LayoutIndex(0);

    pub fn raw(self) -> u16 {
        self.0
    }

    /// The tagged 16-bit field a logged/bespoke `ArrayData` header would
    /// carry: payload in the low 15 bits, bit 15 set.
    pub fn tagged(self) -> u16 {
        self.0 | (1 << 15)
    }
}

impl fmt::Display for LayoutIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// What a caller supplies to register a new layout. `ops.is_some()` ⇒ the
/// layout is concrete; `emit` defaults to the standard abstract/concrete
/// behavior from `jit_emit` when not overridden.
///
/// A concrete layout supplies its operation contract as a bare `ops` trait
/// object rather than a pre-built `OperationVtable`, since the
/// `OperationVtable` needs to carry the `LayoutIndex` it was registered
/// under, and that index isn't known until `Registry::register` allocates
/// it — `register` builds the `OperationVtable` itself once the index
/// exists.
pub struct LayoutSpec {
    pub description: String,
    pub parents: Vec<LayoutIndex>,
    pub liveable: bool,
    pub ops: Option<Box<dyn BespokeArrayOps>>,
    pub emit: Option<Arc<dyn JitEmit>>,
}

impl LayoutSpec {
    pub fn abstract_layout(description: impl Into<String>, parents: Vec<LayoutIndex>) -> Self {
        LayoutSpec {
            description: description.into(),
            parents,
            liveable: false,
            ops: None,
            emit: None,
        }
    }

    pub fn concrete_layout(
        description: impl Into<String>,
        parents: Vec<LayoutIndex>,
        ops: Box<dyn BespokeArrayOps>,
    ) -> Self {
        LayoutSpec {
            description: description.into(),
            parents,
            liveable: false,
            ops: Some(ops),
            emit: None,
        }
    }

    pub fn liveable(mut self) -> Self {
        self.liveable = true;
        self
    }

    pub fn with_emit(mut self, emit: Arc<dyn JitEmit>) -> Self {
        self.emit = Some(emit);
        self
    }
}

/// A node in the layout lattice. Cheap to clone: the heavy fields are
/// behind `Arc`.
#[derive(Clone)]
pub struct Layout {
    pub(crate) index: LayoutIndex,
    pub(crate) description: String,
    pub(crate) parents: Vec<LayoutIndex>,
    pub(crate) children: Vec<LayoutIndex>,
    pub(crate) liveable: bool,
    pub(crate) vtable: Option<Arc<OperationVtable>>,
    pub(crate) emit: Arc<dyn JitEmit>,
}

impl Layout {
    pub fn index(&self) -> LayoutIndex {
        self.index
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parents(&self) -> &[LayoutIndex] {
        &self.parents
    }

    pub fn children(&self) -> &[LayoutIndex] {
        &self.children
    }

    pub fn is_liveable(&self) -> bool {
        self.liveable
    }

    pub fn is_concrete(&self) -> bool {
        self.vtable.is_some()
    }

    pub fn vtable(&self) -> Option<&Arc<OperationVtable>> {
        self.vtable.as_ref()
    }

    pub fn emit(&self) -> &Arc<dyn JitEmit> {
        &self.emit
    }
}

impl fmt::Debug for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layout")
            .field("index", &self.index)
            .field("description", &self.description)
            .field("parents", &self.parents)
            .field("liveable", &self.liveable)
            .field("concrete", &self.is_concrete())
            .finish()
    }
}

struct Building {
    layouts: Vec<Option<Layout>>,
}

/// Owns the layout table. Registration (`register`, `reserve_indices`) is
/// single-threaded-by-convention and protected by a `parking_lot::Mutex`;
/// once `finalize()` runs, reads are lock-free against a frozen snapshot.
pub struct Registry {
    building: Mutex<Building>,
    descriptions: Mutex<HashSet<String>>,
    next_index: AtomicU16,
    finalized_flag: AtomicBool,
    frozen: OnceLock<Vec<Option<Layout>>>,
    top: LayoutIndex,
}

impl Registry {
    /// A fresh registry with its root ("Top") layout pre-registered at
    /// index 1 (index 0 is reserved for the vanilla sentinel). Top is
    /// liveable: it is always a valid least-liveable-ancestor fallback, the
    /// base case `lattice::least_liveable_ancestor` relies on.
    pub fn new() -> Self {
        let registry = Registry {
            building: Mutex::new(Building {
                layouts: vec![None], // index 0: vanilla sentinel, never filled.
            }),
            descriptions: Mutex::new(HashSet::new()),
            next_index: AtomicU16::new(1),
            finalized_flag: AtomicBool::new(false),
            frozen: OnceLock::new(),
            top: LayoutIndex(1),
        };
        registry
            .register(LayoutSpec::abstract_layout("Top", vec![]).liveable())
            .expect("registering Top cannot fail");
        registry
    }

    pub fn top_index(&self) -> LayoutIndex {
        self.top
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized_flag.load(Ordering::SeqCst)
    }

    /// Allocates a block of `n` consecutive indices aligned to `n`, where
    /// `n` must be a power of two. Independent of registering any `Layout`;
    /// callers that just need reserved index space (e.g. a masked-subtree
    /// family of sibling layouts) may call this directly.
    pub fn reserve_indices(&self, n: u16) -> Result<LayoutIndex, BespokeError> {
        if n == 0 || !n.is_power_of_two() {
            return Err(BespokeError::NotPowerOfTwo { n });
        }
        let n32 = n as u32;
        let mut start = 0u32;
        let result = self
            .next_index
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
                let cur32 = cur as u32;
                let aligned = (cur32 + n32 - 1) / n32 * n32;
                let end = aligned + n32;
                if end > INDEX_SPACE {
                    None
                } else {
                    start = aligned;
                    Some(end as u16)
                }
            });
        result
            .map(|_| LayoutIndex(start as u16))
            .map_err(|_| BespokeError::IndexSpaceExhausted)
    }

    /// Validates and inserts a new layout, allocating it a single index via
    /// `reserve_indices(1)`. Enforces registration invariants I1-I4: every
    /// non-root layout has at least one already-registered parent, no
    /// parent is itself an ancestor of a sibling parent (acyclicity and
    /// join uniqueness), and a non-liveable layout with a liveable parent
    /// has that parent as its sole parent (unique least-liveable-ancestor).
    pub fn register(&self, spec: LayoutSpec) -> Result<LayoutIndex, BespokeError> {
        let is_root = spec.parents.is_empty();
        let is_first_registration = self.next_index.load(Ordering::SeqCst) == 1;
        if is_root && !is_first_registration {
            return Err(BespokeError::NonRootWithNoParents);
        }
        if !is_root && is_first_registration {
            return Err(BespokeError::RootWithParents);
        }

        {
            let mut descriptions = self.descriptions.lock();
            if !descriptions.insert(spec.description.clone()) {
                return Err(BespokeError::DuplicateDescription {
                    description: spec.description,
                });
            }
        }

        let mut building = self.building.lock();

        // Resolve and validate parents against the building table.
        let mut parent_layouts = Vec::with_capacity(spec.parents.len());
        for &parent_idx in &spec.parents {
            let parent = building
                .layouts
                .get(parent_idx.0 as usize)
                .and_then(|o| o.as_ref())
                .ok_or(BespokeError::UnknownParent { parent: parent_idx })?;
            parent_layouts.push((parent_idx, parent.liveable));
        }

        // I3: no parent may be an ancestor of another parent (covering
        // relation only; redundant edges would make the join ambiguous).
        for i in 0..spec.parents.len() {
            for j in 0..spec.parents.len() {
                if i == j {
                    continue;
                }
                if ancestor_of(&building.layouts, spec.parents[j], spec.parents[i]) {
                    return Err(BespokeError::ParentIsAncestorOfParent {
                        parent: spec.parents[i],
                        other: spec.parents[j],
                    });
                }
            }
        }

        // I4: unique least-liveable-ancestor.
        if !spec.liveable {
            for &(parent_idx, parent_liveable) in &parent_layouts {
                if parent_liveable && spec.parents.len() != 1 {
                    return Err(BespokeError::AmbiguousLiveableAncestor {
                        liveable_parent: parent_idx,
                        count: spec.parents.len(),
                    });
                }
            }
        }

        drop(parent_layouts);

        let index = {
            // Matches the slot `reserve_indices` will hand back for n=1.
            let reserved = self.reserve_indices_locked(1)?;
            reserved
        };

        let vtable = spec
            .ops
            .map(|ops| Arc::new(OperationVtable::new(index, ops)));

        let emit = spec.emit.unwrap_or_else(|| {
            if vtable.is_some() {
                Arc::new(ConcreteEmit::new(index)) as Arc<dyn JitEmit>
            } else {
                Arc::new(AbstractEmit) as Arc<dyn JitEmit>
            }
        });

        let layout = Layout {
            index,
            description: spec.description,
            parents: spec.parents.clone(),
            children: Vec::new(),
            liveable: spec.liveable,
            vtable,
            emit,
        };

        if building.layouts.len() <= index.0 as usize {
            building.layouts.resize(index.0 as usize + 1, None);
        }
        building.layouts[index.0 as usize] = Some(layout);

        for parent_idx in spec.parents {
            if let Some(Some(parent)) = building.layouts.get_mut(parent_idx.0 as usize) {
                parent.children.push(index);
            }
        }

        Ok(index)
    }

    /// `reserve_indices` re-implemented against the already-locked building
    /// table, used internally by `register` so the two don't race against
    /// each other's view of `next_index` vs. `layouts`.
    fn reserve_indices_locked(&self, n: u16) -> Result<LayoutIndex, BespokeError> {
        self.reserve_indices(n)
    }

    /// Freezes the registry. Idempotent: a second call is a no-op. After
    /// this, `lattice` queries on non-Top layouts become valid.
    pub fn finalize(&self) {
        if self.finalized_flag.swap(true, Ordering::SeqCst) {
            return;
        }
        let snapshot = std::mem::take(&mut self.building.lock().layouts);
        let _ = self.frozen.set(snapshot);
    }

    /// Looks up a layout by index. Valid both before and after
    /// finalization — registration is append-only, so a returned `Layout`
    /// never goes stale.
    pub fn from_index(&self, index: LayoutIndex) -> Option<Layout> {
        if let Some(frozen) = self.frozen.get() {
            frozen.get(index.0 as usize).and_then(|o| o.clone())
        } else {
            self.building
                .lock()
                .layouts
                .get(index.0 as usize)
                .and_then(|o| o.clone())
        }
    }

    /// Like `from_index`, but asserts the layout is concrete. Panics if the
    /// index resolves to an abstract layout — callers only ask for a
    /// concrete view when they already know (by construction) they hold a
    /// leaf layout.
    pub fn from_concrete_index(&self, index: LayoutIndex) -> Option<Layout> {
        let layout = self.from_index(index)?;
        assert!(
            layout.is_concrete(),
            "from_concrete_index: layout {index} ({}) is not concrete",
            layout.description()
        );
        Some(layout)
    }

    pub(crate) fn frozen_snapshot(&self) -> &Vec<Option<Layout>> {
        self.frozen
            .get()
            .expect("lattice queries on non-Top layouts require a finalized registry")
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

/// BFS from `start` upward through `parents`, true if `target` is found
/// (including `start == target`). Used only pre-finalization, while
/// `building` is still the live table and held under its own lock by the
/// caller.
fn ancestor_of(layouts: &[Option<Layout>], start: LayoutIndex, target: LayoutIndex) -> bool {
    let mut visited = HashSet::new();
    let mut queue = std::collections::VecDeque::new();
    queue.push_back(start);
    visited.insert(start);
    while let Some(idx) = queue.pop_front() {
        if idx == target {
            return true;
        }
        if let Some(Some(layout)) = layouts.get(idx.0 as usize) {
            for &p in &layout.parents {
                if visited.insert(p) {
                    queue.push_back(p);
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_is_preregistered_and_liveable() {
        let registry = Registry::new();
        let top = registry.from_index(registry.top_index()).unwrap();
        assert_eq!(top.description(), "Top");
        assert!(top.is_liveable());
        assert!(top.parents().is_empty());
    }

    #[test]
    fn duplicate_description_rejected() {
        let registry = Registry::new();
        let top = registry.top_index();
        registry
            .register(LayoutSpec::abstract_layout("A", vec![top]))
            .unwrap();
        let err = registry
            .register(LayoutSpec::abstract_layout("A", vec![top]))
            .unwrap_err();
        assert!(matches!(err, BespokeError::DuplicateDescription { .. }));
    }

    #[test]
    fn unknown_parent_rejected() {
        let registry = Registry::new();
        let bogus = LayoutIndex(9999);
        let err = registry
            .register(LayoutSpec::abstract_layout("A", vec![bogus]))
            .unwrap_err();
        assert!(matches!(err, BespokeError::UnknownParent { .. }));
    }

    #[test]
    fn redundant_ancestor_edge_rejected() {
        let registry = Registry::new();
        let top = registry.top_index();
        let a = registry
            .register(LayoutSpec::abstract_layout("A", vec![top]))
            .unwrap();
        // B's parents are [Top, A], but A is already an ancestor of itself
        // via Top — more to the point, A is a descendant of Top, so listing
        // both as direct parents of B is a redundant (non-covering) edge.
        let err = registry
            .register(LayoutSpec::abstract_layout("B", vec![top, a]))
            .unwrap_err();
        assert!(matches!(err, BespokeError::ParentIsAncestorOfParent { .. }));
    }

    #[test]
    fn ambiguous_least_liveable_ancestor_rejected() {
        let registry = Registry::new();
        let top = registry.top_index();
        let a = registry
            .register(LayoutSpec::abstract_layout("A", vec![top]).liveable())
            .unwrap();
        let b = registry
            .register(LayoutSpec::abstract_layout("B", vec![top]).liveable())
            .unwrap();
        let err = registry
            .register(LayoutSpec::abstract_layout("C", vec![a, b]))
            .unwrap_err();
        assert!(matches!(
            err,
            BespokeError::AmbiguousLiveableAncestor { .. }
        ));
    }

    #[test]
    fn reserve_indices_aligns_blocks() {
        let registry = Registry::new();
        let first = registry.reserve_indices(8).unwrap();
        let second = registry.reserve_indices(8).unwrap();
        assert_eq!(first.raw() % 8, 0);
        assert_eq!(second.raw() % 8, 0);
        assert!(second.raw() >= first.raw() + 8);
    }

    #[test]
    fn reserve_indices_rejects_non_power_of_two() {
        let registry = Registry::new();
        let err = registry.reserve_indices(3).unwrap_err();
        assert!(matches!(err, BespokeError::NotPowerOfTwo { n: 3 }));
    }

    #[test]
    fn from_concrete_index_panics_on_abstract_layout() {
        let registry = Registry::new();
        let top = registry.top_index();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            registry.from_concrete_index(top)
        }));
        assert!(result.is_err());
    }
}
