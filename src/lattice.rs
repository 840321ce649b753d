//! C2 — Layout Lattice.
//!
//! The ordering, join, and meet operations over a finalized `Registry`.
//! These are plain graph algorithms over the frozen layout table (BFS
//! through `parents`/`children`), kept in their own module the way the
//! teacher splits object-shape logic (`axm/src/inline_cache.rs`'s `Shape`)
//! from the bytecode that consumes it.
//!
//! Before finalization, every query here except `least_liveable_ancestor`
//! panics unless both operands are Top — per spec.md §4.2, a query on a
//! half-built lattice is a programmer error, not a recoverable condition.

use std::collections::{HashSet, VecDeque};

use crate::registry::{LayoutIndex, Registry};

impl Registry {
    fn assert_query_allowed(&self, a: LayoutIndex, b: LayoutIndex) {
        if !self.is_finalized() {
            assert!(
                a == self.top_index() && b == self.top_index(),
                "lattice query on non-Top layout before Registry::finalize()"
            );
        }
    }

    fn ancestors_of(&self, start: LayoutIndex) -> HashSet<LayoutIndex> {
        let frozen = self.frozen_snapshot();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(start);
        visited.insert(start);
        while let Some(idx) = queue.pop_front() {
            if let Some(Some(layout)) = frozen.get(idx.0 as usize) {
                for &p in &layout.parents {
                    if visited.insert(p) {
                        queue.push_back(p);
                    }
                }
            }
        }
        visited
    }

    fn descendants_of(&self, start: LayoutIndex) -> HashSet<LayoutIndex> {
        let frozen = self.frozen_snapshot();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(start);
        visited.insert(start);
        while let Some(idx) = queue.pop_front() {
            if let Some(Some(layout)) = frozen.get(idx.0 as usize) {
                for &c in &layout.children {
                    if visited.insert(c) {
                        queue.push_back(c);
                    }
                }
            }
        }
        visited
    }

    /// `a ≤ b`: every array with layout `a` is also a valid array of
    /// layout `b` (`b` is an ancestor of `a`, or `a == b`).
    pub fn leq(&self, a: LayoutIndex, b: LayoutIndex) -> bool {
        self.assert_query_allowed(a, b);
        if !self.is_finalized() {
            return true; // only reachable when a == b == Top.
        }
        self.ancestors_of(a).contains(&b)
    }

    /// Least upper bound. Guaranteed unique by registration invariant I3
    /// (no parent is an ancestor of a sibling parent); in debug builds this
    /// is cross-checked and the process aborts if it ever finds two
    /// distinct minima, since that would mean I3 was violated at
    /// registration time without being caught.
    pub fn join(&self, a: LayoutIndex, b: LayoutIndex) -> LayoutIndex {
        self.assert_query_allowed(a, b);
        if !self.is_finalized() {
            return self.top_index();
        }
        let common: Vec<LayoutIndex> = {
            let ancestors_a = self.ancestors_of(a);
            let ancestors_b = self.ancestors_of(b);
            ancestors_a.intersection(&ancestors_b).copied().collect()
        };
        let mut minima = common
            .iter()
            .copied()
            .filter(|&c| common.iter().all(|&other| self.ancestors_of(c).contains(&other)));

        let result = minima
            .next()
            .expect("join: Top is a common ancestor of every layout, intersection cannot be empty");

        #[cfg(debug_assertions)]
        {
            assert!(
                minima.next().is_none(),
                "join({a}, {b}) has more than one minimum common ancestor; I3 was violated at registration"
            );
        }

        result
    }

    /// Greatest lower bound, if one exists. `None` means the two layouts
    /// share no common descendant (no array can simultaneously satisfy
    /// both), which is a legitimate outcome, not an error.
    pub fn meet(&self, a: LayoutIndex, b: LayoutIndex) -> Option<LayoutIndex> {
        self.assert_query_allowed(a, b);
        if !self.is_finalized() {
            return Some(self.top_index());
        }
        let common: Vec<LayoutIndex> = {
            let descendants_a = self.descendants_of(a);
            let descendants_b = self.descendants_of(b);
            descendants_a
                .intersection(&descendants_b)
                .copied()
                .collect()
        };
        if common.is_empty() {
            return None;
        }
        let mut maxima = common
            .iter()
            .copied()
            .filter(|&c| common.iter().all(|&other| self.descendants_of(c).contains(&other)));

        let result = maxima.next().expect("meet: common is non-empty");

        #[cfg(debug_assertions)]
        {
            assert!(
                maxima.next().is_none(),
                "meet({a}, {b}) has more than one maximum common descendant"
            );
        }

        Some(result)
    }

    /// Walks upward from `a` and returns the first liveable node reached
    /// (possibly `a` itself). Unique by registration invariant I4. Before
    /// finalization this always returns Top, per spec.md §4.2 — unlike the
    /// other lattice queries, this one does not panic on a non-Top operand,
    /// since JIT guards are allowed to conservatively treat everything as
    /// Top-shaped until the lattice is built.
    pub fn least_liveable_ancestor(&self, a: LayoutIndex) -> LayoutIndex {
        if !self.is_finalized() {
            return self.top_index();
        }
        let frozen = self.frozen_snapshot();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(a);
        visited.insert(a);
        while let Some(idx) = queue.pop_front() {
            let layout = frozen[idx.0 as usize]
                .as_ref()
                .unwrap_or_else(|| panic!("least_liveable_ancestor: dangling layout index {idx}"));
            if layout.liveable {
                return idx;
            }
            for &p in &layout.parents {
                if visited.insert(p) {
                    queue.push_back(p);
                }
            }
        }
        unreachable!("Top is liveable and reachable from every layout; I4 guarantees termination")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::LayoutSpec;

    fn diamond() -> (Registry, LayoutIndex, LayoutIndex, LayoutIndex, LayoutIndex) {
        let registry = Registry::new();
        let top = registry.top_index();
        let a = registry
            .register(LayoutSpec::abstract_layout("A", vec![top]).liveable())
            .unwrap();
        let b = registry
            .register(LayoutSpec::abstract_layout("B", vec![top]).liveable())
            .unwrap();
        let c = registry
            .register(LayoutSpec::abstract_layout("C", vec![a]))
            .unwrap();
        registry.finalize();
        (registry, top, a, b, c)
    }

    #[test]
    fn leq_is_reflexive_and_respects_parent_edges() {
        let (registry, top, a, _b, c) = diamond();
        assert!(registry.leq(a, a));
        assert!(registry.leq(c, a));
        assert!(registry.leq(c, top));
        assert!(!registry.leq(top, c));
    }

    #[test]
    fn leq_is_transitive() {
        let (registry, top, _a, _b, c) = diamond();
        assert!(registry.leq(c, top));
    }

    #[test]
    fn join_of_siblings_is_top() {
        let (registry, top, a, b, _c) = diamond();
        assert_eq!(registry.join(a, b), top);
    }

    #[test]
    fn join_of_a_node_with_itself_is_itself() {
        let (registry, _top, a, _b, _c) = diamond();
        assert_eq!(registry.join(a, a), a);
    }

    #[test]
    fn meet_of_unrelated_siblings_is_none() {
        let (registry, _top, a, b, _c) = diamond();
        assert_eq!(registry.meet(a, b), None);
    }

    #[test]
    fn meet_of_parent_and_child_is_child() {
        let (registry, _top, a, _b, c) = diamond();
        assert_eq!(registry.meet(a, c), Some(c));
    }

    #[test]
    fn least_liveable_ancestor_of_nonliveable_node_is_its_liveable_parent() {
        let (registry, _top, a, _b, c) = diamond();
        assert_eq!(registry.least_liveable_ancestor(c), a);
    }

    #[test]
    fn least_liveable_ancestor_of_liveable_node_is_itself() {
        let (registry, _top, a, _b, _c) = diamond();
        assert_eq!(registry.least_liveable_ancestor(a), a);
    }

    #[test]
    fn least_liveable_ancestor_before_finalization_is_top() {
        let registry = Registry::new();
        let top = registry.top_index();
        let a = registry
            .register(LayoutSpec::abstract_layout("A", vec![top]))
            .unwrap();
        assert_eq!(registry.least_liveable_ancestor(a), top);
    }

    #[test]
    #[should_panic(expected = "lattice query on non-Top layout")]
    fn leq_before_finalization_panics_on_non_top() {
        let registry = Registry::new();
        let top = registry.top_index();
        let a = registry
            .register(LayoutSpec::abstract_layout("A", vec![top]))
            .unwrap();
        registry.leq(a, top);
    }
}
