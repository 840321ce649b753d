//! C4 — JIT Emission Vtable.
//!
//! Distinct from the runtime operation vtable (`vtable::OperationVtable`):
//! this one is consulted by the JIT while *compiling* a trace, not while
//! *running* one, and its methods are virtual/overridable rather than a
//! flat function table — a layout can specialize `emitGet` for its own
//! representation while inheriting everything else. `AbstractEmit` and
//! `ConcreteEmit` below are the two defaults every layout gets unless it
//! supplies its own; real bespoke layouts with a non-default representation
//! would implement `JitEmit` directly instead of composing `ConcreteEmit`.
//!
//! The actual IR builder (`JitBuilder` here) is out of scope; it exists
//! only so emission can be exercised and tested without a host JIT. Each
//! method below takes the IR values spec.md §4.4 lists for that hook
//! (`arr`, `key`, `val`, `taken`, `pos`/`idx`/`elm`) so the emitted trace
//! records exactly what a real IR builder would have been told to consume.

use crate::registry::LayoutIndex;

/// An opaque SSA value produced by emission. Stands in for whatever IR
/// value type a real JIT's builder would return, and also for the `arr`/
/// `key`/`val`/`pos`/`idx`/`elm` operands the spec's emit signatures pass
/// in — this crate has no real IR graph, so every "value" flowing through
/// `JitEmit` is just an `IrValue` handle into `JitBuilder`'s trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrValue(pub u32);

/// The branch target an emitter jumps to when its guard fails (e.g.
/// `emitGet`'s `taken` on a missing key). Opaque for the same reason as
/// `IrValue`: a real JIT builder would hand back a basic-block label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchTarget(pub u32);

/// A minimal recording IR builder: each `emit` call appends a label to
/// `trace` and returns a fresh `IrValue`, so tests can assert on exactly
/// which emission path ran, and with which operands, without needing a
/// real code generator.
#[derive(Debug, Default)]
pub struct JitBuilder {
    next_value: u32,
    pub trace: Vec<String>,
}

impl JitBuilder {
    pub fn new() -> Self {
        JitBuilder::default()
    }

    pub fn emit(&mut self, label: impl Into<String>) -> IrValue {
        let id = self.next_value;
        self.next_value += 1;
        self.trace.push(label.into());
        IrValue(id)
    }
}

/// The outcome of an emission attempt: either a produced IR value, or a
/// punt, meaning the JIT must fall back to calling the runtime operation
/// vtable out-of-line instead of inlining a specialized sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitEmitOutcome {
    Value(IrValue),
    Punt,
}

/// The JIT-emission contract spec.md §4.4 mandates a minimum set for:
/// `emitGet`, `emitElem`, `emitSet`, `emitAppend`, `emitEscalateToVanilla`,
/// and the iterator-side primitives `emitIterFirstPos`, `emitIterLastPos`,
/// `emitIterPos`, `emitIterAdvancePos`, `emitIterElm`, `emitIterGetKey`,
/// `emitIterGetVal`.
pub trait JitEmit: Send + Sync {
    fn emit_get(
        &self,
        b: &mut JitBuilder,
        layout: LayoutIndex,
        arr: IrValue,
        key: IrValue,
        taken: BranchTarget,
    ) -> JitEmitOutcome;

    fn emit_elem(
        &self,
        b: &mut JitBuilder,
        layout: LayoutIndex,
        lval: IrValue,
        key: IrValue,
        throw_on_missing: bool,
    ) -> JitEmitOutcome;

    /// Mutating ops punt by default: specializing them requires reasoning
    /// about copy-on-write and layout transitions that only the concrete
    /// layout's author can get right.
    fn emit_set(
        &self,
        _b: &mut JitBuilder,
        _layout: LayoutIndex,
        _arr: IrValue,
        _key: IrValue,
        _val: IrValue,
    ) -> JitEmitOutcome {
        JitEmitOutcome::Punt
    }
    fn emit_append(
        &self,
        _b: &mut JitBuilder,
        _layout: LayoutIndex,
        _arr: IrValue,
        _val: IrValue,
    ) -> JitEmitOutcome {
        JitEmitOutcome::Punt
    }

    fn emit_iter_first_pos(&self, b: &mut JitBuilder, layout: LayoutIndex, arr: IrValue) -> JitEmitOutcome;
    fn emit_iter_last_pos(&self, b: &mut JitBuilder, layout: LayoutIndex, arr: IrValue) -> JitEmitOutcome;
    fn emit_iter_pos(
        &self,
        b: &mut JitBuilder,
        layout: LayoutIndex,
        arr: IrValue,
        idx: IrValue,
    ) -> JitEmitOutcome;
    fn emit_iter_advance_pos(
        &self,
        b: &mut JitBuilder,
        layout: LayoutIndex,
        arr: IrValue,
        pos: IrValue,
    ) -> JitEmitOutcome;
    fn emit_iter_elm(
        &self,
        b: &mut JitBuilder,
        layout: LayoutIndex,
        arr: IrValue,
        pos: IrValue,
    ) -> JitEmitOutcome;
    fn emit_iter_get_key(
        &self,
        b: &mut JitBuilder,
        layout: LayoutIndex,
        arr: IrValue,
        elm: IrValue,
    ) -> JitEmitOutcome;
    fn emit_iter_get_val(
        &self,
        b: &mut JitBuilder,
        layout: LayoutIndex,
        arr: IrValue,
        elm: IrValue,
    ) -> JitEmitOutcome;

    fn emit_escalate_to_vanilla(
        &self,
        b: &mut JitBuilder,
        layout: LayoutIndex,
        arr: IrValue,
        reason: &str,
    ) -> JitEmitOutcome {
        JitEmitOutcome::Value(b.emit(format!("escalate[{layout}](arr={arr:?}): {reason}")))
    }
}

/// Every abstract (non-concrete) layout gets this: emission always punts,
/// since there is no representation to specialize against.
pub struct AbstractEmit;

impl JitEmit for AbstractEmit {
    fn emit_get(
        &self,
        _b: &mut JitBuilder,
        _layout: LayoutIndex,
        _arr: IrValue,
        _key: IrValue,
        _taken: BranchTarget,
    ) -> JitEmitOutcome {
        JitEmitOutcome::Punt
    }
    fn emit_elem(
        &self,
        _b: &mut JitBuilder,
        _layout: LayoutIndex,
        _lval: IrValue,
        _key: IrValue,
        _throw_on_missing: bool,
    ) -> JitEmitOutcome {
        JitEmitOutcome::Punt
    }
    fn emit_iter_first_pos(&self, _b: &mut JitBuilder, _layout: LayoutIndex, _arr: IrValue) -> JitEmitOutcome {
        JitEmitOutcome::Punt
    }
    fn emit_iter_last_pos(&self, _b: &mut JitBuilder, _layout: LayoutIndex, _arr: IrValue) -> JitEmitOutcome {
        JitEmitOutcome::Punt
    }
    fn emit_iter_pos(
        &self,
        _b: &mut JitBuilder,
        _layout: LayoutIndex,
        _arr: IrValue,
        _idx: IrValue,
    ) -> JitEmitOutcome {
        JitEmitOutcome::Punt
    }
    fn emit_iter_advance_pos(
        &self,
        _b: &mut JitBuilder,
        _layout: LayoutIndex,
        _arr: IrValue,
        _pos: IrValue,
    ) -> JitEmitOutcome {
        JitEmitOutcome::Punt
    }
    fn emit_iter_elm(
        &self,
        _b: &mut JitBuilder,
        _layout: LayoutIndex,
        _arr: IrValue,
        _pos: IrValue,
    ) -> JitEmitOutcome {
        JitEmitOutcome::Punt
    }
    fn emit_iter_get_key(
        &self,
        _b: &mut JitBuilder,
        _layout: LayoutIndex,
        _arr: IrValue,
        _elm: IrValue,
    ) -> JitEmitOutcome {
        JitEmitOutcome::Punt
    }
    fn emit_iter_get_val(
        &self,
        _b: &mut JitBuilder,
        _layout: LayoutIndex,
        _arr: IrValue,
        _elm: IrValue,
    ) -> JitEmitOutcome {
        JitEmitOutcome::Punt
    }
}

/// The default a concrete layout gets if it doesn't supply its own
/// `JitEmit`: read-path ops (`get`, `elem`, the iterator family) emit a
/// direct, non-virtual call through the operation vtable, since the
/// layout is statically known at the call site; `emit_set`/`emit_append`
/// inherit the trait's punting default.
pub struct ConcreteEmit {
    layout_index: LayoutIndex,
}

impl ConcreteEmit {
    pub fn new(layout_index: LayoutIndex) -> Self {
        ConcreteEmit { layout_index }
    }
}

impl JitEmit for ConcreteEmit {
    fn emit_get(
        &self,
        b: &mut JitBuilder,
        layout: LayoutIndex,
        arr: IrValue,
        key: IrValue,
        taken: BranchTarget,
    ) -> JitEmitOutcome {
        debug_assert_eq!(layout, self.layout_index);
        JitEmitOutcome::Value(b.emit(format!(
            "call vtable::get[{layout}](arr={arr:?}, key={key:?}, taken={taken:?})"
        )))
    }

    fn emit_elem(
        &self,
        b: &mut JitBuilder,
        layout: LayoutIndex,
        lval: IrValue,
        key: IrValue,
        throw_on_missing: bool,
    ) -> JitEmitOutcome {
        debug_assert_eq!(layout, self.layout_index);
        JitEmitOutcome::Value(b.emit(format!(
            "call vtable::elem[{layout}](lval={lval:?}, key={key:?}, throw_on_missing={throw_on_missing})"
        )))
    }

    fn emit_iter_first_pos(&self, b: &mut JitBuilder, layout: LayoutIndex, arr: IrValue) -> JitEmitOutcome {
        JitEmitOutcome::Value(b.emit(format!("call vtable::iter_begin[{layout}](arr={arr:?})")))
    }

    fn emit_iter_last_pos(&self, b: &mut JitBuilder, layout: LayoutIndex, arr: IrValue) -> JitEmitOutcome {
        JitEmitOutcome::Value(b.emit(format!("call vtable::iter_last[{layout}](arr={arr:?})")))
    }

    fn emit_iter_pos(
        &self,
        b: &mut JitBuilder,
        layout: LayoutIndex,
        arr: IrValue,
        idx: IrValue,
    ) -> JitEmitOutcome {
        JitEmitOutcome::Value(b.emit(format!("call vtable::iter_pos[{layout}](arr={arr:?}, idx={idx:?})")))
    }

    fn emit_iter_advance_pos(
        &self,
        b: &mut JitBuilder,
        layout: LayoutIndex,
        arr: IrValue,
        pos: IrValue,
    ) -> JitEmitOutcome {
        JitEmitOutcome::Value(b.emit(format!(
            "call vtable::iter_advance[{layout}](arr={arr:?}, pos={pos:?})"
        )))
    }

    fn emit_iter_elm(
        &self,
        b: &mut JitBuilder,
        layout: LayoutIndex,
        arr: IrValue,
        pos: IrValue,
    ) -> JitEmitOutcome {
        JitEmitOutcome::Value(b.emit(format!("call vtable::iter_elm[{layout}](arr={arr:?}, pos={pos:?})")))
    }

    fn emit_iter_get_key(
        &self,
        b: &mut JitBuilder,
        layout: LayoutIndex,
        arr: IrValue,
        elm: IrValue,
    ) -> JitEmitOutcome {
        JitEmitOutcome::Value(b.emit(format!(
            "call vtable::key_at_pos[{layout}](arr={arr:?}, elm={elm:?})"
        )))
    }

    fn emit_iter_get_val(
        &self,
        b: &mut JitBuilder,
        layout: LayoutIndex,
        arr: IrValue,
        elm: IrValue,
    ) -> JitEmitOutcome {
        JitEmitOutcome::Value(b.emit(format!(
            "call vtable::value_at_pos[{layout}](arr={arr:?}, elm={elm:?})"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abstract_emit_always_punts() {
        let emit = AbstractEmit;
        let mut b = JitBuilder::new();
        let arr = IrValue(0);
        assert_eq!(
            emit.emit_get(&mut b, LayoutIndex::VANILLA, arr, IrValue(1), BranchTarget(0)),
            JitEmitOutcome::Punt
        );
        assert_eq!(
            emit.emit_set(&mut b, LayoutIndex::VANILLA, arr, IrValue(1), IrValue(2)),
            JitEmitOutcome::Punt
        );
    }

    #[test]
    fn concrete_emit_specializes_reads_and_punts_writes() {
        let idx = LayoutIndex::VANILLA;
        let emit = ConcreteEmit::new(idx);
        let mut b = JitBuilder::new();
        let arr = IrValue(0);
        let key = IrValue(1);
        assert!(matches!(
            emit.emit_get(&mut b, idx, arr, key, BranchTarget(0)),
            JitEmitOutcome::Value(_)
        ));
        assert_eq!(
            emit.emit_set(&mut b, idx, arr, key, IrValue(2)),
            JitEmitOutcome::Punt
        );
        assert_eq!(
            emit.emit_append(&mut b, idx, arr, IrValue(2)),
            JitEmitOutcome::Punt
        );
        assert_eq!(b.trace.len(), 1);
    }

    #[test]
    fn concrete_emit_covers_full_iterator_family() {
        let idx = LayoutIndex::VANILLA;
        let emit = ConcreteEmit::new(idx);
        let mut b = JitBuilder::new();
        let arr = IrValue(0);
        assert!(matches!(
            emit.emit_iter_first_pos(&mut b, idx, arr),
            JitEmitOutcome::Value(_)
        ));
        assert!(matches!(
            emit.emit_iter_last_pos(&mut b, idx, arr),
            JitEmitOutcome::Value(_)
        ));
        assert!(matches!(
            emit.emit_iter_pos(&mut b, idx, arr, IrValue(1)),
            JitEmitOutcome::Value(_)
        ));
        assert!(matches!(
            emit.emit_iter_advance_pos(&mut b, idx, arr, IrValue(2)),
            JitEmitOutcome::Value(_)
        ));
        assert!(matches!(
            emit.emit_iter_elm(&mut b, idx, arr, IrValue(2)),
            JitEmitOutcome::Value(_)
        ));
        assert!(matches!(
            emit.emit_iter_get_key(&mut b, idx, arr, IrValue(3)),
            JitEmitOutcome::Value(_)
        ));
        assert!(matches!(
            emit.emit_iter_get_val(&mut b, idx, arr, IrValue(3)),
            JitEmitOutcome::Value(_)
        ));
        assert_eq!(b.trace.len(), 6);
    }
}
