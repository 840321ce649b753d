//! C3 — Operation Vtable.
//!
//! Every concrete layout carries a fixed table of array operations. In
//! HHVM this is a struct of raw function pointers; in safe Rust the same
//! shape is a trait object (`Arc<dyn BespokeArrayOps>`) — a vtable is
//! exactly what a trait object already is, so `OperationVtable` just pairs
//! one with the `LayoutIndex` it belongs to and adds the debug-mode
//! validator HHVM gets from `As(ArrayData*)`.

use std::fmt;

use crate::array::ArrayHandle;
use crate::keys::{ArrayKey, ArrayValue};
use crate::registry::LayoutIndex;

/// Why an operation could not be served by its concrete layout and had to
/// fall back to the vanilla representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalateReason {
    /// The op is out of scope for the layout (e.g. a logging shim's
    /// `set`/`append` is never overridden, so the default JIT emission
    /// always punts to this at runtime too).
    Unsupported(ArrayOp),
    /// Layout-specific precondition failed (capacity, key shape, ...).
    Custom(&'static str),
}

impl fmt::Display for EscalateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscalateReason::Unsupported(op) => write!(f, "unsupported op: {}", op.name()),
            EscalateReason::Custom(msg) => write!(f, "{msg}"),
        }
    }
}

pub type OpResult<T> = Result<T, EscalateReason>;

/// The closed set of operations a concrete layout's vtable must answer.
/// Doubles as the operation tag recorded in an `EventKey` (spec.md §4.5)
/// and in the export report (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ArrayOp {
    Get = 0,
    GetKey = 1,
    Elem = 2,
    Lval = 3,
    LvalNew = 4,
    Remove = 5,
    RemovePos = 6,
    Size = 7,
    HeapSize = 8,
    IsVector = 9,
    IterBegin = 10,
    IterLast = 11,
    IterEnd = 12,
    IterAdvance = 13,
    IterRewind = 14,
    KeyAtPos = 15,
    ValueAtPos = 16,
    SetMove = 17,
    SetCopy = 18,
    AppendMove = 19,
    AppendCopy = 20,
    Pop = 21,
    Scan = 22,
    ToUncounted = 23,
    ToVanilla = 24,
    Release = 25,
    UncountedRelease = 26,
    PreSort = 27,
    PostSort = 28,
    SetLegacyArray = 29,
    Copy = 30,
    Clear = 31,
    Reserve = 32,
    Dup = 33,
    EscalateToVanilla = 34,
}

pub const NUM_OPS: usize = 35;

impl ArrayOp {
    pub fn name(self) -> &'static str {
        match self {
            ArrayOp::Get => "Get",
            ArrayOp::GetKey => "GetKey",
            ArrayOp::Elem => "Elem",
            ArrayOp::Lval => "Lval",
            ArrayOp::LvalNew => "LvalNew",
            ArrayOp::Remove => "Remove",
            ArrayOp::RemovePos => "RemovePos",
            ArrayOp::Size => "Size",
            ArrayOp::HeapSize => "HeapSize",
            ArrayOp::IsVector => "IsVector",
            ArrayOp::IterBegin => "IterBegin",
            ArrayOp::IterLast => "IterLast",
            ArrayOp::IterEnd => "IterEnd",
            ArrayOp::IterAdvance => "IterAdvance",
            ArrayOp::IterRewind => "IterRewind",
            ArrayOp::KeyAtPos => "KeyAtPos",
            ArrayOp::ValueAtPos => "ValueAtPos",
            ArrayOp::SetMove => "SetMove",
            ArrayOp::SetCopy => "SetCopy",
            ArrayOp::AppendMove => "AppendMove",
            ArrayOp::AppendCopy => "AppendCopy",
            ArrayOp::Pop => "Pop",
            ArrayOp::Scan => "Scan",
            ArrayOp::ToUncounted => "ToUncounted",
            ArrayOp::ToVanilla => "ToVanilla",
            ArrayOp::Release => "Release",
            ArrayOp::UncountedRelease => "UncountedRelease",
            ArrayOp::PreSort => "PreSort",
            ArrayOp::PostSort => "PostSort",
            ArrayOp::SetLegacyArray => "SetLegacyArray",
            ArrayOp::Copy => "Copy",
            ArrayOp::Clear => "Clear",
            ArrayOp::Reserve => "Reserve",
            ArrayOp::Dup => "Dup",
            ArrayOp::EscalateToVanilla => "EscalateToVanilla",
        }
    }

    /// Static read/write classification used to bucket the export report
    /// into "Read operations" and "Write operations" (spec.md §6).
    pub fn is_write(self) -> bool {
        matches!(
            self,
            ArrayOp::SetMove
                | ArrayOp::SetCopy
                | ArrayOp::AppendMove
                | ArrayOp::AppendCopy
                | ArrayOp::Remove
                | ArrayOp::RemovePos
                | ArrayOp::Pop
                | ArrayOp::Clear
                | ArrayOp::Reserve
                | ArrayOp::SetLegacyArray
                | ArrayOp::ToVanilla
                | ArrayOp::EscalateToVanilla
        )
    }

    pub fn from_tag(tag: u8) -> Option<ArrayOp> {
        use ArrayOp::*;
        const ALL: [ArrayOp; NUM_OPS] = [
            Get, GetKey, Elem, Lval, LvalNew, Remove, RemovePos, Size, HeapSize, IsVector,
            IterBegin, IterLast, IterEnd, IterAdvance, IterRewind, KeyAtPos, ValueAtPos, SetMove,
            SetCopy, AppendMove, AppendCopy, Pop, Scan, ToUncounted, ToVanilla, Release,
            UncountedRelease, PreSort, PostSort, SetLegacyArray, Copy, Clear, Reserve, Dup,
            EscalateToVanilla,
        ];
        ALL.into_iter().find(|op| *op as u8 == tag)
    }
}

/// The full operation contract a concrete layout must implement. Default
/// methods cover the ops layouts rarely need to specialize (sort hooks,
/// legacy-array flag, scan) so most implementors only override a handful.
pub trait BespokeArrayOps: Send + Sync {
    fn get(&self, arr: &ArrayHandle, key: &ArrayKey) -> Option<ArrayValue>;
    fn elem(&self, arr: &ArrayHandle, key: &ArrayKey) -> OpResult<ArrayValue> {
        self.get(arr, key)
            .ok_or(EscalateReason::Custom("key not present"))
    }
    fn size(&self, arr: &ArrayHandle) -> usize;
    fn heap_size(&self, arr: &ArrayHandle) -> usize {
        self.size(arr) * std::mem::size_of::<(ArrayKey, ArrayValue)>()
    }
    fn is_vector(&self, arr: &ArrayHandle) -> bool;

    fn key_at_pos(&self, arr: &ArrayHandle, pos: usize) -> Option<ArrayKey>;
    fn value_at_pos(&self, arr: &ArrayHandle, pos: usize) -> Option<ArrayValue>;
    fn iter_begin(&self, arr: &ArrayHandle) -> usize {
        let _ = arr;
        0
    }
    fn iter_end(&self, arr: &ArrayHandle) -> usize {
        self.size(arr)
    }
    fn iter_advance(&self, _arr: &ArrayHandle, pos: usize) -> usize {
        pos + 1
    }
    fn iter_rewind(&self, _arr: &ArrayHandle, pos: usize) -> usize {
        pos.saturating_sub(1)
    }

    fn set_move(&self, arr: &ArrayHandle, key: ArrayKey, val: ArrayValue) -> OpResult<()>;
    fn append_move(&self, arr: &ArrayHandle, val: ArrayValue) -> OpResult<()>;
    fn remove(&self, arr: &ArrayHandle, key: &ArrayKey) -> OpResult<()>;
    fn pop(&self, arr: &ArrayHandle) -> OpResult<Option<ArrayValue>>;
    fn clear(&self, arr: &ArrayHandle);

    fn scan(&self, arr: &ArrayHandle, visitor: &mut dyn FnMut(&ArrayValue)) {
        for pos in self.iter_begin(arr)..self.iter_end(arr) {
            if let Some(v) = self.value_at_pos(arr, pos) {
                visitor(&v);
            }
        }
    }

    fn pre_sort(&self, _arr: &ArrayHandle) {}
    fn post_sort(&self, _arr: &ArrayHandle) {}
    fn set_legacy_array(&self, _arr: &ArrayHandle, _legacy: bool) {}

    fn escalate_to_vanilla(&self, reason: EscalateReason) -> OpResult<()> {
        Err(reason)
    }
}

/// Pairs a concrete layout's operation contract with the index that owns
/// it, and arbitrates dispatch.
pub struct OperationVtable {
    layout_index: LayoutIndex,
    ops: Box<dyn BespokeArrayOps>,
}

impl OperationVtable {
    pub fn new(layout_index: LayoutIndex, ops: Box<dyn BespokeArrayOps>) -> Self {
        OperationVtable { layout_index, ops }
    }

    pub fn layout_index(&self) -> LayoutIndex {
        self.layout_index
    }

    /// Debug-mode checked dispatch: panics if `arr`'s own layout index
    /// doesn't match the layout this vtable was built for, mirroring the
    /// `As(ArrayData*)` validator HHVM's debug vtables run before every
    /// call. Release builds skip the check (the JIT's static typing is
    /// trusted to have picked the right vtable already).
    pub fn checked<'a>(&'a self, arr: &ArrayHandle) -> &'a dyn BespokeArrayOps {
        #[cfg(debug_assertions)]
        {
            assert_eq!(
                arr.layout_index(),
                self.layout_index,
                "operation vtable mismatch: array carries layout {} but vtable is for {}",
                arr.layout_index(),
                self.layout_index
            );
        }
        self.ops.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_tags_round_trip() {
        for tag in 0..NUM_OPS as u8 {
            let op = ArrayOp::from_tag(tag).unwrap();
            assert_eq!(op as u8, tag);
        }
        assert!(ArrayOp::from_tag(NUM_OPS as u8).is_none());
    }
}
