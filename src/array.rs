//! The two concrete layouts this crate ships to exercise the framework:
//! `VanillaArray` (the escalation target every bespoke layout can fall back
//! to) and `LoggingArray` (a shim that forwards every operation to vanilla
//! while recording it through the source profile pipeline). Which other
//! concrete layouts a real JIT builds is explicitly out of scope; these two
//! are the minimum needed to make registration, dispatch, and logging
//! testable end to end.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::keys::{ArrayKey, ArrayValue, KeyTypeSummary, SrcKey, ValueTypeSummary};
use crate::registry::LayoutIndex;
use crate::source_profile::SourceProfileTable;
use crate::vtable::{ArrayOp, BespokeArrayOps, EscalateReason, OpResult};

/// An array value. Ordered key/value storage behind a short-critical-section
/// lock, tagged with the `LayoutIndex` of the layout currently responsible
/// for it — the debug dispatcher in `vtable::OperationVtable::checked`
/// reads this tag.
#[derive(Clone)]
pub struct ArrayHandle {
    layout_index: LayoutIndex,
    storage: Arc<Mutex<Vec<(ArrayKey, ArrayValue)>>>,
    logging: Option<LoggingContext>,
}

#[derive(Clone)]
struct LoggingContext {
    src_key: SrcKey,
    sink_key: SrcKey,
    profiles: Arc<SourceProfileTable>,
}

impl ArrayHandle {
    pub fn vanilla() -> Self {
        ArrayHandle {
            layout_index: LayoutIndex::VANILLA,
            storage: Arc::new(Mutex::new(Vec::new())),
            logging: None,
        }
    }

    pub fn with_layout(layout_index: LayoutIndex) -> Self {
        ArrayHandle {
            layout_index,
            storage: Arc::new(Mutex::new(Vec::new())),
            logging: None,
        }
    }

    /// Wraps this handle as a logging shim bound to `src_key`, recording
    /// every forwarded operation in `profiles`. `sink_key` identifies the
    /// translation currently operating on this array (the VM register
    /// anchor, in spec terms); pass `SrcKey::new(0, 0)` when none is known.
    pub fn into_logging(
        mut self,
        layout_index: LayoutIndex,
        src_key: SrcKey,
        sink_key: SrcKey,
        profiles: Arc<SourceProfileTable>,
    ) -> Self {
        self.layout_index = layout_index;
        self.logging = Some(LoggingContext {
            src_key,
            sink_key,
            profiles,
        });
        self
    }

    pub fn layout_index(&self) -> LayoutIndex {
        self.layout_index
    }

    pub fn len(&self) -> usize {
        self.storage.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summarizes this array's key shapes for the sink profile's key-type
    /// histogram (spec.md §4.7).
    pub fn key_type_summary(&self) -> KeyTypeSummary {
        let storage = self.storage.lock();
        let (mut seen_int, mut seen_str) = (false, false);
        for (key, _) in storage.iter() {
            match key {
                ArrayKey::Int(_) => seen_int = true,
                ArrayKey::Str(_) => seen_str = true,
            }
        }
        match (seen_int, seen_str) {
            (false, false) => KeyTypeSummary::Empty,
            (true, false) => KeyTypeSummary::AllInt,
            (false, true) => KeyTypeSummary::AllStr,
            (true, true) => KeyTypeSummary::Mixed,
        }
    }

    /// Summarizes this array's value types for the sink profile's
    /// value-type histogram: `Empty`, `Monotype(dt)` if every value shares
    /// one datatype, else `Any`.
    pub fn value_type_summary(&self) -> ValueTypeSummary {
        let storage = self.storage.lock();
        let mut seen = None;
        for (_, value) in storage.iter() {
            let dt = value.data_type();
            match seen {
                None => seen = Some(dt),
                Some(prev) if prev == dt => {}
                Some(_) => return ValueTypeSummary::Any,
            }
        }
        seen.map(ValueTypeSummary::Monotype)
            .unwrap_or(ValueTypeSummary::Empty)
    }
}

/// The escalation target: a plain ordered map, no layout-specific
/// behavior. Every bespoke layout's `escalate_to_vanilla` ultimately
/// produces one of these.
pub struct VanillaArrayOps;

impl BespokeArrayOps for VanillaArrayOps {
    fn get(&self, arr: &ArrayHandle, key: &ArrayKey) -> Option<ArrayValue> {
        arr.storage
            .lock()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    fn size(&self, arr: &ArrayHandle) -> usize {
        arr.storage.lock().len()
    }

    fn is_vector(&self, arr: &ArrayHandle) -> bool {
        arr.storage
            .lock()
            .iter()
            .enumerate()
            .all(|(i, (k, _))| matches!(k, ArrayKey::Int(n) if *n == i as i64))
    }

    fn key_at_pos(&self, arr: &ArrayHandle, pos: usize) -> Option<ArrayKey> {
        arr.storage.lock().get(pos).map(|(k, _)| k.clone())
    }

    fn value_at_pos(&self, arr: &ArrayHandle, pos: usize) -> Option<ArrayValue> {
        arr.storage.lock().get(pos).map(|(_, v)| v.clone())
    }

    fn set_move(&self, arr: &ArrayHandle, key: ArrayKey, val: ArrayValue) -> OpResult<()> {
        let mut storage = arr.storage.lock();
        if let Some(slot) = storage.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = val;
        } else {
            storage.push((key, val));
        }
        Ok(())
    }

    fn append_move(&self, arr: &ArrayHandle, val: ArrayValue) -> OpResult<()> {
        let mut storage = arr.storage.lock();
        let next_key = storage
            .iter()
            .filter_map(|(k, _)| match k {
                ArrayKey::Int(n) => Some(*n),
                _ => None,
            })
            .max()
            .map_or(0, |m| m + 1);
        storage.push((ArrayKey::Int(next_key), val));
        Ok(())
    }

    fn remove(&self, arr: &ArrayHandle, key: &ArrayKey) -> OpResult<()> {
        let mut storage = arr.storage.lock();
        storage.retain(|(k, _)| k != key);
        Ok(())
    }

    fn pop(&self, arr: &ArrayHandle) -> OpResult<Option<ArrayValue>> {
        Ok(arr.storage.lock().pop().map(|(_, v)| v))
    }

    fn clear(&self, arr: &ArrayHandle) {
        arr.storage.lock().clear();
    }
}

/// Forwards every operation to the vanilla implementation, logging each
/// one through the bound source profile before returning. This is the
/// layout the demo binary and the integration test drive.
pub struct LoggingArrayOps {
    inner: VanillaArrayOps,
}

impl LoggingArrayOps {
    pub fn new() -> Self {
        LoggingArrayOps {
            inner: VanillaArrayOps,
        }
    }

    fn log(&self, arr: &ArrayHandle, op: ArrayOp, key: Option<&ArrayKey>, val: Option<&ArrayValue>) {
        if let Some(ctx) = &arr.logging {
            ctx.profiles
                .log_event(ctx.src_key, ctx.sink_key, op, key, val);
        }
    }
}

impl Default for LoggingArrayOps {
    fn default() -> Self {
        Self::new()
    }
}

impl BespokeArrayOps for LoggingArrayOps {
    fn get(&self, arr: &ArrayHandle, key: &ArrayKey) -> Option<ArrayValue> {
        let result = self.inner.get(arr, key);
        self.log(arr, ArrayOp::Get, Some(key), result.as_ref());
        result
    }

    fn size(&self, arr: &ArrayHandle) -> usize {
        self.inner.size(arr)
    }

    fn is_vector(&self, arr: &ArrayHandle) -> bool {
        self.inner.is_vector(arr)
    }

    fn key_at_pos(&self, arr: &ArrayHandle, pos: usize) -> Option<ArrayKey> {
        self.inner.key_at_pos(arr, pos)
    }

    fn value_at_pos(&self, arr: &ArrayHandle, pos: usize) -> Option<ArrayValue> {
        self.inner.value_at_pos(arr, pos)
    }

    fn set_move(&self, arr: &ArrayHandle, key: ArrayKey, val: ArrayValue) -> OpResult<()> {
        self.log(arr, ArrayOp::SetMove, Some(&key), Some(&val));
        self.inner.set_move(arr, key, val)
    }

    fn append_move(&self, arr: &ArrayHandle, val: ArrayValue) -> OpResult<()> {
        self.log(arr, ArrayOp::AppendMove, None, Some(&val));
        self.inner.append_move(arr, val)
    }

    fn remove(&self, arr: &ArrayHandle, key: &ArrayKey) -> OpResult<()> {
        self.log(arr, ArrayOp::Remove, Some(key), None);
        self.inner.remove(arr, key)
    }

    fn pop(&self, arr: &ArrayHandle) -> OpResult<Option<ArrayValue>> {
        self.log(arr, ArrayOp::Pop, None, None);
        self.inner.pop(arr)
    }

    fn clear(&self, arr: &ArrayHandle) {
        self.log(arr, ArrayOp::Clear, None, None);
        self.inner.clear(arr)
    }

    fn escalate_to_vanilla(&self, reason: EscalateReason) -> OpResult<()> {
        Err(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vanilla_set_then_get_round_trips() {
        let ops = VanillaArrayOps;
        let arr = ArrayHandle::vanilla();
        ops.set_move(&arr, ArrayKey::Str("a".into()), ArrayValue::Int(1))
            .unwrap();
        assert_eq!(ops.get(&arr, &ArrayKey::Str("a".into())), Some(ArrayValue::Int(1)));
        assert_eq!(ops.size(&arr), 1);
    }

    #[test]
    fn vanilla_append_assigns_increasing_int_keys() {
        let ops = VanillaArrayOps;
        let arr = ArrayHandle::vanilla();
        ops.append_move(&arr, ArrayValue::Int(10)).unwrap();
        ops.append_move(&arr, ArrayValue::Int(20)).unwrap();
        assert_eq!(ops.key_at_pos(&arr, 0), Some(ArrayKey::Int(0)));
        assert_eq!(ops.key_at_pos(&arr, 1), Some(ArrayKey::Int(1)));
        assert!(ops.is_vector(&arr));
    }
}
