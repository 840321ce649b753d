//! C5 — Event Key Encoder.
//!
//! Packs `(operation, optional key, optional value)` into a single 64-bit
//! code, cheap enough to use as a concurrent-map key on every sampled
//! operation. Byte layout (little bit-endian within the u64, byte N means
//! bits `8*N..8*N+8`):
//!
//! ```text
//! byte 0: operation tag
//! byte 1: key-spec tag
//! byte 2: value-spec tag
//! byte 3: value datatype
//! bytes 4-7: inline key payload
//! ```
//!
//! The real runtime can dereference a `Str32` key's pointer at render time
//! because its strings are interned for the life of the process; this
//! crate doesn't have that guarantee for an arbitrary `Arc<str>`, so
//! `intern` below keeps the few strings that were ever classified `Str32`
//! alive in a small process-wide table purely so `render()` can recover
//! their contents without unsafe pointer dereference.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::keys::{ArrayKey, ArrayValue, DataType};
use crate::vtable::ArrayOp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SpecTag {
    None = 0,
    Int8 = 1,
    Int16 = 2,
    Int32 = 3,
    Int64 = 4,
    Str32 = 5,
    Str = 6,
}

impl SpecTag {
    fn from_tag(tag: u8) -> SpecTag {
        match tag {
            0 => SpecTag::None,
            1 => SpecTag::Int8,
            2 => SpecTag::Int16,
            3 => SpecTag::Int32,
            4 => SpecTag::Int64,
            5 => SpecTag::Str32,
            _ => SpecTag::Str,
        }
    }
}

/// Process-wide table mapping a `Str32`-eligible pointer back to the
/// string it came from, populated lazily as keys get classified. Stands in
/// for the real runtime's static-string interner.
static STR32_REGISTRY: Lazy<Mutex<HashMap<u32, Arc<str>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn intern(ptr: u32, s: &Arc<str>) {
    STR32_REGISTRY.lock().entry(ptr).or_insert_with(|| s.clone());
}

fn lookup_str32(ptr: u32) -> Option<Arc<str>> {
    STR32_REGISTRY.lock().get(&ptr).cloned()
}

/// A packed 64-bit event record. `Copy` and cheap to use directly as a
/// `DashMap` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventKey(pub u64);

impl EventKey {
    pub fn encode(op: ArrayOp, key: Option<&ArrayKey>, value: Option<&ArrayValue>) -> EventKey {
        let (key_spec, payload) = classify_key(key);
        let value_spec = classify_value_spec(value);
        let datatype = value.map(|v| v.data_type()).unwrap_or(DataType::Uninit);

        let mut bits: u64 = 0;
        bits |= op as u64;
        bits |= (key_spec as u64) << 8;
        bits |= (value_spec as u64) << 16;
        bits |= (datatype.tag() as u64) << 24;
        bits |= (payload as u64) << 32;
        EventKey(bits)
    }

    pub fn op(&self) -> Option<ArrayOp> {
        ArrayOp::from_tag((self.0 & 0xff) as u8)
    }

    pub fn key_spec(&self) -> SpecTag {
        SpecTag::from_tag(((self.0 >> 8) & 0xff) as u8)
    }

    pub fn value_spec(&self) -> SpecTag {
        SpecTag::from_tag(((self.0 >> 16) & 0xff) as u8)
    }

    pub fn value_datatype(&self) -> Option<DataType> {
        DataType::from_tag(((self.0 >> 24) & 0xff) as u8)
    }

    pub fn payload(&self) -> u32 {
        ((self.0 >> 32) & 0xffff_ffff) as u32
    }

    /// Human-readable rendering for the export report. Inverts `Int8` and
    /// `Str32` for the key segment (the only segment with an inline
    /// payload); every other spec, and the value segment always, renders
    /// as its category name only.
    pub fn render(&self) -> String {
        let op_name = self.op().map(ArrayOp::name).unwrap_or("?");
        let mut rendered = op_name.to_string();
        if self.key_spec() != SpecTag::None {
            rendered.push_str(&format!(" key=[{}]", self.render_key_segment()));
        }
        if self.value_spec() != SpecTag::None {
            rendered.push_str(&format!(" val=[{}]", render_category(self.value_spec())));
        }
        rendered
    }

    fn render_key_segment(&self) -> String {
        match self.key_spec() {
            SpecTag::Int8 => {
                let n = self.payload() as i64 + i8::MIN as i64;
                format!("i8:{n}")
            }
            SpecTag::Str32 => match lookup_str32(self.payload()) {
                Some(s) => format!("{s:?}"),
                None => "str32".to_string(),
            },
            other => render_category(other).to_string(),
        }
    }
}

fn render_category(spec: SpecTag) -> &'static str {
    match spec {
        SpecTag::None => "",
        SpecTag::Int8 => "i8",
        SpecTag::Int16 => "i16",
        SpecTag::Int32 => "i32",
        SpecTag::Int64 => "i64",
        SpecTag::Str32 => "str32",
        SpecTag::Str => "str",
    }
}

fn classify_key(key: Option<&ArrayKey>) -> (SpecTag, u32) {
    match key {
        None => (SpecTag::None, 0),
        Some(ArrayKey::Int(n)) => classify_int(*n),
        Some(ArrayKey::Str(s)) => {
            let ptr = Arc::as_ptr(s) as *const u8 as usize;
            if ptr != 0 && ptr <= u32::MAX as usize {
                let ptr32 = ptr as u32;
                intern(ptr32, s);
                (SpecTag::Str32, ptr32)
            } else {
                (SpecTag::Str, 0)
            }
        }
    }
}

/// Value-spec classification uses the same tag domain as keys, but never
/// produces an inline payload — the 32-bit inline slot is reserved for the
/// key (spec.md §4.5).
fn classify_value_spec(value: Option<&ArrayValue>) -> SpecTag {
    match value {
        None => SpecTag::None,
        Some(ArrayValue::Int(n)) => classify_int(*n).0,
        Some(ArrayValue::Str(_)) => SpecTag::Str,
        Some(ArrayValue::Null) | Some(ArrayValue::Bool(_)) | Some(ArrayValue::Double(_)) => {
            SpecTag::None
        }
    }
}

fn classify_int(n: i64) -> (SpecTag, u32) {
    if n >= i8::MIN as i64 && n <= i8::MAX as i64 {
        let biased = (n - i8::MIN as i64) as u32;
        (SpecTag::Int8, biased)
    } else if n >= i16::MIN as i64 && n <= i16::MAX as i64 {
        (SpecTag::Int16, 0)
    } else if n >= i32::MIN as i64 && n <= i32::MAX as i64 {
        (SpecTag::Int32, 0)
    } else {
        (SpecTag::Int64, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_int_round_trips_as_i8() {
        let key = EventKey::encode(ArrayOp::Get, Some(&ArrayKey::Int(5)), None);
        assert_eq!(key.render(), "Get key=[i8:5]");
    }

    #[test]
    fn negative_small_int_round_trips_as_i8() {
        let key = EventKey::encode(ArrayOp::Get, Some(&ArrayKey::Int(-5)), None);
        assert_eq!(key.render(), "Get key=[i8:-5]");
    }

    #[test]
    fn large_int_renders_as_category_only() {
        let key = EventKey::encode(ArrayOp::Get, Some(&ArrayKey::Int(1i64 << 40)), None);
        assert_eq!(key.render(), "Get key=[i64]");
    }

    #[test]
    fn no_key_renders_as_bare_op() {
        let key = EventKey::encode(ArrayOp::Size, None, None);
        assert_eq!(key.render(), "Size");
    }

    #[test]
    fn str_key_recovers_contents_via_interning() {
        let s: Arc<str> = Arc::from("hello");
        let key = EventKey::encode(ArrayOp::Get, Some(&ArrayKey::Str(s)), None);
        assert_eq!(key.render(), "Get key=[\"hello\"]");
    }

    #[test]
    fn op_byte_round_trips() {
        let key = EventKey::encode(ArrayOp::AppendMove, None, Some(&ArrayValue::Int(1)));
        assert_eq!(key.op(), Some(ArrayOp::AppendMove));
        assert_eq!(key.value_datatype(), Some(DataType::Int));
    }
}
