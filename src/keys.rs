//! Stand-ins for the host-runtime value contracts this subsystem treats as
//! opaque: `SrcKey`, `TranslationId`, `DataType`. A real embedding VM would
//! supply its own types satisfying the same equality/encoding properties;
//! these are small, `Copy`, and just rich enough to drive the profile
//! tables and the event-key encoder end to end.

use std::fmt;

/// A resume mode distinguishes a normal bytecode location from a location
/// reached by resuming a suspended generator/async frame. `SrcKey`
/// canonicalizes resume-mode variance away before it's used as a profile
/// table key, per the source-profile component's key-canonicalization rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResumeMode {
    #[default]
    None,
    ResumeTry,
    ResumeSwitch,
}

/// A source bytecode location: the function it belongs to plus a byte
/// offset into that function, with an optional resume mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SrcKey {
    pub function: u32,
    pub offset: u32,
    pub resume_mode: ResumeMode,
}

impl SrcKey {
    pub fn new(function: u32, offset: u32) -> Self {
        SrcKey {
            function,
            offset,
            resume_mode: ResumeMode::None,
        }
    }

    pub fn with_resume_mode(function: u32, offset: u32, resume_mode: ResumeMode) -> Self {
        SrcKey {
            function,
            offset,
            resume_mode,
        }
    }

    /// The key used by the source profile table: resume mode is dropped so
    /// that a resumed frame and its normal-entry counterpart share one
    /// profile.
    pub fn canonical(&self) -> SrcKey {
        SrcKey {
            function: self.function,
            offset: self.offset,
            resume_mode: ResumeMode::None,
        }
    }
}

impl fmt::Display for SrcKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:#x}", self.function, self.offset)
    }
}

/// Identifies one JIT translation of a `SrcKey`. Sink profiles are keyed by
/// `(TranslationId, SrcKey)` since a single source location can be
/// translated more than once (retranslation, profiling vs. optimized tiers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TranslationId(pub u32);

impl fmt::Display for TranslationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Runtime datatype tag. Stands in for the host VM's typed-value
/// definitions; the event-key encoder only needs a small closed tag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Uninit,
    Null,
    Bool,
    Int,
    Double,
    String,
    Array,
    Object,
}

impl DataType {
    pub fn tag(self) -> u8 {
        match self {
            DataType::Uninit => 0,
            DataType::Null => 1,
            DataType::Bool => 2,
            DataType::Int => 3,
            DataType::Double => 4,
            DataType::String => 5,
            DataType::Array => 6,
            DataType::Object => 7,
        }
    }

    pub fn from_tag(tag: u8) -> Option<DataType> {
        Some(match tag {
            0 => DataType::Uninit,
            1 => DataType::Null,
            2 => DataType::Bool,
            3 => DataType::Int,
            4 => DataType::Double,
            5 => DataType::String,
            6 => DataType::Array,
            7 => DataType::Object,
            _ => return None,
        })
    }
}

/// An array key: either an integer or a string key, the two kinds HHVM-style
/// arrays support. String keys are `Arc<str>` rather than `String` so the
/// event-key encoder (`event_key`) can treat a key's pointer identity as a
/// stand-in for the real runtime's interned static-string pointers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArrayKey {
    Int(i64),
    Str(std::sync::Arc<str>),
}

impl fmt::Display for ArrayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArrayKey::Int(i) => write!(f, "{i}"),
            ArrayKey::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// An array value. Only as rich as the demo and tests require; real values
/// live entirely outside this crate's scope.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
}

impl ArrayValue {
    pub fn data_type(&self) -> DataType {
        match self {
            ArrayValue::Null => DataType::Null,
            ArrayValue::Bool(_) => DataType::Bool,
            ArrayValue::Int(_) => DataType::Int,
            ArrayValue::Double(_) => DataType::Double,
            ArrayValue::Str(_) => DataType::String,
        }
    }
}

/// Summary of the key shapes observed in one array, used by the sink
/// profile's key-type histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyTypeSummary {
    Empty,
    AllInt,
    AllStr,
    Mixed,
}

impl fmt::Display for KeyTypeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyTypeSummary::Empty => "empty",
            KeyTypeSummary::AllInt => "int",
            KeyTypeSummary::AllStr => "str",
            KeyTypeSummary::Mixed => "mixed",
        };
        write!(f, "{name}")
    }
}

/// Tri-state summary of the value types observed in one array, used by the
/// sink profile's value-type histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueTypeSummary {
    Empty,
    Monotype(DataType),
    Any,
}

impl fmt::Display for ValueTypeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueTypeSummary::Empty => write!(f, "empty"),
            ValueTypeSummary::Monotype(dt) => write!(f, "{dt:?}"),
            ValueTypeSummary::Any => write!(f, "any"),
        }
    }
}
