//! Bespoke array layout lattice and logging-profile pipeline.
//!
//! A dynamic-language JIT runtime can give a hot array allocation site a
//! specialized in-memory layout ("bespoke layout") instead of paying for a
//! fully generic representation. This crate is the framework such a JIT
//! builds on top of: a registry of layouts joined in a lattice (`registry`,
//! `lattice`), a dual vtable per layout for interpreted and JIT-compiled
//! dispatch (`vtable`, `jit_emit`), and a sampling pipeline that profiles
//! which operations and entry-type shapes a given allocation site actually
//! sees in production (`event_key`, `source_profile`, `sink_profile`,
//! `export`).
//!
//! `array` supplies the two concrete layouts needed to exercise the
//! framework end to end — `VanillaArrayOps` (the universal escalation
//! target) and `LoggingArrayOps` (a shim that forwards to vanilla while
//! recording every operation). Building more layouts on top of this
//! framework is out of scope.

pub mod array;
pub mod config;
pub mod errors;
pub mod event_key;
pub mod export;
pub mod jit_emit;
pub mod keys;
pub mod lattice;
pub mod registry;
pub mod sink_profile;
pub mod source_profile;
pub mod vtable;

pub use array::{ArrayHandle, LoggingArrayOps, VanillaArrayOps};
pub use errors::BespokeError;
pub use event_key::EventKey;
pub use export::{ExportCoordinator, ExportGate};
pub use jit_emit::{AbstractEmit, ConcreteEmit, IrValue, JitBuilder, JitEmit, JitEmitOutcome};
pub use keys::{ArrayKey, ArrayValue, DataType, KeyTypeSummary, ResumeMode, SrcKey, TranslationId, ValueTypeSummary};
pub use registry::{Layout, LayoutIndex, LayoutSpec, Registry};
pub use sink_profile::{ArrayKind, SinkProfile, SinkProfileTable, SinkSnapshot};
pub use source_profile::{EntryTypeSummary, LoggingProfile, OpBucket, SourceProfileTable, SourceSnapshot};
pub use vtable::{ArrayOp, BespokeArrayOps, EscalateReason, OperationVtable};
