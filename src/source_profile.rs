//! C6 — Source Profile Table.
//!
//! One `LoggingProfile` per canonical `SrcKey` (an array-allocating
//! instruction). Populated by the logging-shim layout's operation vtable
//! (`array::LoggingArrayOps`) on every forwarded operation. Uses
//! `dashmap::DashMap` for the two concurrent maps the same way the teacher
//! uses it for `AxValue::Map`/`AxObject` fields (`axiom/src/core/value.rs`,
//! `axiom/src/core/oop.rs`): per-bucket locking, atomic insert-or-get via
//! `entry()`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::event_key::EventKey;
use crate::export::{partition_entry_types, ExportGate};
use crate::keys::{ArrayKey, ArrayValue, DataType, SrcKey};
use crate::vtable::ArrayOp;

/// A coarse 16-bit summary of the datatypes an array slot has held, used
/// for entry-type transition tracking. Represented as a bitset over
/// `DataType` tags rather than a single tag, since a transition observes
/// "the set of types seen so far", not just the latest one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryTypeSummary(pub u16);

impl EntryTypeSummary {
    pub fn empty() -> EntryTypeSummary {
        EntryTypeSummary(0)
    }

    pub fn of(dt: DataType) -> EntryTypeSummary {
        EntryTypeSummary(1u16 << dt.tag())
    }

    pub fn with(self, dt: DataType) -> EntryTypeSummary {
        EntryTypeSummary(self.0 | (1u16 << dt.tag()))
    }

    pub fn render(self) -> String {
        if self.0 == 0 {
            return "empty".to_string();
        }
        let mut parts = Vec::new();
        for tag in 0..16u8 {
            if self.0 & (1 << tag) != 0 {
                if let Some(dt) = DataType::from_tag(tag) {
                    parts.push(format!("{dt:?}"));
                }
            }
        }
        parts.join("|")
    }
}

fn is_denylisted(key: SrcKey) -> bool {
    // Stand-in for the real runtime's instruction-pattern denylist (e.g.
    // array literals consumed by type-structure tests). `function ==
    // u32::MAX` is reserved as the sentinel denylisted function so tests
    // can exercise the rejection path without a real bytecode table.
    key.function == u32::MAX
}

fn is_valid(key: SrcKey) -> bool {
    !is_denylisted(key)
}

pub struct LoggingProfile {
    source: SrcKey,
    events: DashMap<(SrcKey, EventKey), u64>,
    monotype_events: DashMap<(EntryTypeSummary, EntryTypeSummary), u64>,
    logging_arrays_emitted: AtomicU64,
    sample_count: AtomicU64,
}

impl LoggingProfile {
    fn new(source: SrcKey) -> LoggingProfile {
        LoggingProfile {
            source,
            events: DashMap::new(),
            monotype_events: DashMap::new(),
            logging_arrays_emitted: AtomicU64::new(0),
            sample_count: AtomicU64::new(0),
        }
    }

    pub fn source(&self) -> SrcKey {
        self.source
    }

    /// Called whenever a new array is allocated under this profile.
    /// `sampled` distinguishes arrays that were actually wrapped in the
    /// logging shim (and so contribute detailed events) from ones that
    /// were merely counted.
    pub fn record_emission(&self, sampled: bool) {
        self.logging_arrays_emitted.fetch_add(1, Ordering::Relaxed);
        if sampled {
            self.sample_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn total_events(&self) -> u64 {
        self.events.iter().map(|entry| *entry.value()).sum()
    }
}

pub struct SourceProfileTable {
    gate: Arc<ExportGate>,
    profiles: DashMap<SrcKey, Arc<LoggingProfile>>,
}

impl SourceProfileTable {
    pub fn new(gate: Arc<ExportGate>) -> Arc<SourceProfileTable> {
        Arc::new(SourceProfileTable {
            gate,
            profiles: DashMap::new(),
        })
    }

    pub fn gate(&self) -> &Arc<ExportGate> {
        &self.gate
    }

    /// spec.md §4.6: canonicalize, reject invalid/denylisted keys,
    /// optimistic read, then construct-under-gate on miss. `DashMap`'s
    /// `entry()` API is itself the atomic insert-or-get accessor the spec
    /// describes — the losing side of a race simply has its candidate
    /// `Arc` dropped, which is this crate's equivalent of HHVM freeing a
    /// loser's auxiliary allocations.
    pub fn get_profile(&self, src_key: SrcKey) -> Option<Arc<LoggingProfile>> {
        let canonical = src_key.canonical();
        if !is_valid(canonical) {
            return None;
        }
        if let Some(existing) = self.profiles.get(&canonical) {
            return Some(existing.clone());
        }
        self.gate.with_read(|started| {
            if started {
                return None;
            }
            Some(
                self.profiles
                    .entry(canonical)
                    .or_insert_with(|| Arc::new(LoggingProfile::new(canonical)))
                    .clone(),
            )
        })
    }

    /// spec.md §4.6 `logEvent`. `sink_key` stands in for "the VM register
    /// anchor's current SrcKey"; pass `SrcKey::new(0, 0)` when none is
    /// available, matching the spec's "use an empty SrcKey" fallback.
    pub fn log_event(
        &self,
        source_key: SrcKey,
        sink_key: SrcKey,
        op: ArrayOp,
        key: Option<&ArrayKey>,
        value: Option<&ArrayValue>,
    ) {
        self.gate.with_read(|started| {
            if started {
                return;
            }
            let canonical = source_key.canonical();
            if !is_valid(canonical) {
                return;
            }
            let profile = self
                .profiles
                .entry(canonical)
                .or_insert_with(|| Arc::new(LoggingProfile::new(canonical)))
                .clone();
            let event_key = EventKey::encode(op, key, value);
            *profile
                .events
                .entry((sink_key.canonical(), event_key))
                .or_insert(0) += 1;
        })
    }

    pub fn log_entry_types(
        &self,
        source_key: SrcKey,
        before: EntryTypeSummary,
        after: EntryTypeSummary,
    ) {
        self.gate.with_read(|started| {
            if started {
                return;
            }
            let canonical = source_key.canonical();
            if !is_valid(canonical) {
                return;
            }
            let profile = self
                .profiles
                .entry(canonical)
                .or_insert_with(|| Arc::new(LoggingProfile::new(canonical)))
                .clone();
            *profile.monotype_events.entry((before, after)).or_insert(0) += 1;
        })
    }

    /// Builds the sorted, aggregated view the export report renders from.
    /// Only meaningful after the gate has been flipped — callers are the
    /// export worker, which by construction runs after `export_profiles`
    /// has drained all writers.
    pub fn snapshot_by_weight(&self) -> Vec<SourceSnapshot> {
        let mut snapshots: Vec<SourceSnapshot> = self
            .profiles
            .iter()
            .map(|entry| build_snapshot(entry.value()))
            .collect();
        snapshots.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap());
        snapshots
    }
}

pub struct OpBucket {
    pub op_name: &'static str,
    pub total: u64,
    /// Distinct rendered events under this op, sorted descending by count.
    pub events: Vec<(String, u64)>,
}

pub struct SourceSnapshot {
    pub symbol: String,
    pub disassembly: String,
    pub logging_arrays_emitted: u64,
    pub sample_count: u64,
    pub weight: f64,
    pub reads: u64,
    pub writes: u64,
    pub distinct_sinks: usize,
    pub read_ops: Vec<OpBucket>,
    pub write_ops: Vec<OpBucket>,
    pub escalations: Vec<((EntryTypeSummary, EntryTypeSummary), u64)>,
    pub entry_type_uses: Vec<(EntryTypeSummary, u64)>,
}

fn build_snapshot(profile: &Arc<LoggingProfile>) -> SourceSnapshot {
    let mut distinct_sinks = std::collections::HashSet::new();
    let mut by_op: BTreeMap<ArrayOp, Vec<(String, u64)>> = BTreeMap::new();
    let mut by_op_total: BTreeMap<ArrayOp, u64> = BTreeMap::new();
    let mut reads = 0u64;
    let mut writes = 0u64;

    for entry in profile.events.iter() {
        let (sink_key, event_key) = entry.key();
        let count = *entry.value();
        distinct_sinks.insert(*sink_key);
        if let Some(op) = event_key.op() {
            by_op.entry(op).or_default().push((event_key.render(), count));
            *by_op_total.entry(op).or_insert(0) += count;
            if op.is_write() {
                writes += count;
            } else {
                reads += count;
            }
        }
    }

    let mut read_ops = Vec::new();
    let mut write_ops = Vec::new();
    let mut ops_by_total: Vec<(ArrayOp, u64)> = by_op_total.into_iter().collect();
    ops_by_total.sort_by(|a, b| b.1.cmp(&a.1));

    for (op, total) in ops_by_total {
        let mut events = by_op.remove(&op).unwrap_or_default();
        events.sort_by(|a, b| b.1.cmp(&a.1));
        let bucket = OpBucket {
            op_name: op.name(),
            total,
            events,
        };
        if op.is_write() {
            write_ops.push(bucket);
        } else {
            read_ops.push(bucket);
        }
    }

    let monotype_snapshot: BTreeMap<(EntryTypeSummary, EntryTypeSummary), u64> = profile
        .monotype_events
        .iter()
        .map(|entry| (*entry.key(), *entry.value()))
        .collect();
    let (escalations, entry_type_uses) = partition_entry_types(&monotype_snapshot);

    let total_events = profile.total_events();
    let emitted = profile.logging_arrays_emitted.load(Ordering::Relaxed);
    let sampled = profile.sample_count.load(Ordering::Relaxed);
    let weight = if emitted == 0 {
        0.0
    } else {
        total_events as f64 * (sampled as f64 / emitted as f64)
    };

    SourceSnapshot {
        symbol: profile.source.to_string(),
        disassembly: format!("<source {}>", profile.source),
        logging_arrays_emitted: emitted,
        sample_count: sampled,
        weight,
        reads,
        writes,
        distinct_sinks: distinct_sinks.len(),
        read_ops,
        write_ops,
        escalations,
        entry_type_uses,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::ResumeMode;

    fn src(function: u32, offset: u32) -> SrcKey {
        SrcKey::new(function, offset)
    }

    #[test]
    fn get_profile_creates_and_reuses() {
        let gate = ExportGate::new();
        let table = SourceProfileTable::new(gate);
        let key = src(1, 10);
        let a = table.get_profile(key).unwrap();
        let b = table.get_profile(key).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn canonicalization_merges_resume_mode_variants() {
        let gate = ExportGate::new();
        let table = SourceProfileTable::new(gate);
        let normal = src(1, 10);
        let resumed = SrcKey::with_resume_mode(1, 10, ResumeMode::ResumeTry);
        let a = table.get_profile(normal).unwrap();
        let b = table.get_profile(resumed).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn denylisted_key_never_creates_a_profile() {
        let gate = ExportGate::new();
        let table = SourceProfileTable::new(gate);
        let bogus = src(u32::MAX, 0);
        assert!(table.get_profile(bogus).is_none());
        assert!(table.profiles.is_empty());
    }

    #[test]
    fn log_event_records_while_gate_is_open() {
        let gate = ExportGate::new();
        let table = SourceProfileTable::new(gate);
        let key = src(1, 10);
        table.log_event(key, src(2, 0), ArrayOp::Get, Some(&ArrayKey::Int(1)), None);
        assert_eq!(table.get_profile(key).unwrap().total_events(), 1);
    }
}
