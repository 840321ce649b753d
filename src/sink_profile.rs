//! C7 — Sink Profile Table.
//!
//! One `SinkProfile` per `(TranslationId, SrcKey)` pair: a translation
//! observing arrays at a particular bytecode location. Histograms are
//! fixed-size atomic counter arrays indexed by a small closed tag set,
//! the same shape the teacher uses for per-opcode counters in
//! `axiom/src/vm/interp.rs` (an array of `AtomicU64` indexed by tag rather
//! than a map, since the tag domain is small and known up front).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::array::ArrayHandle;
use crate::export::ExportGate;
use crate::keys::{KeyTypeSummary, SrcKey, TranslationId, ValueTypeSummary};
use crate::registry::LayoutIndex;

/// Coarse classification of an observed array, independent of its exact
/// layout: is it vanilla, the logging shim, or some other bespoke layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayKind {
    Vanilla,
    LoggingShim,
    OtherBespoke,
}

impl ArrayKind {
    fn index(self) -> usize {
        match self {
            ArrayKind::Vanilla => 0,
            ArrayKind::LoggingShim => 1,
            ArrayKind::OtherBespoke => 2,
        }
    }

    const COUNT: usize = 3;

    fn from_index(i: usize) -> ArrayKind {
        match i {
            0 => ArrayKind::Vanilla,
            1 => ArrayKind::LoggingShim,
            _ => ArrayKind::OtherBespoke,
        }
    }
}

impl fmt::Display for ArrayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArrayKind::Vanilla => "vanilla",
            ArrayKind::LoggingShim => "logging-shim",
            ArrayKind::OtherBespoke => "other-bespoke",
        };
        write!(f, "{name}")
    }
}

fn key_type_index(kt: KeyTypeSummary) -> usize {
    match kt {
        KeyTypeSummary::Empty => 0,
        KeyTypeSummary::AllInt => 1,
        KeyTypeSummary::AllStr => 2,
        KeyTypeSummary::Mixed => 3,
    }
}

const KEY_TYPE_COUNT: usize = 4;

fn value_type_index(vt: ValueTypeSummary) -> usize {
    match vt {
        ValueTypeSummary::Empty => 0,
        ValueTypeSummary::Any => 1,
        ValueTypeSummary::Monotype(dt) => 2 + dt.tag() as usize,
    }
}

// Empty + Any + one slot per DataType tag (8 tags).
const VALUE_TYPE_COUNT: usize = 10;

pub struct SinkProfile {
    translation: TranslationId,
    source: SrcKey,
    array_kind_counts: [AtomicU64; ArrayKind::COUNT],
    key_type_counts: [AtomicU64; KEY_TYPE_COUNT],
    value_type_counts: [AtomicU64; VALUE_TYPE_COUNT],
    /// Per-source contributor counts: how many sampled arrays observed at
    /// this sink trace back to each logging profile.
    sources: DashMap<SrcKey, u64>,
    sampled_count: AtomicU64,
    unsampled_count: AtomicU64,
}

impl SinkProfile {
    fn new(translation: TranslationId, source: SrcKey) -> SinkProfile {
        SinkProfile {
            translation,
            source,
            array_kind_counts: Default::default(),
            key_type_counts: Default::default(),
            value_type_counts: Default::default(),
            sources: DashMap::new(),
            sampled_count: AtomicU64::new(0),
            unsampled_count: AtomicU64::new(0),
        }
    }

    /// spec.md §4.7 `update`: vanilla and other-bespoke arrays only bump the
    /// unsampled counter and the array-kind histogram. A logging-shim array
    /// additionally bumps the sampled counter, the key/value histograms,
    /// and records its contributing source in `sources`.
    pub fn update(&self, arr: &ArrayHandle, logging_shim_layout: LayoutIndex, contributor: Option<SrcKey>) {
        let kind = if arr.layout_index() == LayoutIndex::VANILLA {
            ArrayKind::Vanilla
        } else if arr.layout_index() == logging_shim_layout {
            ArrayKind::LoggingShim
        } else {
            ArrayKind::OtherBespoke
        };

        self.array_kind_counts[kind.index()].fetch_add(1, Ordering::Relaxed);

        if kind != ArrayKind::LoggingShim {
            self.unsampled_count.fetch_add(1, Ordering::Relaxed);
            return;
        }

        self.sampled_count.fetch_add(1, Ordering::Relaxed);
        self.key_type_counts[key_type_index(arr.key_type_summary())].fetch_add(1, Ordering::Relaxed);
        self.value_type_counts[value_type_index(arr.value_type_summary())]
            .fetch_add(1, Ordering::Relaxed);
        if let Some(src) = contributor {
            *self.sources.entry(src.canonical()).or_insert(0) += 1;
        }
    }

    pub fn reduce(&self, other: &SinkProfile) {
        for i in 0..ArrayKind::COUNT {
            let n = other.array_kind_counts[i].load(Ordering::Relaxed);
            self.array_kind_counts[i].fetch_add(n, Ordering::Relaxed);
        }
        for i in 0..KEY_TYPE_COUNT {
            let n = other.key_type_counts[i].load(Ordering::Relaxed);
            self.key_type_counts[i].fetch_add(n, Ordering::Relaxed);
        }
        for i in 0..VALUE_TYPE_COUNT {
            let n = other.value_type_counts[i].load(Ordering::Relaxed);
            self.value_type_counts[i].fetch_add(n, Ordering::Relaxed);
        }
        self.sampled_count
            .fetch_add(other.sampled_count.load(Ordering::Relaxed), Ordering::Relaxed);
        self.unsampled_count
            .fetch_add(other.unsampled_count.load(Ordering::Relaxed), Ordering::Relaxed);
        for entry in other.sources.iter() {
            *self.sources.entry(*entry.key()).or_insert(0) += *entry.value();
        }
    }
}

pub struct SinkProfileTable {
    gate: Arc<ExportGate>,
    profiles: DashMap<(TranslationId, SrcKey), Arc<SinkProfile>>,
}

impl SinkProfileTable {
    pub fn new(gate: Arc<ExportGate>) -> Arc<SinkProfileTable> {
        Arc::new(SinkProfileTable {
            gate,
            profiles: DashMap::new(),
        })
    }

    pub fn gate(&self) -> &Arc<ExportGate> {
        &self.gate
    }

    pub fn get_sink_profile(
        &self,
        translation: TranslationId,
        src_key: SrcKey,
    ) -> Option<Arc<SinkProfile>> {
        let canonical = src_key.canonical();
        if let Some(existing) = self.profiles.get(&(translation, canonical)) {
            return Some(existing.clone());
        }
        self.gate.with_read(|started| {
            if started {
                return None;
            }
            Some(
                self.profiles
                    .entry((translation, canonical))
                    .or_insert_with(|| Arc::new(SinkProfile::new(translation, canonical)))
                    .clone(),
            )
        })
    }

    /// Records an observation at `(translation, src_key)`, creating the
    /// profile under the export gate if this is the first one.
    pub fn observe(
        &self,
        translation: TranslationId,
        src_key: SrcKey,
        arr: &ArrayHandle,
        logging_shim_layout: LayoutIndex,
        contributor: Option<SrcKey>,
    ) {
        if let Some(profile) = self.get_sink_profile(translation, src_key) {
            profile.update(arr, logging_shim_layout, contributor);
        }
    }

    pub fn snapshot_by_weight(&self) -> Vec<SinkSnapshot> {
        let mut snapshots: Vec<SinkSnapshot> = self
            .profiles
            .iter()
            .map(|entry| build_snapshot(entry.key(), entry.value()))
            .collect();
        snapshots.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap());
        snapshots
    }
}

pub struct SinkSnapshot {
    pub symbol: String,
    pub disassembly: String,
    pub sampled_count: u64,
    pub unsampled_count: u64,
    pub weight: f64,
    pub array_kind_counts: Vec<(ArrayKind, u64)>,
    pub key_type_counts: Vec<(KeyTypeSummary, u64)>,
    pub value_type_counts: Vec<(ValueTypeSummary, u64)>,
    pub distinct_contributors: usize,
}

fn build_snapshot(key: &(TranslationId, SrcKey), profile: &Arc<SinkProfile>) -> SinkSnapshot {
    let (translation, src_key) = key;

    let array_kind_counts = (0..ArrayKind::COUNT)
        .map(|i| (ArrayKind::from_index(i), profile.array_kind_counts[i].load(Ordering::Relaxed)))
        .filter(|(_, n)| *n > 0)
        .collect();

    let key_type_names = [
        KeyTypeSummary::Empty,
        KeyTypeSummary::AllInt,
        KeyTypeSummary::AllStr,
        KeyTypeSummary::Mixed,
    ];
    let key_type_counts = key_type_names
        .into_iter()
        .map(|kt| (kt, profile.key_type_counts[key_type_index(kt)].load(Ordering::Relaxed)))
        .filter(|(_, n)| *n > 0)
        .collect();

    let value_type_names = [
        ValueTypeSummary::Empty,
        ValueTypeSummary::Monotype(crate::keys::DataType::Uninit),
        ValueTypeSummary::Monotype(crate::keys::DataType::Null),
        ValueTypeSummary::Monotype(crate::keys::DataType::Bool),
        ValueTypeSummary::Monotype(crate::keys::DataType::Int),
        ValueTypeSummary::Monotype(crate::keys::DataType::Double),
        ValueTypeSummary::Monotype(crate::keys::DataType::String),
        ValueTypeSummary::Monotype(crate::keys::DataType::Array),
        ValueTypeSummary::Monotype(crate::keys::DataType::Object),
        ValueTypeSummary::Any,
    ];
    let value_type_counts = value_type_names
        .into_iter()
        .map(|vt| (vt, profile.value_type_counts[value_type_index(vt)].load(Ordering::Relaxed)))
        .filter(|(_, n)| *n > 0)
        .collect();

    let sampled = profile.sampled_count.load(Ordering::Relaxed);
    let unsampled = profile.unsampled_count.load(Ordering::Relaxed);
    let total = sampled + unsampled;
    let distinct_contributors = profile.sources.len();
    // profileWeight mirrors the source table's formula: total observations
    // scaled by the fraction that were actually sampled.
    let weight = if total == 0 {
        0.0
    } else {
        total as f64 * (sampled as f64 / total as f64)
    };

    SinkSnapshot {
        symbol: format!("{translation}@{}", src_key),
        disassembly: format!("<sink {translation} at {}>", src_key),
        sampled_count: sampled,
        unsampled_count: unsampled,
        weight,
        array_kind_counts,
        key_type_counts,
        value_type_counts,
        distinct_contributors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{ArrayKey, ArrayValue, DataType};
    use crate::registry::LayoutIndex;

    fn src(function: u32, offset: u32) -> SrcKey {
        SrcKey::new(function, offset)
    }

    #[test]
    fn vanilla_array_counts_as_unsampled() {
        let gate = ExportGate::new();
        let table = SinkProfileTable::new(gate);
        let shim_layout = LayoutIndex(5); // arbitrary non-vanilla sentinel for this test
        let arr = ArrayHandle::vanilla();
        table.observe(TranslationId(1), src(1, 0), &arr, shim_layout, None);
        let snap = &table.snapshot_by_weight()[0];
        assert_eq!(snap.sampled_count, 0);
        assert_eq!(snap.unsampled_count, 1);
    }

    #[test]
    fn shim_array_counts_key_and_value_histograms() {
        let gate = ExportGate::new();
        let table = SinkProfileTable::new(gate);
        let shim_layout = LayoutIndex(5);
        // Use a handle carrying the shim layout index directly for the test,
        // bypassing full registry wiring.
        let arr = ArrayHandle::with_layout(shim_layout);
        crate::vtable::BespokeArrayOps::set_move(
            &crate::array::VanillaArrayOps,
            &arr,
            ArrayKey::Int(1),
            ArrayValue::Str("x".into()),
        )
        .unwrap();
        table.observe(TranslationId(1), src(1, 0), &arr, shim_layout, Some(src(2, 0)));
        let snap = &table.snapshot_by_weight()[0];
        assert_eq!(snap.sampled_count, 1);
        assert_eq!(snap.unsampled_count, 0);
        assert!(snap
            .key_type_counts
            .iter()
            .any(|(kt, n)| *kt == KeyTypeSummary::AllInt && *n == 1));
        assert!(snap
            .value_type_counts
            .iter()
            .any(|(vt, n)| *vt == ValueTypeSummary::Monotype(DataType::String) && *n == 1));
    }
}
