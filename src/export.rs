//! C8 — Export Coordinator.
//!
//! Freezes the profile tables, sorts their contents, and writes the
//! human-readable report (spec.md §6) on a dedicated worker thread. The
//! worker-thread-plus-join pattern mirrors `axiom/src/main.rs`'s
//! `thread::Builder::new().spawn(...)` / `.join()` shell around script
//! execution, used here to isolate the (potentially slow, I/O-bound)
//! export pass from whatever thread calls `export_profiles`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};

use crate::sink_profile::SinkProfileTable;
use crate::source_profile::{EntryTypeSummary, SourceProfileTable};

/// The shared-mutex-plus-atomic-flag handshake that separates "profiling"
/// from "exporting". All profile mutations take the read side and check
/// `started` while holding it; `begin` takes the write side once, flips
/// the flag, and releases before any report-building work starts.
pub struct ExportGate {
    lock: RwLock<()>,
    started: AtomicBool,
}

impl ExportGate {
    pub fn new() -> Arc<ExportGate> {
        Arc::new(ExportGate {
            lock: RwLock::new(()),
            started: AtomicBool::new(false),
        })
    }

    /// Runs `f` while holding the gate's read lock, passing whether export
    /// has already started. Every profile table mutation goes through
    /// this so the flag is always observed consistently with the lock.
    pub fn with_read<T>(&self, f: impl FnOnce(bool) -> T) -> T {
        let _guard = self.lock.read();
        f(self.started.load(Ordering::Relaxed))
    }

    /// Takes the write lock, sets `started`, releases. Once this returns,
    /// every reader that acquires the read lock afterward observes
    /// `started == true`; any reader already inside its critical section
    /// was guaranteed to have started before this call (since it holds
    /// the write lock exclusively while flipping the flag).
    fn begin(&self) {
        let _guard = self.lock.write();
        self.started.store(true, Ordering::Relaxed);
    }

    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::Relaxed)
    }
}

pub struct ExportCoordinator {
    gate: Arc<ExportGate>,
    sources: Arc<SourceProfileTable>,
    sinks: Arc<SinkProfileTable>,
    output_path: Option<PathBuf>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ExportCoordinator {
    pub fn new(
        sources: Arc<SourceProfileTable>,
        sinks: Arc<SinkProfileTable>,
        output_path: Option<PathBuf>,
    ) -> Self {
        assert!(
            Arc::ptr_eq(sources.gate(), sinks.gate()),
            "source and sink tables must share one export gate"
        );
        let gate = sources.gate().clone();
        ExportCoordinator {
            gate,
            sources,
            sinks,
            output_path,
            worker: Mutex::new(None),
        }
    }

    /// Empty path ⇒ documented no-op (spec.md §6): the gate still flips,
    /// so `getLoggingProfile`/`logEvent` calls after this still bail, but
    /// no worker thread or report is produced.
    pub fn export_profiles(&self) {
        self.gate.begin();
        let Some(path) = self.output_path.clone() else {
            return;
        };
        let sources = self.sources.clone();
        let sinks = self.sinks.clone();
        let handle = std::thread::Builder::new()
            .name("bespoke-export".into())
            .spawn(move || {
                let report = build_report(&sources, &sinks);
                // spec.md §7: export I/O failure is silent, the report is
                // simply not written; the thread still exits cleanly.
                let _ = std::fs::write(&path, report);
            })
            .expect("failed to spawn export worker thread");
        *self.worker.lock() = Some(handle);
    }

    /// Joins the export worker, if one was launched. A no-op if
    /// `export_profiles` was never called or the path was empty.
    pub fn wait_on_export_profiles(&self) {
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    pub fn gate(&self) -> &Arc<ExportGate> {
        &self.gate
    }
}

fn build_report(sources: &SourceProfileTable, sinks: &SinkProfileTable) -> String {
    let mut report = String::new();
    report.push_str("Sources\n");
    report.push_str("=======\n\n");
    for source in sources.snapshot_by_weight() {
        render_source(&mut report, &source);
    }

    report.push_str("\n------------------------------------------------------------\n\n");

    report.push_str("Sinks\n");
    report.push_str("=====\n\n");
    for sink in sinks.snapshot_by_weight() {
        render_sink(&mut report, &sink);
    }
    report
}

fn render_source(out: &mut String, source: &crate::source_profile::SourceSnapshot) {
    out.push_str(&format!(
        "{} [{}/{} sampled, {} weight]\n",
        source.symbol, source.logging_arrays_emitted, source.sample_count, source.weight
    ));
    out.push_str(&format!("  {}\n", source.disassembly));
    out.push_str(&format!(
        "  {} reads, {} writes, {} distinct sinks\n",
        source.reads, source.writes, source.distinct_sinks
    ));

    render_op_bucket(out, "Read operations:", &source.read_ops);
    render_op_bucket(out, "Write operations:", &source.write_ops);

    if !source.escalations.is_empty() {
        out.push_str("  Entry Type Escalations:\n");
        for ((before, after), count) in &source.escalations {
            out.push_str(&format!(
                "    {count:>6}x {} -> {}\n",
                before.render(),
                after.render()
            ));
        }
    }
    if !source.entry_type_uses.is_empty() {
        out.push_str("  Entry Type Operations:\n");
        for (state, count) in &source.entry_type_uses {
            out.push_str(&format!("    {count:>6}x {}\n", state.render()));
        }
    }
    out.push('\n');
}

fn render_op_bucket(
    out: &mut String,
    header: &str,
    ops: &[crate::source_profile::OpBucket],
) {
    if ops.is_empty() {
        return;
    }
    out.push_str(&format!("  {header}\n"));
    for bucket in ops {
        if bucket.events.len() <= 1 {
            out.push_str(&format!("    {:>6}x {}\n", bucket.total, bucket.op_name));
        } else {
            out.push_str(&format!("    {:>6}x {}\n", bucket.total, bucket.op_name));
            for (rendered, count) in &bucket.events {
                out.push_str(&format!("        {count:>6}x {rendered}\n"));
            }
        }
    }
}

fn render_sink(out: &mut String, sink: &crate::sink_profile::SinkSnapshot) {
    out.push_str(&format!(
        "{} [{}/{} sampled]\n",
        sink.symbol, sink.sampled_count, sink.weight
    ));
    out.push_str(&format!("  {}\n", sink.disassembly));
    out.push_str("  Array Type Counts:\n");
    for (kind, count) in &sink.array_kind_counts {
        out.push_str(&format!("    {count:>6}x {kind}\n"));
    }
    out.push_str("  Key Type Counts:\n");
    for (key_type, count) in &sink.key_type_counts {
        out.push_str(&format!("    {count:>6}x {key_type}\n"));
    }
    out.push_str("  Value Type Counts:\n");
    for (value_type, count) in &sink.value_type_counts {
        out.push_str(&format!("    {count:>6}x {value_type}\n"));
    }
    out.push('\n');
}

/// Grouping key for entry-type transitions: collapses `(before, after)`
/// pairs into the two buckets the report distinguishes (spec.md §4.8).
pub(crate) fn partition_entry_types(
    monotype_events: &BTreeMap<(EntryTypeSummary, EntryTypeSummary), u64>,
) -> (
    Vec<((EntryTypeSummary, EntryTypeSummary), u64)>,
    Vec<(EntryTypeSummary, u64)>,
) {
    let mut escalations = Vec::new();
    let mut uses: BTreeMap<EntryTypeSummary, u64> = BTreeMap::new();
    for (&(before, after), &count) in monotype_events {
        if before == after {
            *uses.entry(after).or_insert(0) += count;
        } else {
            escalations.push(((before, after), count));
        }
    }
    escalations.sort_by(|a, b| b.1.cmp(&a.1));
    let mut uses: Vec<_> = uses.into_iter().collect();
    uses.sort_by(|a, b| b.1.cmp(&a.1));
    (escalations, uses)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_starts_closed() {
        let gate = ExportGate::new();
        assert!(!gate.has_started());
        gate.with_read(|started| assert!(!started));
    }

    #[test]
    fn gate_begin_is_observed_by_subsequent_readers() {
        let gate = ExportGate::new();
        gate.begin();
        gate.with_read(|started| assert!(started));
    }
}
