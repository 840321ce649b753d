//! Bespoke demo CLI (`bespoke-demo`).
//!
//! A thin shell around the `bespoke` library: builds a small lattice,
//! registers a logging-shim layout, replays simulated events from several
//! worker threads, runs the export coordinator, and prints what happened —
//! the same role `axiom/src/main.rs` plays for the `axiom` library, scaled
//! down to this subsystem's one real subcommand.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use bespoke::config::{self, BespokeConfig};
use bespoke::{
    ArrayHandle, ArrayKey, ArrayValue, BespokeArrayOps, ExportCoordinator, LayoutSpec,
    LoggingArrayOps, OperationVtable, Registry, SinkProfileTable, SourceProfileTable, SrcKey,
    TranslationId,
};

#[derive(Parser)]
#[command(
    name = "bespoke-demo",
    version = "0.1.0",
    about = "Bespoke array layout lattice and logging-profile pipeline demo"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a logging shim, replay simulated events, and export a report.
    Demo {
        /// Where to write the export report. Omit to exercise the
        /// documented no-op export path.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Total events to replay, split across threads.
        #[arg(short, long, default_value_t = 1000)]
        events: u32,
        /// Worker threads replaying events concurrently.
        #[arg(short, long, default_value_t = 10)]
        threads: u32,
    },
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Commands::Demo {
            output,
            events,
            threads,
        } => run_demo(output, events, threads),
    }
}

fn run_demo(output: Option<PathBuf>, events: u32, threads: u32) {
    config::install(BespokeConfig::new(output.clone(), 10));

    let registry = Registry::new();
    let top = registry.top_index();
    let shim_index = registry
        .register(LayoutSpec::concrete_layout(
            "LoggingShim",
            vec![top],
            Box::new(LoggingArrayOps::new()),
        ))
        .expect("registering the logging shim layout cannot fail in the demo");
    registry.finalize();

    let gate = bespoke::ExportGate::new();
    let sources = SourceProfileTable::new(gate.clone());
    let sinks = SinkProfileTable::new(gate.clone());
    let coordinator = ExportCoordinator::new(sources.clone(), sinks.clone(), output.clone());

    let source_key = SrcKey::new(1, 0);
    let sink_key = SrcKey::new(2, 0);
    let translation = TranslationId(1);

    let array = ArrayHandle::vanilla().into_logging(shim_index, source_key, sink_key, sources.clone());
    if let Some(profile) = sources.get_profile(source_key) {
        profile.record_emission(true);
    }

    let vtable = Arc::new(OperationVtable::new(shim_index, Box::new(LoggingArrayOps::new())));
    let per_thread = events / threads.max(1);
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let array = array.clone();
            let vtable = vtable.clone();
            std::thread::spawn(move || {
                let ops = vtable.checked(&array);
                for i in 0..per_thread {
                    let _ = ops.set_move(&array, ArrayKey::Int(i as i64 % 4), ArrayValue::Int(1));
                    let _ = ops.get(&array, &ArrayKey::Int(i as i64 % 4));
                }
            })
        })
        .collect();
    for h in handles {
        let _ = h.join();
    }

    sinks.observe(translation, sink_key, &array, shim_index, Some(source_key));

    coordinator.export_profiles();
    coordinator.wait_on_export_profiles();

    println!(
        "replayed {} events across {} threads for source {source_key}",
        per_thread * threads,
        threads
    );
    match &output {
        Some(path) => println!("report written to {}", path.display()),
        None => println!("no output path given; export_profiles was a documented no-op"),
    }
}
