//! Application orchestrator.
//! Loads/merges config, initializes logging, installs signal handlers,
//! validates the request, and drives the relocation pipeline to a terminal
//! state.

use anyhow::{Result, bail};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

use treemove::output as out;
use treemove::config::{CONFIG_ENV, default_config_path, load_config_from_xml};
use treemove::pipeline::{HaltSignal, PipelineState, Relocation, RelocationRequest};
use treemove::store::FsStore;
use treemove::{RelocateError, shutdown};

use crate::cli::Args;
use crate::logging::init_tracing;

/// Run the CLI application.
pub fn run(args: Args) -> Result<()> {
    // Handle --print-config before logging init
    if args.print_config {
        if let Ok(cfg_env) = std::env::var(CONFIG_ENV) {
            out::print_info(&format!("Using {CONFIG_ENV} (explicit):\n  {cfg_env}\n"));
            out::print_info(&format!(
                "To override, unset {CONFIG_ENV} or set it to another file."
            ));
            return Ok(());
        }
        match default_config_path() {
            Some(p) => {
                out::print_info(&format!("Default treemove config path:\n  {}\n", p.display()));
                if p.exists() {
                    out::print_info("A config file already exists at that location.");
                } else {
                    out::print_info(
                        "No config file exists there yet. A template is created on first real run.",
                    );
                }
            }
            None => {
                out::print_error("Could not determine a default config path.");
            }
        }
        return Ok(());
    }

    // Build config: XML (if present) then CLI overrides (CLI wins).
    let mut cfg = load_config_from_xml().unwrap_or_default();
    args.apply_overrides(&mut cfg);

    // Initialize logging and capture the guard so we can drop it on signal
    let guard_opt: Option<tracing_appender::non_blocking::WorkerGuard> =
        init_tracing(&cfg.log_level, cfg.log_file.as_deref(), args.json).map_err(|e| {
            out::print_error(&format!("Failed to initialize logging: {}", e));
            e
        })?;

    let (Some(source), Some(destination)) = (args.source.clone(), args.destination.clone()) else {
        bail!("SOURCE and DEST are required (see --help)");
    };

    let request = RelocationRequest::new(source, destination, args.process_name.clone(), args.mode);
    debug!("Starting treemove: {:?}", request);

    let guard_slot = Arc::new(Mutex::new(guard_opt));
    let halter_slot: Arc<Mutex<Option<HaltSignal>>> = Arc::new(Mutex::new(None));

    // Install the handler before the pipeline exists. Until start_work fills
    // the halter slot, a signal only raises the process-wide flag; the guard
    // is dropped either way so tracing_appender flushes.
    {
        let guard_slot = Arc::clone(&guard_slot);
        let halter_slot = Arc::clone(&halter_slot);
        ctrlc::set_handler(move || {
            shutdown::request();
            out::print_warn("Received interrupt; halting pipeline gracefully...");
            if let Ok(slot) = halter_slot.lock() {
                if let Some(halter) = slot.as_ref() {
                    halter.halt();
                }
            }
            if let Ok(mut g) = guard_slot.lock() {
                let _ = g.take();
            }
        })
        .expect("failed to install signal handler");
    }

    let store = Arc::new(FsStore::new());
    let relocation =
        Relocation::new(store.clone(), store).with_options(cfg.pipeline_options());

    let handle = match relocation.start_work(request) {
        Ok(handle) => handle,
        Err(e) => {
            log_relocate_error(&e);
            flush_guard(&guard_slot);
            return Err(e.into());
        }
    };

    if let Ok(mut slot) = halter_slot.lock() {
        *slot = Some(handle.halter());
    }
    // A signal that landed while the halter slot was still empty.
    if shutdown::is_requested() {
        handle.halt();
    }

    let report = handle.wait();
    let result = if report.is_done() {
        info!("Relocation pipeline reached done");
        out::print_success("Relocation completed.");
        Ok(())
    } else {
        let phase = report
            .failed_phase
            .unwrap_or(PipelineState::Aborted)
            .to_string();
        error!(
            phase,
            failure_count = report.failures.len(),
            "Relocation pipeline aborted"
        );
        for failure in &report.failures {
            out::print_error(&format!("{failure}"));
        }
        bail!("relocation aborted during {phase} with {} failure(s)", report.failures.len())
    };

    // Ensure logs are flushed before exit
    flush_guard(&guard_slot);
    result
}

fn flush_guard(slot: &Arc<Mutex<Option<tracing_appender::non_blocking::WorkerGuard>>>) {
    if let Ok(mut g) = slot.lock() {
        let _ = g.take();
    }
}

fn log_relocate_error(e: &RelocateError) {
    let code = e.code();
    match e {
        RelocateError::MissingSource(path) => {
            error!(code, kind = "missing_source", path = %path.display(), "Validation failed")
        }
        RelocateError::MissingDestinationParent(path) => {
            error!(code, kind = "missing_destination_parent", path = %path.display(), "Validation failed")
        }
        RelocateError::DestinationInsideSource {
            source_path,
            destination,
        } => {
            error!(code, kind = "destination_inside_source", source = %source_path.display(), destination = %destination.display(), "Validation failed")
        }
        _ => {
            error!(code, error = %e, "Failed to start relocation")
        }
    }
}
