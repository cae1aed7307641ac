use crate::protocol::{ApplyReport, WriteReport};
use crate::snapshot::WorldSnapshot;
use crate::world::World;
use std::env;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

static DEBUG_MODE: AtomicBool = AtomicBool::new(false);
static TRACE_MODE: AtomicBool = AtomicBool::new(false);

/// Initialize debug mode from environment variables
///
/// - `REPLICA_DEBUG=1`: log world snapshots as JSON
/// - `REPLICA_TRACE=1`: log a one-line summary of every update written,
///   applied or dropped
///
/// Output goes through the `log` facade, so a logger must be installed by
/// the host for anything to appear.
pub fn init_debug_mode() {
    let debug = env::var("REPLICA_DEBUG").is_ok();
    let trace = env::var("REPLICA_TRACE").is_ok();

    DEBUG_MODE.store(debug, Ordering::Relaxed);
    TRACE_MODE.store(trace, Ordering::Relaxed);

    if debug {
        log::info!("debug mode enabled, world snapshots will be logged as JSON");
    }

    if trace {
        log::info!("trace mode enabled, update summaries will be logged");
    }
}

pub fn is_debug_enabled() -> bool {
    DEBUG_MODE.load(Ordering::Relaxed)
}

pub fn is_trace_enabled() -> bool {
    TRACE_MODE.load(Ordering::Relaxed)
}

/// Log a world snapshot in JSON format if debug mode is enabled
pub fn log_snapshot(label: &str, snapshot: &WorldSnapshot) {
    if !is_debug_enabled() {
        return;
    }

    match serde_json::to_string_pretty(snapshot) {
        Ok(json) => {
            log::debug!("{} snapshot ({} entities):\n{}", label, snapshot.len(), json);
        }
        Err(e) => {
            log::warn!("failed to serialize {} snapshot to JSON: {}", label, e);
        }
    }
}

/// Capture and log `world` if debug mode is enabled.
pub fn log_world(world: &World) {
    if is_debug_enabled() {
        log_snapshot(world.label(), &WorldSnapshot::capture(world));
    }
}

pub fn trace_write(client: impl fmt::Display, report: &WriteReport, bytes: usize) {
    if !is_trace_enabled() {
        return;
    }

    log::trace!(
        "→ {}: {} deleted, {} created, {} updated ({})",
        client,
        report.deleted,
        report.created,
        report.updated,
        format_bytes(bytes)
    );
}

pub fn trace_apply(report: &ApplyReport) {
    if !is_trace_enabled() {
        return;
    }

    log::trace!(
        "← applied: {} deleted, {} created, {} updated",
        report.deleted,
        report.created,
        report.updated
    );

    // Anything below means the two sides disagreed before this update.
    if report.unknown_deletions > 0 {
        log::trace!("  {} deletions for unknown entities", report.unknown_deletions);
    }
    if report.implicit_creations > 0 {
        log::trace!("  {} implicit creations", report.implicit_creations);
    }
    if report.skew_repairs > 0 {
        log::trace!("  {} membership repairs", report.skew_repairs);
    }
    if report.skipped > 0 {
        log::trace!("  {} records beyond capacity skipped", report.skipped);
    }
}

pub fn trace_ring_drop(framed: usize, free: usize) {
    if !is_trace_enabled() {
        return;
    }

    log::trace!(
        "ring full: dropped {} frame with {} free",
        format_bytes(framed),
        format_bytes(free)
    );
}

/// Format bytes in human-readable format (KB, MB, etc.)
pub fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;
    const GB: usize = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 bytes");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(2 * 1024 * 1024), "2.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_debug_mode_initialization() {
        // Should not crash without env vars
        init_debug_mode();
        log_world(&World::new(4));
        trace_ring_drop(64, 3);
    }
}
