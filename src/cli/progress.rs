//! Progress display module
//!
//! Renders the state of every download started by this peer.

use std::fmt::Write as _;

use crate::storage::download::{DownloadPhase, DownloadRegistry, StatusCounts};

/// Point-in-time view of one download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRow {
    pub filename: String,
    pub group: String,
    pub size: u64,
    pub phase: DownloadPhase,
    pub counts: StatusCounts,
}

impl DownloadRow {
    /// Completion percentage by pieces
    pub fn percent(&self) -> usize {
        match self.counts.total() {
            0 => 100,
            total => self.counts.completed * 100 / total,
        }
    }
}

/// Format bytes to human readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Collect a row for every registered download
pub async fn snapshot(registry: &DownloadRegistry) -> Vec<DownloadRow> {
    let mut rows = Vec::new();
    for state in registry.all().await {
        rows.push(DownloadRow {
            filename: state.filename.clone(),
            group: state.group.clone(),
            size: state.size,
            phase: state.phase(),
            counts: state.counts().await,
        });
    }
    rows
}

/// Render rows the way `show_downloads` prints them
pub fn render_downloads(rows: &[DownloadRow]) -> String {
    if rows.is_empty() {
        return "No downloads found.".to_string();
    }

    let mut out = String::from("========== Downloads ==========\n");
    for row in rows {
        let c = &row.counts;
        let _ = writeln!(out, "File: {}", row.filename);
        let _ = writeln!(out, "  Group: {}", row.group);
        let _ = writeln!(out, "  Size: {} bytes ({})", row.size, format_bytes(row.size));
        let _ = writeln!(out, "  Progress: {}/{} pieces ({}%)", c.completed, c.total(), row.percent());
        if row.phase == DownloadPhase::Completed {
            let _ = writeln!(out, "  Status: COMPLETED");
        } else {
            let _ = writeln!(
                out,
                "  Status: {} ({} pending, {} downloading, {} completed, {} failed)",
                row.phase, c.pending, c.downloading, c.completed, c.failed
            );
        }
        out.push_str("----------------------------------------\n");
    }
    out
}
