//! Table formatting for query, status and rebuild output.

use comfy_table::{
    Attribute, Cell, CellAlignment, Color, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_FULL,
};

use crate::error::SyncResult;
use crate::indexing::{AppendReport, RebuildReport};
use crate::query::{LabelMatch, QueryOutcome};
use crate::service::KindStatus;
use crate::types::Kind;

/// Builder for creating formatted tables.
pub struct TableBuilder {
    table: Table,
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TableBuilder {
    pub fn new() -> Self {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.apply_modifier(UTF8_ROUND_CORNERS);
        Self { table }
    }

    pub fn set_headers(mut self, headers: Vec<&str>) -> Self {
        let header_cells: Vec<Cell> = headers
            .into_iter()
            .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
            .collect();
        self.table.set_header(header_cells);
        self
    }

    pub fn add_row(mut self, row: Vec<String>) -> Self {
        self.table.add_row(row);
        self
    }

    pub fn add_cells(mut self, row: Vec<Cell>) -> Self {
        self.table.add_row(row);
        self
    }

    pub fn build(self) -> String {
        self.table.to_string()
    }
}

/// Ranked matches of one kind, or a one-line notice when unavailable.
pub fn create_matches_table(kind: Kind, outcome: &QueryOutcome) -> String {
    match outcome {
        QueryOutcome::Unavailable { reason } => format!("{kind}: unavailable ({reason})"),
        QueryOutcome::Matches(matches) if matches.is_empty() => format!("{kind}: no matches"),
        QueryOutcome::Matches(matches) => matches_table(matches),
    }
}

fn matches_table(matches: &[LabelMatch]) -> String {
    let mut builder = TableBuilder::new().set_headers(vec!["#", "Label", "Similarity"]);
    for (rank, m) in matches.iter().enumerate() {
        builder = builder.add_cells(vec![
            Cell::new(rank + 1).set_alignment(CellAlignment::Right),
            Cell::new(&m.label),
            Cell::new(format!("{:.4}", m.similarity)).set_alignment(CellAlignment::Right),
        ]);
    }
    builder.build()
}

/// One row per kind: local copy, remote latest and whether they agree.
pub fn create_status_table(statuses: &[KindStatus]) -> String {
    let mut builder = TableBuilder::new().set_headers(vec![
        "Kind",
        "Vectors",
        "Labels",
        "Cached version",
        "Latest version",
        "State",
    ]);
    for status in statuses {
        let optional = |n: Option<usize>| n.map_or_else(|| "-".to_string(), |n| n.to_string());
        let cached = status
            .cached
            .as_ref()
            .map_or_else(|| "-".to_string(), |e| e.index_version.to_string());
        let latest = status
            .remote_index
            .as_ref()
            .map_or_else(|| "-".to_string(), ToString::to_string);

        let (state, color) = if status.remote_error.is_some() {
            ("store unreachable", Color::Red)
        } else if status.remote_index.is_none() {
            ("never published", Color::Yellow)
        } else if status.cached.is_none() {
            ("not cached", Color::Yellow)
        } else if status.is_stale() {
            ("stale", Color::Yellow)
        } else if status.labels != status.cardinality {
            ("out of sync", Color::Red)
        } else {
            ("current", Color::Green)
        };

        builder = builder.add_cells(vec![
            Cell::new(status.kind),
            Cell::new(optional(status.cardinality)).set_alignment(CellAlignment::Right),
            Cell::new(optional(status.labels)).set_alignment(CellAlignment::Right),
            Cell::new(cached),
            Cell::new(latest),
            Cell::new(state).fg(color),
        ]);
    }
    builder.build()
}

/// One row per rebuilt kind, failures included.
pub fn create_rebuild_table(results: &[(Kind, SyncResult<RebuildReport>)]) -> String {
    let mut builder = TableBuilder::new().set_headers(vec![
        "Kind", "Result", "Vectors", "Skipped", "Version", "Time",
    ]);
    for (kind, result) in results {
        let row = match result {
            Ok(report) => vec![
                Cell::new(kind),
                Cell::new("ok").fg(Color::Green),
                Cell::new(report.cardinality).set_alignment(CellAlignment::Right),
                Cell::new(report.skipped_blank + report.skipped_duplicates)
                    .set_alignment(CellAlignment::Right),
                Cell::new(&report.versions.index),
                Cell::new(format!("{:.2?}", report.elapsed)),
            ],
            Err(e) => vec![
                Cell::new(kind),
                Cell::new(e.status_code())
                    .fg(Color::Red)
                    .add_attribute(Attribute::Bold),
                Cell::new("-"),
                Cell::new("-"),
                Cell::new("-"),
                Cell::new("-"),
            ],
        };
        builder = builder.add_cells(row);
    }
    builder.build()
}

/// One row per appended kind, failures included.
pub fn create_append_table(results: &[(Kind, SyncResult<AppendReport>)]) -> String {
    let mut builder =
        TableBuilder::new().set_headers(vec!["Kind", "Result", "New ids", "Vectors", "Attempts"]);
    for (kind, result) in results {
        let row = match result {
            Ok(report) => {
                let ids = match (report.ids.first(), report.ids.last()) {
                    (Some(first), Some(last)) if first == last => first.to_string(),
                    (Some(first), Some(last)) => format!("{first}..={last}"),
                    _ => "-".to_string(),
                };
                vec![
                    Cell::new(kind),
                    Cell::new("ok").fg(Color::Green),
                    Cell::new(ids),
                    Cell::new(report.cardinality).set_alignment(CellAlignment::Right),
                    Cell::new(report.attempts).set_alignment(CellAlignment::Right),
                ]
            }
            Err(e) => vec![
                Cell::new(kind),
                Cell::new(e.status_code())
                    .fg(Color::Red)
                    .add_attribute(Attribute::Bold),
                Cell::new("-"),
                Cell::new("-"),
                Cell::new("-"),
            ],
        };
        builder = builder.add_cells(row);
    }
    builder.build()
}
