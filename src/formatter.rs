//! Result Formatter
//!
//! Turns warehouse rows into one chat reply. Aggregate answers ("how many
//! projects") become a single sentence; everything else becomes a numbered
//! list built from the columns people actually want to read.

use crate::value::{normalize, ResultRow, Scalar};

pub const NO_RESULTS: &str = "No results found.";

/// Column name -> sentence label. A row carrying one of these answers the
/// whole question.
const AGGREGATE_COLUMNS: &[(&str, &str)] = &[
    ("total_projects", "Total projects"),
    ("total_clients", "Total clients"),
    ("total_contracts", "Total contracts"),
    ("total", "Total"),
];

const IMPORTANT_COLUMNS: &[&str] = &[
    "project_name",
    "client_name",
    "name",
    "contract_number",
    "status",
    "amount",
    "total_amount",
    "transaction_date",
    "start_date",
    "end_date",
    "description",
];

const FALLBACK_COLUMNS: usize = 3;

pub struct ResultFormatter {
    max_rows: usize,
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self { max_rows: 20 }
    }
}

impl ResultFormatter {
    pub fn new(max_rows: usize) -> Self {
        Self {
            max_rows: max_rows.max(1),
        }
    }

    pub fn format(&self, rows: &[ResultRow]) -> String {
        if rows.is_empty() {
            return NO_RESULTS.to_string();
        }

        if let Some(sentence) = rows.iter().find_map(aggregate_sentence) {
            return sentence;
        }

        let mut lines = vec![format!("Found {} result(s):", rows.len())];
        lines.extend(
            rows.iter()
                .take(self.max_rows)
                .enumerate()
                .map(|(idx, row)| format!("{}. {}", idx + 1, render_row(row))),
        );
        if rows.len() > self.max_rows {
            lines.push(format!("...and {} more", rows.len() - self.max_rows));
        }
        lines.join("\n")
    }
}

fn aggregate_sentence(row: &ResultRow) -> Option<String> {
    AGGREGATE_COLUMNS.iter().find_map(|(column, label)| {
        row.get(column)
            .map(normalize)
            .filter(|value| !value.is_null())
            .map(|value| format!("{}: {}", label, value))
    })
}

fn render_row(row: &ResultRow) -> String {
    let important: Vec<&Scalar> = IMPORTANT_COLUMNS
        .iter()
        .filter_map(|column| row.get(column))
        .map(normalize)
        .collect();

    let values: Vec<String> = if important.is_empty() {
        row.columns
            .iter()
            .take(FALLBACK_COLUMNS)
            .map(|(name, value)| format!("{}: {}", name, normalize(value)))
            .collect()
    } else {
        important.iter().map(|v| v.to_string()).collect()
    };

    values.join(" | ")
}
