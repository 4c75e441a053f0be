use std::fmt::Write;

use serde::Serialize;
use trigger_core::{AuditListing, AuditRow};

/// Label/value pair for a flow picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectElement {
    pub label: String,
    pub value: String,
}

/// Flows that currently have a trigger, in listing order.
pub fn select_elements(listing: &AuditListing) -> Vec<SelectElement> {
    listing
        .rows
        .iter()
        .filter(|row| row.has_trigger)
        .map(|row| SelectElement {
            label: row.flow_name.clone(),
            value: row.flow_id.to_string(),
        })
        .collect()
}

const DETAIL_HEADER: &str = "| Flow | Trigger Last Run | Selected Tables | Last Import | Is expected |\n\
                             |------|------------------|-----------------|-------------|-------------|\n";

/// Markdown table with one line per table selected by each flow's trigger.
pub fn flow_detail_markdown(rows: &[AuditRow]) -> String {
    let mut markdown = String::from(DETAIL_HEADER);
    for row in rows.iter().filter(|row| row.has_trigger) {
        let last_run = row.trigger_last_run.as_deref().unwrap_or("never");
        for table in &row.tables {
            let last_import = if table.is_missing() {
                "missing"
            } else {
                table.last_import_date().unwrap_or("-")
            };
            let expected = match table.is_expected {
                Some(expected) => expected.to_string(),
                None => "-".to_string(),
            };
            let _ = writeln!(
                markdown,
                "| **{}** | {} | **{}** | {} | {} |",
                escape(&row.flow_name),
                last_run,
                table.table_id,
                last_import,
                expected
            );
        }
    }
    markdown
}

fn escape(cell: &str) -> String {
    cell.replace('|', "\\|")
}
