use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tempfile::NamedTempFile;
use trigger_core::AuditRow;

pub const TABLE_FILE: &str = "flows_with_trigger.csv";

pub const COLUMNS: [&str; 11] = [
    "flow_id",
    "flow_name",
    "has_trigger",
    "trigger_status",
    "trigger_id",
    "trigger_last_run",
    "selected_table_ids",
    "flow_disabled",
    "reset_outcome",
    "selected_tables_last_import",
    "selected_tables_expected",
];

const TABLE_ID_SEPARATOR: &str = ";";

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    primary_key: [&'a str; 1],
    incremental: bool,
    columns: &'a [&'a str],
}

/// The `flows_with_trigger` output table under `{data_dir}/out/tables`.
#[derive(Debug, Clone)]
pub struct OutputTable {
    dir: PathBuf,
}

impl OutputTable {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("out").join("tables"),
        }
    }

    pub fn csv_path(&self) -> PathBuf {
        self.dir.join(TABLE_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(format!("{TABLE_FILE}.manifest"))
    }

    /// Replaces the table and its manifest. Readers see either the previous
    /// files or the new ones, never a partial write.
    pub fn write(&self, rows: &[AuditRow]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;

        let csv_path = self.csv_path();
        self.replace(&csv_path, |file| {
            let mut writer = csv::Writer::from_writer(file);
            writer.write_record(COLUMNS)?;
            for row in rows {
                writer.write_record(record(row))?;
            }
            writer.flush()?;
            Ok(())
        })?;

        let manifest = Manifest {
            primary_key: ["flow_id"],
            incremental: false,
            columns: &COLUMNS,
        };
        self.replace(&self.manifest_path(), |file| {
            serde_json::to_writer_pretty(&mut *file, &manifest)?;
            file.write_all(b"\n")?;
            Ok(())
        })?;

        tracing::info!(path = %csv_path.display(), rows = rows.len(), "output table written");
        Ok(csv_path)
    }

    fn replace<F>(&self, target: &Path, fill: F) -> Result<()>
    where
        F: FnOnce(&mut NamedTempFile) -> Result<()>,
    {
        let mut temp = NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("failed to create temp file in {}", self.dir.display()))?;
        fill(&mut temp).with_context(|| format!("failed to write {}", target.display()))?;
        temp.as_file()
            .sync_all()
            .with_context(|| format!("failed to sync {}", target.display()))?;
        temp.persist(target)
            .map_err(|err| err.error)
            .with_context(|| format!("failed to replace {}", target.display()))?;
        Ok(())
    }
}

fn record(row: &AuditRow) -> [String; 11] {
    [
        row.flow_id.to_string(),
        row.flow_name.clone(),
        row.has_trigger.to_string(),
        row.trigger_status.to_string(),
        row.trigger_id
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default(),
        row.trigger_last_run.clone().unwrap_or_default(),
        row.table_ids().join(TABLE_ID_SEPARATOR),
        row.activation.is_disabled().to_string(),
        row.reset_outcome.clone().unwrap_or_default(),
        row.latest_import().unwrap_or_default().to_string(),
        row.tables_expected()
            .map(|expected| expected.to_string())
            .unwrap_or_default(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use trigger_core::platform::sample_trigger;
    use trigger_core::{FlowConfigId, FlowSummary, TableDetail, TableFreshness};

    fn row(id: &str) -> AuditRow {
        AuditRow::without_trigger(&FlowSummary {
            id: FlowConfigId::parse(id).unwrap(),
            name: format!("Flow, {id}"),
            is_disabled: true,
        })
    }

    #[test]
    fn writes_table_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let table = OutputTable::new(dir.path());

        let path = table.write(&[row("1"), row("2")]).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, COLUMNS);
        let records: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(&records[0][1], "Flow, 1");
        assert_eq!(&records[0][3], "none");
        assert_eq!(&records[0][7], "true");
        assert_eq!(&records[0][9], "");
        assert_eq!(&records[0][10], "");

        let manifest: serde_json::Value =
            serde_json::from_slice(&fs::read(table.manifest_path()).unwrap()).unwrap();
        assert_eq!(manifest["primary_key"], serde_json::json!(["flow_id"]));
        assert_eq!(manifest["incremental"], false);
    }

    #[test]
    fn replaces_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let table = OutputTable::new(dir.path());
        table.write(&[row("1"), row("2"), row("3")]).unwrap();

        table.write(&[row("4")]).unwrap();

        let contents = fs::read_to_string(table.csv_path()).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("Flow, 4"));
        assert!(!contents.contains("Flow, 1"));
        let leftovers = fs::read_dir(dir.path().join("out").join("tables"))
            .unwrap()
            .count();
        assert_eq!(leftovers, 2);
    }

    #[test]
    fn records_table_freshness_per_flow() {
        let flow = FlowSummary {
            id: FlowConfigId::parse("5").unwrap(),
            name: "Orders".into(),
            is_disabled: false,
        };
        let mut trigger = sample_trigger("t5", &flow.id, &["in.c-a.orders", "in.c-a.items"]);
        trigger.last_run = Some("2024-05-01T10:00:00+0000".into());
        let tables = [
            ("in.c-a.orders", "2024-05-01T09:00:00+0000"),
            ("in.c-a.items", "2024-05-01T11:30:00+0000"),
        ]
        .into_iter()
        .map(|(id, imported)| {
            TableFreshness::assess(
                &trigger,
                id,
                Some(TableDetail {
                    id: id.into(),
                    last_import_date: Some(imported.into()),
                }),
            )
        })
        .collect();
        let row = AuditRow::with_trigger(&flow, &trigger, tables);

        let fields = record(&row);

        assert_eq!(fields[3], "pending");
        assert_eq!(fields[6], "in.c-a.orders;in.c-a.items");
        assert_eq!(fields[9], "2024-05-01T11:30:00+0000");
        assert_eq!(fields[10], "false");
    }
}
