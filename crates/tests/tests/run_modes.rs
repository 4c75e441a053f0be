mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use flow_trigger_reset::output::{COLUMNS, OutputTable};
use flow_trigger_reset::{Environment, Overrides, RunConfig, RunError};
use common::{ORDERS_TABLE, project, quick_retry};
use tokio_util::sync::CancellationToken;
use trigger_core::platform::Operation;
use trigger_core::{InMemoryPlatform, PlatformClient, PlatformError};

fn config(data_dir: &Path, flow_ids: &[&str], list_flows: bool) -> Result<RunConfig> {
    let env = Environment {
        token: Some("test-token".into()),
        url: Some("https://connection.example.com".into()),
        data_dir: None,
    };
    let overrides = Overrides {
        data_dir: Some(data_dir.to_path_buf()),
        flow_ids: flow_ids.iter().map(|id| id.to_string()).collect(),
        output_list_flows: list_flows,
        ..Overrides::default()
    };
    let mut config = RunConfig::load(&env, &overrides)?;
    config.retry = quick_retry();
    Ok(config)
}

fn client(platform: &Arc<InMemoryPlatform>) -> Arc<dyn PlatformClient> {
    platform.clone()
}

fn read_rows(data_dir: &Path) -> Result<Vec<csv::StringRecord>> {
    let path = OutputTable::new(data_dir).csv_path();
    let mut reader = csv::Reader::from_path(path)?;
    assert_eq!(reader.headers()?.len(), COLUMNS.len());
    Ok(reader.records().collect::<Result<_, _>>()?)
}

fn reject_create(platform: &InMemoryPlatform, flow_id: &str) {
    platform.fail(
        Operation::CreateTrigger,
        Some(flow_id),
        PlatformError::Rejected {
            status: 400,
            reason: "Selected table does not exist".into(),
        },
        1,
    );
}

#[tokio::test]
async fn reset_mode_keeps_going_and_reports_failures() -> Result<()> {
    let platform = project(&[("A", true), ("B", true), ("C", true)]);
    reject_create(&platform, "B");
    let dir = tempfile::tempdir()?;
    let config = config(dir.path(), &["A", "B", "C"], false)?;

    let err = flow_trigger_reset::run(client(&platform), &config, CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), 1);
    let failures = err.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].flow_id, "B");
    assert!(failures[0].reason.contains("Selected table does not exist"));

    let rows = read_rows(dir.path())?;
    let flows: Vec<(&str, &str)> = rows.iter().map(|row| (&row[0], &row[8])).collect();
    assert_eq!(flows, vec![("A", "reset"), ("C", "reset")]);
    assert!(platform.trigger("A").is_some());
    assert!(platform.trigger("C").is_some());
    Ok(())
}

#[tokio::test]
async fn both_modes_write_one_table() -> Result<()> {
    let platform = project(&[("1", true), ("2", false), ("3", true)]);
    let dir = tempfile::tempdir()?;
    let config = config(dir.path(), &["2"], true)?;

    let summary =
        flow_trigger_reset::run(client(&platform), &config, CancellationToken::new()).await?;

    assert!(summary.is_success());
    assert_eq!(platform.count(Operation::DeleteTrigger), 0);
    assert_eq!(platform.count(Operation::CreateTrigger), 1);

    let rows = read_rows(dir.path())?;
    assert_eq!(rows.len(), 3);
    let flow_two = &rows[1];
    assert_eq!(&flow_two[0], "2");
    assert_eq!(&flow_two[2], "true");
    assert_eq!(&flow_two[6], ORDERS_TABLE);
    assert_eq!(&flow_two[8], "created");
    // seeded triggers never ran, so the imported table is still pending
    assert_eq!(&rows[0][3], "pending");
    assert_eq!(&rows[0][8], "");
    assert_eq!(&rows[0][9], "2024-05-01T08:00:00+0200");
    assert_eq!(&rows[0][10], "false");

    let manifest: serde_json::Value = serde_json::from_slice(&fs::read(
        OutputTable::new(dir.path()).manifest_path(),
    )?)?;
    assert_eq!(manifest["columns"].as_array().map(Vec::len), Some(COLUMNS.len()));
    Ok(())
}

#[tokio::test]
async fn unknown_and_malformed_ids_fail_alone() -> Result<()> {
    let platform = project(&[("1", true)]);
    let dir = tempfile::tempdir()?;
    let config = config(dir.path(), &["404", "1", "bad id"], false)?;

    let err = flow_trigger_reset::run(client(&platform), &config, CancellationToken::new())
        .await
        .unwrap_err();

    let failed: Vec<&str> = err
        .failures()
        .iter()
        .map(|failure| failure.flow_id.as_str())
        .collect();
    assert_eq!(failed, vec!["404", "bad id"]);
    assert!(err.failures().iter().all(|failure| failure.reason.starts_with("[not_found]")));
    assert_eq!(read_rows(dir.path())?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn rejected_token_aborts_without_output() -> Result<()> {
    let platform = project(&[("1", true)]);
    platform.fail(
        Operation::GetFlow,
        None,
        PlatformError::Unauthorized {
            reason: "Invalid access token".into(),
        },
        1,
    );
    let dir = tempfile::tempdir()?;
    let config = config(dir.path(), &["1"], true)?;

    let err = flow_trigger_reset::run(client(&platform), &config, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::Aborted(_)));
    assert_eq!(err.exit_code(), 1);
    assert!(!OutputTable::new(dir.path()).csv_path().exists());
    assert_eq!(platform.count(Operation::ListFlows), 0);
    Ok(())
}

#[tokio::test]
async fn list_flows_returns_flows_with_trigger() -> Result<()> {
    let platform = project(&[("1", true), ("2", false), ("3", true)]);
    let dir = tempfile::tempdir()?;
    let config = config(dir.path(), &[], false)?;

    let elements = flow_trigger_reset::list_flows(client(&platform), &config).await?;

    let values: Vec<&str> = elements.iter().map(|element| element.value.as_str()).collect();
    assert_eq!(values, vec!["1", "3"]);
    assert_eq!(elements[0].label, "Flow 1");
    assert_eq!(platform.count(Operation::DeleteTrigger), 0);
    Ok(())
}

#[tokio::test]
async fn flow_detail_renders_requested_flows() -> Result<()> {
    let platform = project(&[("1", true), ("2", true)]);
    let dir = tempfile::tempdir()?;
    let config = config(dir.path(), &["2", "missing"], false)?;

    let (markdown, failures) = flow_trigger_reset::flow_detail(client(&platform), &config).await?;

    assert!(markdown.starts_with("| Flow | Trigger Last Run |"));
    assert!(markdown.contains(&format!("| **Flow 2** | never | **{ORDERS_TABLE}** |")));
    assert!(!markdown.contains("Flow 1"));
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].flow_id, "missing");
    Ok(())
}

#[tokio::test]
async fn flow_detail_requires_flow_ids() -> Result<()> {
    let platform = project(&[("1", true)]);
    let dir = tempfile::tempdir()?;
    let config = config(dir.path(), &[], false)?;

    let err = flow_trigger_reset::flow_detail(client(&platform), &config)
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::Config(_)));
    Ok(())
}
