use std::path::PathBuf;

use clap::{Parser, Subcommand};
use flow_trigger_reset::{Environment, Overrides, RunConfig, RunError, telemetry};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "flow-trigger-reset", version, about)]
struct Cli {
    /// Data directory holding config.json and out/tables (default: $KBC_DATADIR or ./data)
    #[arg(long, value_name = "DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Platform URL (default: $KBC_URL)
    #[arg(long, value_name = "URL", global = true)]
    url: Option<String>,

    /// Flow configuration id to reset; repeat for several flows
    #[arg(long = "flow-id", value_name = "ID", global = true)]
    flow_ids: Vec<String>,

    /// Also write every flow with its trigger status to the output table
    #[arg(long, global = true)]
    output_list_flows: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Default, Subcommand)]
enum Command {
    /// Reset triggers and/or write the flows_with_trigger table (default)
    #[default]
    Run,
    /// Print flows that have a trigger as JSON select elements
    ListFlows,
    /// Print a Markdown table of the requested flows' triggers
    FlowDetail,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            data_dir: self.data_dir.clone(),
            url: self.url.clone(),
            flow_ids: self.flow_ids.clone(),
            output_list_flows: self.output_list_flows,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = RunConfig::load(&Environment::from_env(), &cli.overrides());
    telemetry::init(config.as_ref().is_ok_and(RunConfig::debug));

    let result = match config {
        Ok(config) => dispatch(cli.command.unwrap_or_default(), config).await,
        Err(err) => Err(RunError::Config(err)),
    };
    if let Err(err) = result {
        for failure in err.failures() {
            tracing::error!(flow_id = %failure.flow_id, reason = %failure.reason, "flow failed");
        }
        tracing::error!(error = %err, "flow-trigger-reset failed");
        std::process::exit(err.exit_code());
    }
}

async fn dispatch(command: Command, config: RunConfig) -> Result<(), RunError> {
    let client = flow_trigger_reset::connect(&config)?;
    match command {
        Command::Run => {
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received; stopping after the current flow");
                    on_interrupt.cancel();
                }
            });
            let summary = flow_trigger_reset::run(client, &config, cancel).await?;
            tracing::info!(rows = summary.rows.len(), "run finished");
        }
        Command::ListFlows => {
            let elements = flow_trigger_reset::list_flows(client, &config).await?;
            let json = serde_json::to_string_pretty(&elements)
                .map_err(|err| RunError::Internal(err.into()))?;
            println!("{json}");
        }
        Command::FlowDetail => {
            let (markdown, failures) = flow_trigger_reset::flow_detail(client, &config).await?;
            print!("{markdown}");
            if !failures.is_empty() {
                return Err(RunError::FlowsFailed {
                    failures,
                    cancelled: false,
                });
            }
        }
    }
    Ok(())
}
