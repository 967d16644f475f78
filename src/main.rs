use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use vizbridge::parser::spec_from_shorthand;
use vizbridge::{telemetry, translate, ApplyOutcome, BridgeConfig, DataRef, QueryOrchestrator, VisualizationSpec};

#[derive(Parser, Debug)]
#[command(name = "vizbridge")]
#[command(about = "Translate visualization specs to SQL and run them against a tabular store", long_about = None)]
struct Cli {
    /// Remote store base URL; without one, queries run in-process
    #[arg(long, global = true, env = "VIZBRIDGE_SERVER_URL")]
    server: Option<String>,

    /// JSON config file (defaults to VIZBRIDGE_* environment variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the SQL and deaggregated spec for a spec
    Translate(SpecArgs),
    /// Load a dataset and print its schema
    Load(DataArgs),
    /// Load a dataset, run a spec against it and print the result rows
    Query {
        #[command(flatten)]
        data: DataArgs,
        #[command(flatten)]
        spec: SpecArgs,
    },
}

#[derive(Args, Debug)]
struct SpecArgs {
    /// Spec JSON file, or '-' for stdin
    #[arg(long = "spec", conflicts_with = "encoding")]
    spec_file: Option<String>,

    /// Table the shorthand encoding reads from
    #[arg(long)]
    table: Option<String>,

    /// Encoding shorthand, e.g. 'x: Origin, y: mean(Horsepower)'
    #[arg(long)]
    encoding: Option<String>,

    /// Mark type recorded in a shorthand spec
    #[arg(long)]
    mark: Option<String>,
}

#[derive(Args, Debug)]
struct DataArgs {
    /// Dataset (table) name
    #[arg(long)]
    name: String,

    /// File path or http(s) URL of a JSON or CSV dataset
    #[arg(long)]
    data: String,
}

impl SpecArgs {
    fn load(&self, default_table: Option<&str>) -> Result<VisualizationSpec> {
        if let Some(path) = &self.spec_file {
            let text = read_input(path)?;
            return VisualizationSpec::from_json_str(&text).context("Failed to parse spec");
        }
        let Some(encoding) = &self.encoding else {
            bail!("either --spec or --encoding is required");
        };
        let Some(table) = self.table.as_deref().or(default_table) else {
            bail!("--table is required with --encoding");
        };
        spec_from_shorthand(table, encoding, self.mark.as_deref()).context("Failed to parse encoding")
    }
}

fn read_input(path: &str) -> Result<String> {
    if path == "-" {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read spec from stdin")?;
        Ok(text)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))
    }
}

fn resolve_config(cli: &Cli) -> Result<BridgeConfig> {
    let mut config = match &cli.config {
        Some(path) => BridgeConfig::from_file(path)?,
        None => BridgeConfig::from_env()?,
    };
    if let Some(server) = &cli.server {
        config.server_url = Some(server.clone());
    }
    Ok(config)
}

fn write_json(value: &Value) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    serde_json::to_writer_pretty(&mut handle, value).context("Failed to write output")?;
    writeln!(handle).context("Failed to write output")?;
    handle.flush().context("Failed to flush stdout")?;
    Ok(())
}

fn data_ref(args: &DataArgs) -> DataRef {
    DataRef::Url {
        url: args.data.clone(),
        name: Some(args.name.clone()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    let cli = Cli::parse();

    match &cli.command {
        Command::Translate(spec_args) => {
            let spec = spec_args.load(None)?;
            let translation = translate(&spec).context("Failed to translate spec")?;
            write_json(&json!({
                "sql": translation.query.sql,
                "spec": translation.deagg_spec.into_inner(),
            }))
        }
        Command::Load(data) => {
            let orchestrator = QueryOrchestrator::from_config(&resolve_config(&cli)?)?;
            let dataset = orchestrator
                .load_dataset(&data.name, &data_ref(data))
                .await
                .with_context(|| format!("Failed to load dataset '{}'", data.name))?;
            write_json(&serde_json::to_value(&dataset.schema)?)
        }
        Command::Query { data, spec } => {
            let orchestrator = QueryOrchestrator::from_config(&resolve_config(&cli)?)?;
            orchestrator
                .load_dataset(&data.name, &data_ref(data))
                .await
                .with_context(|| format!("Failed to load dataset '{}'", data.name))?;

            let spec = spec.load(Some(data.name.as_str()))?;
            let sql = translate(&spec)?.query.sql;
            match orchestrator.apply_spec(spec).await.context("Query failed")? {
                ApplyOutcome::Published(view) => write_json(&json!({
                    "sql": sql,
                    "spec": view.spec.clone().map(|s| s.into_inner()),
                    "rows": view.rows.as_ref(),
                })),
                ApplyOutcome::Superseded { ticket } => bail!("query {} was superseded", ticket),
            }
        }
    }
}
