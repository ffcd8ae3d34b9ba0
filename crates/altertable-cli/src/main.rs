use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dbt_altertable::{
    AltertableAdapter, AltertableCredentials, DuckdbConnector, ProfileLoader, TargetConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CONN: &str = "master";

#[derive(Parser)]
#[command(name = "dbt-altertable")]
#[command(version, about = "dbt-altertable Command Line Tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory containing profiles.yml
    #[arg(long, global = true)]
    profiles_dir: Option<PathBuf>,

    /// dbt project directory (dbt_project.yml names the profile)
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    /// Profile to load (overrides dbt_project.yml)
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Target inside the profile (overrides the profile default)
    #[arg(short, long, global = true)]
    target: Option<String>,

    /// Use an embedded DuckDB database (file path or :memory:) instead of Flight SQL
    #[arg(long, global = true, value_name = "PATH")]
    local: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the profile and test the connection
    Debug,

    /// Run a SQL statement
    Query {
        /// SQL to execute
        #[arg(value_name = "SQL")]
        sql: String,

        /// Print rows as JSON
        #[arg(long)]
        json: bool,
    },

    /// List schemas in the target database
    Schemas,

    /// List tables and views in a schema
    Relations {
        /// Schema (defaults to the target schema)
        #[arg(short, long)]
        schema: Option<String>,
    },

    /// List columns of a relation
    Columns {
        /// Table or view name
        #[arg(value_name = "IDENTIFIER")]
        identifier: String,

        /// Schema (defaults to the target schema)
        #[arg(short, long)]
        schema: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "debug"
    } else {
        "warn,dbt_altertable=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    dotenvy::dotenv().ok();

    let invocation_id = uuid::Uuid::new_v4();
    tracing::debug!(invocation_id = %invocation_id, "Starting dbt-altertable");

    let (adapter, target) = build_adapter(&cli)?;

    let result = run(&cli, &adapter, target.as_ref()).await;
    adapter.connections().cleanup_all().await;
    result
}

/// Build the adapter from the profile, or from the embedded engine with `--local`.
fn build_adapter(cli: &Cli) -> Result<(AltertableAdapter, Option<TargetConfig>)> {
    let loader = ProfileLoader::new()
        .with_profiles_dir(cli.profiles_dir.clone())
        .with_project_dir(cli.project_dir.clone())
        .with_profile(cli.profile.clone())
        .with_target(cli.target.clone());

    let Some(location) = cli.local.as_deref() else {
        let target = loader.load().context("Failed to load dbt profile")?;
        tracing::info!(
            profile = %target.profile_name,
            target = %target.target_name,
            uri = %target.credentials.flight_uri(),
            "Loaded profile"
        );
        return Ok((AltertableAdapter::from_target(&target), Some(target)));
    };

    let connector = DuckdbConnector::from_location(location)
        .with_context(|| format!("Failed to open DuckDB database '{}'", location))?;
    let catalog = connector.catalog_name();

    // A profile is optional locally; the database is always the DuckDB catalog
    match loader.load() {
        Ok(mut target) => {
            target.credentials.database = catalog;
            let adapter = AltertableAdapter::with_connector(&target, Arc::new(connector));
            Ok((adapter, Some(target)))
        }
        Err(e) => {
            tracing::debug!(error = %e, "No usable profile, using embedded defaults");
            let credentials = AltertableCredentials::new("local", "", catalog, "main");
            Ok((AltertableAdapter::new(credentials, Arc::new(connector)), None))
        }
    }
}

async fn run(cli: &Cli, adapter: &AltertableAdapter, target: Option<&TargetConfig>) -> Result<()> {
    let credentials = adapter.credentials();

    match &cli.command {
        Commands::Debug => {
            match target {
                Some(target) => {
                    println!("Profile: {}", target.profile_name);
                    println!("Target: {}", target.target_name);
                    println!("Threads: {}", target.threads);
                }
                None => println!("Profile: (none)"),
            }
            println!("Connection:");
            println!("  type: {}", credentials.type_name());
            println!("  engine: {}", adapter.connections().connector_name());
            for (key, value) in credentials.connection_info() {
                println!("  {}: {}", key, value);
            }

            adapter
                .debug_query(CONN)
                .await
                .context("Connection test failed")?;
            println!("Connection test: [OK connection ok]");
            println!("All checks passed!");
        }

        Commands::Query { sql, json } => {
            let (response, table) = adapter
                .execute(CONN, sql, true)
                .await
                .context("Query failed")?;

            if *json {
                println!("{}", serde_json::to_string_pretty(&table.to_objects())?);
            } else {
                if !table.columns.is_empty() {
                    print!("{}", table);
                }
                let elapsed = response.elapsed_ms.unwrap_or(0);
                println!("{} ({} rows, {} ms)", response, table.row_count(), elapsed);
            }
        }

        Commands::Schemas => {
            let schemas = adapter
                .list_schemas(CONN, &credentials.database)
                .await
                .context("Failed to list schemas")?;
            for schema in schemas {
                println!("{}", schema);
            }
        }

        Commands::Relations { schema } => {
            let schema = schema.as_deref().unwrap_or(&credentials.schema);
            let relations = adapter
                .list_relations(CONN, &credentials.database, schema)
                .await
                .context("Failed to list relations")?;

            if relations.is_empty() {
                println!("No relations found in {}.{}", credentials.database, schema);
            }
            for relation in relations {
                let kind = relation.kind.map(|k| k.to_string()).unwrap_or_else(|| "unknown".to_string());
                println!("{:<8} {}", kind, relation);
            }
        }

        Commands::Columns { identifier, schema } => {
            let schema = schema.as_deref().unwrap_or(&credentials.schema);
            let relation = adapter.relation(&credentials.database, schema, identifier);
            let columns = adapter
                .get_columns_in_relation(CONN, &relation)
                .await
                .with_context(|| format!("Failed to get columns for {}", relation))?;

            if columns.is_empty() {
                anyhow::bail!("Relation {} not found or has no columns", relation);
            }
            let width = columns.iter().map(|c| c.name.len()).max().unwrap_or(0);
            for column in columns {
                println!("{:<width$}  {}", column.name, column.data_type(), width = width);
            }
        }
    }

    Ok(())
}
