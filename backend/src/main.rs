use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use clap::{self, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use metaform_core::http::{Credentials, HttpEndpoint};
use metaform_core::store::SqliteEndpoint;
use metaform_core::{EngineConfig, FormEngine, QueryEndpoint, Values};

mod error;
use error::CliError;

#[derive(clap::Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base url of the query endpoint
    #[arg(short, long, env = "METAFORM_ENDPOINT")]
    endpoint: Option<String>,

    /// Local SQLite metadata store, used instead of --endpoint
    #[arg(long, conflicts_with = "endpoint")]
    sqlite: Option<PathBuf>,

    /// Session token
    #[arg(long, env = "METAFORM_TOKEN")]
    token: Option<String>,

    /// Session user hash
    #[arg(long, env = "METAFORM_U_HASH")]
    u_hash: Option<String>,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Metadata table
    #[arg(short, long, default_value = "metabase")]
    table: String,

    /// Language id
    #[arg(long)]
    lang: Option<i64>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the resolved descriptor of a form
    Describe { form_id: String },
    /// Read the rows of a form
    Rows {
        form_id: String,
        /// Extra parameters, JSON object
        #[arg(long)]
        params: Option<String>,
    },
    /// Insert a row through the form's insert template
    Insert {
        form_id: String,
        #[arg(long)]
        values: String,
    },
    /// Update a row through the form's update template
    Update {
        form_id: String,
        #[arg(long)]
        values: String,
        /// Values before the edit, JSON object
        #[arg(long)]
        old: Option<String>,
    },
    /// Delete a row through the form's delete template
    Delete {
        form_id: String,
        #[arg(long)]
        values: String,
    },
    /// List the forms of the metadata table
    Forms,
    /// Print the main navigation
    Nav,
    /// List active languages
    Langs,
    /// Count rows of a table
    Count {
        table: String,
        #[arg(long = "where")]
        where_clause: Option<String>,
    },
    /// Largest id of a table
    LastId {
        table: String,
        #[arg(long, default_value = "id")]
        column: String,
    },
}

fn init_logging(level: Option<&str>, json: bool) {
    let filter = level
        .and_then(|l| EnvFilter::try_new(l).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn parse_values(arg: &'static str, text: Option<&str>) -> Result<Values, CliError> {
    let Some(text) = text else {
        return Ok(Values::new());
    };
    match serde_json::from_str(text).map_err(|err| CliError::InvalidJson { arg, err })? {
        Value::Object(values) => Ok(values),
        _ => Err(CliError::NotAnObject(arg)),
    }
}

fn print<T: Serialize>(value: &T) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value).map_err(metaform_core::EngineError::from)?;
    println!("{}", text);
    Ok(())
}

async fn open_endpoint(args: &Args) -> Result<Arc<dyn QueryEndpoint>, CliError> {
    if let Some(path) = &args.sqlite {
        return Ok(Arc::new(SqliteEndpoint::open(path).await?));
    }
    let base = args.endpoint.as_deref().ok_or(CliError::NoEndpoint)?;
    let credentials = Credentials {
        token: args.token.clone(),
        u_hash: args.u_hash.clone(),
    };
    Ok(Arc::new(HttpEndpoint::new(
        base,
        credentials,
        Duration::from_secs(args.timeout),
    )?))
}

async fn run(args: Args) -> Result<(), CliError> {
    let endpoint = open_endpoint(&args).await?;
    let config = EngineConfig {
        meta_table: args.table.clone(),
        ..Default::default()
    };
    let engine = FormEngine::new(endpoint, config);
    let lang = args.lang.unwrap_or(engine.config().default_lang);
    let table = engine.config().meta_table.clone();
    tracing::debug!("engine on {}", engine.endpoint().name());

    match args.command {
        Command::Describe { form_id } => {
            print(engine.describe(&table, &form_id, lang).await?.as_ref())?;
        }
        Command::Rows { form_id, params } => {
            let params = parse_values("params", params.as_deref())?;
            let form = engine.describe(&table, &form_id, lang).await?;
            print(&engine.fetch_rows(&form, &form_id, params).await?)?;
        }
        Command::Insert { form_id, values } => {
            let values = parse_values("values", Some(&values))?;
            let form = engine.describe(&table, &form_id, lang).await?;
            print(&engine.insert(&form, &values).await?)?;
        }
        Command::Update {
            form_id,
            values,
            old,
        } => {
            let values = parse_values("values", Some(&values))?;
            let old = parse_values("old", old.as_deref())?;
            let form = engine.describe(&table, &form_id, lang).await?;
            print(&engine.update(&form, &values, &old).await?)?;
        }
        Command::Delete { form_id, values } => {
            let values = parse_values("values", Some(&values))?;
            let form = engine.describe(&table, &form_id, lang).await?;
            print(&engine.delete(&form, &values).await?)?;
        }
        Command::Forms => print(&engine.forms(&table).await?)?,
        Command::Nav => print(&engine.main_nav(lang).await?)?,
        Command::Langs => print(&engine.languages().await?)?,
        Command::Count {
            table,
            where_clause,
        } => print(&engine.count(&table, where_clause.as_deref()).await?)?,
        Command::LastId { table, column } => print(&engine.last_id(&table, &column).await?)?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.log_level.as_deref(), args.log_json);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e.message());
            if let Some(sql) = e.sql() {
                eprintln!("query: {}", sql);
            }
            ExitCode::FAILURE
        }
    }
}
