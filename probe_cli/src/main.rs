//! Endpoint probe front-end.

mod password;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use probe_core::credentials::{
    PASSWORD_ENV, PASSWORD_PROMPT, SecretLocation, SecretStoreCredentialProvider,
    StaticCredentialProvider,
};
use probe_core::database::PgDriver;
use probe_core::invocation;
use probe_core::logging::{self, LoggingConfig};
use probe_core::object_store::S3ObjectStore;
use probe_core::query_source::{self, PGBENCH_QUERY, VOLUME_QUERY};
use probe_core::report::{CsvResultSink, FanOutSink, write_summary};
use probe_core::secret_store::AwsSecretStore;
use probe_core::{
    ConnectParams, ConnectionProbe, ConsoleSink, CredentialProvider, Credentials,
    ObjectStoreQuerySource, OutputFormat, ProbeConfig, ProbeLoop, WarmingEvent, WarmingHandler,
    WarmingSettings, Workload,
};
use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "endpoint_probe")]
#[command(about = "Measures connect and query latency of a PostgreSQL endpoint")]
struct Cli {
    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Log to stderr as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Probe the endpoint repeatedly for the configured window
    Probe(ProbeArgs),
    /// Run every statement of the newest export once against one endpoint
    Warm(WarmArgs),
}

#[derive(Args)]
struct ProbeArgs {
    /// TOML file with [connection], [test] and optionally [s3]
    #[arg(short, long, default_value = "probe.toml")]
    config: PathBuf,

    /// Built-in statement to run
    #[arg(long, value_enum, conflicts_with_all = ["sql", "from_s3"])]
    query: Option<BuiltinQuery>,

    /// Statement to run instead of a built-in one
    #[arg(long, conflicts_with = "from_s3")]
    sql: Option<String>,

    /// Take the statement from the newest CSV export under [s3]
    #[arg(long)]
    from_s3: bool,

    /// Run every statement of the export in each cycle
    #[arg(long, requires = "from_s3")]
    bulk: bool,

    /// Secrets Manager secret holding username and password
    #[arg(long)]
    secret_id: Option<String>,

    /// Region of the secret
    #[arg(long)]
    region: Option<String>,

    /// Print one JSON object per record
    #[arg(long)]
    json: bool,

    /// Also write every record to this CSV file
    #[arg(long)]
    results_csv: Option<PathBuf>,
}

#[derive(Args)]
struct WarmArgs {
    /// Event JSON file; read from stdin when omitted
    #[arg(long)]
    event: Option<PathBuf>,
}

#[derive(Clone, Copy, Default, ValueEnum)]
enum BuiltinQuery {
    #[default]
    Volume,
    Pgbench,
}

impl BuiltinQuery {
    fn statement(self) -> &'static str {
        match self {
            BuiltinQuery::Volume => VOLUME_QUERY,
            BuiltinQuery::Pgbench => PGBENCH_QUERY,
        }
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("ERROR: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(LoggingConfig::new(cli.log_file, true, cli.json_logs))?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    match cli.command {
        Command::Probe(args) => runtime.block_on(probe(args)),
        Command::Warm(args) => runtime.block_on(warm(args)),
    }
}

async fn probe(args: ProbeArgs) -> anyhow::Result<()> {
    let config = ProbeConfig::load(&args.config, args.from_s3)?;
    let workload = resolve_workload(&args, &config).await?;
    let credentials = resolve_credentials(&args, &config).await?;
    let params = ConnectParams::from_config(&config, &credentials);

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let format = if args.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };
    let mut sink = FanOutSink::default();
    sink.push(ConsoleSink::stdout(format));
    if let Some(path) = &args.results_csv {
        let csv = CsvResultSink::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        sink.push(csv);
    }

    let probe_loop = ProbeLoop::new(ConnectionProbe::new(PgDriver, params), config.interval)
        .with_cancellation(cancel);
    let summary = probe_loop
        .run_windowed(&workload, config.duration, &mut sink)
        .await;

    // Keep stdout parseable in JSON mode.
    if args.json {
        write_summary(&summary, &mut std::io::stderr())?;
    } else {
        write_summary(&summary, &mut std::io::stdout())?;
    }
    Ok(())
}

async fn resolve_workload(args: &ProbeArgs, config: &ProbeConfig) -> anyhow::Result<Workload> {
    if args.from_s3 {
        let location = config
            .object_store
            .as_ref()
            .context("[s3] bucket and prefix are required with --from-s3")?;
        let source = ObjectStoreQuerySource::new(S3ObjectStore::from_env().await);
        if args.bulk {
            return Ok(Workload::Bulk(source.resolve_bulk(location).await?));
        }
        return Ok(Workload::Single(source.resolve_best(location).await?.text));
    }

    let statement = match &args.sql {
        Some(sql) => sql.as_str(),
        None => args.query.unwrap_or_default().statement(),
    };
    Ok(Workload::Single(query_source::resolve_static(statement)?))
}

async fn resolve_credentials(
    args: &ProbeArgs,
    config: &ProbeConfig,
) -> anyhow::Result<Credentials> {
    if args.secret_id.is_some() || args.region.is_some() {
        let location = SecretLocation::from_options(args.secret_id.clone(), args.region.clone())?;
        let store = AwsSecretStore::for_region(&location.region).await;
        let provider = SecretStoreCredentialProvider::new(store, location.secret_id);
        return Ok(provider.resolve().await?);
    }

    let env_password = std::env::var(PASSWORD_ENV).ok();
    let provider = if env_password.is_none() && std::io::stdin().is_terminal() {
        let password = password::prompt_hidden(PASSWORD_PROMPT, &mut std::io::stderr())
            .context("Failed to read the database password")?;
        StaticCredentialProvider::new(Credentials::new(&config.user, password))
    } else {
        StaticCredentialProvider::from_env_or_prompt(
            &config.user,
            env_password,
            &mut std::io::stdin().lock(),
            &mut std::io::stderr(),
        )?
    };
    Ok(provider.resolve().await?)
}

fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping after the current cycle");
            cancel.cancel();
        }
    });
}

async fn warm(args: WarmArgs) -> anyhow::Result<()> {
    let event = read_event(args.event.as_deref())?;

    let response = match WarmingSettings::from_env() {
        Ok(settings) => {
            let secrets = AwsSecretStore::for_region(&settings.region).await;
            let credentials =
                SecretStoreCredentialProvider::new(secrets, settings.secret_id.clone());
            let store = S3ObjectStore::from_env().await;
            WarmingHandler::new(PgDriver, credentials, store, settings)
                .handle(&event)
                .await
        }
        Err(e) => invocation::reject(&event, &e),
    };

    println!("{}", serde_json::to_string(&response)?);
    anyhow::ensure!(
        response.is_success(),
        "warming failed with status {}",
        response.status_code
    );
    Ok(())
}

fn read_event(path: Option<&Path>) -> anyhow::Result<WarmingEvent> {
    let text = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read event file {}", path.display()))?,
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read event from stdin")?;
            text
        }
    };
    serde_json::from_str(&text).context("Event is not valid JSON")
}
