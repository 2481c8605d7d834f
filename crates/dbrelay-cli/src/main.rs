//! dbrelay: run one batch of commands against a set of instances from
//! the terminal, without going through the HTTP server.
//!
//! Uses the same adapters, prechecks and dispatcher as `dbrelay-server`.

mod output;

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use colored::Colorize;
use dbrelay_core::{
    AddressResult, Backend, ClientType, ColumnarBackend, Credentials, Dispatcher, MySqlBackend,
    ProxyBackend, QueryRequest, RedisBackend,
};
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    Mysql,
    Proxy,
    Columnar,
    Redis,
}

/// Runs commands against database instances in parallel.
#[derive(Parser)]
#[command(name = "dbrelay", version, about)]
struct Args {
    /// Backend family of the target instances.
    #[arg(short, long, value_enum)]
    backend: BackendKind,

    /// Target instance as host:port. Repeat for more instances.
    #[arg(short = 'a', long = "address", required = true)]
    addresses: Vec<String>,

    /// Keep running the remaining commands after one fails.
    #[arg(short, long)]
    force: bool,

    /// Login user. Unused for password-only cache-engine AUTH.
    #[arg(short, long, env = "DBRELAY_USER", default_value = "")]
    user: String,

    /// Login password.
    #[arg(short, long, env = "DBRELAY_PASSWORD", default_value = "", hide_env_values = true)]
    password: String,

    /// Cache-engine database index.
    #[arg(long, default_value_t = 0)]
    db: u32,

    /// Seconds allowed for each connection.
    #[arg(long, default_value_t = dbrelay_core::request::DEFAULT_CONNECT_TIMEOUT_SECS)]
    connect_timeout: u64,

    /// Seconds allowed for each command.
    #[arg(long, default_value_t = dbrelay_core::request::DEFAULT_QUERY_TIMEOUT_SECS)]
    query_timeout: u64,

    /// Maximum number of instances contacted at once.
    #[arg(long, default_value_t = 200)]
    concurrency: usize,

    /// Print the raw results as JSON.
    #[arg(long)]
    json: bool,

    /// Log adapter and dispatcher activity to stderr.
    #[arg(short, long)]
    verbose: bool,

    /// Commands to run, in order. Quote each one.
    #[arg(required = true, trailing_var_arg = true)]
    commands: Vec<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.verbose { "dbrelay=debug" } else { "dbrelay=error" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    if args.concurrency == 0 {
        eprintln!("{}", "concurrency must be at least 1".red());
        return ExitCode::FAILURE;
    }

    let request = QueryRequest {
        addresses: args.addresses.clone(),
        cmds: args.commands.clone(),
        force: args.force,
        connect_timeout: args.connect_timeout,
        query_timeout: args.query_timeout,
    };
    if let Err(e) = request.validate() {
        eprintln!("{}", format!("invalid request: {e}").red());
        return ExitCode::FAILURE;
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}", format!("failed to create runtime: {e}").red());
            return ExitCode::FAILURE;
        }
    };

    let credentials = Credentials::new(args.user.clone(), args.password.clone());
    let results = rt.block_on(async {
        match args.backend {
            BackendKind::Mysql => run(MySqlBackend::new(credentials), &request, &args).await,
            BackendKind::Proxy => run(ProxyBackend::new(credentials), &request, &args).await,
            BackendKind::Columnar => run(ColumnarBackend::new(credentials), &request, &args).await,
            BackendKind::Redis => {
                let backend = RedisBackend::new(credentials)
                    .with_db(args.db)
                    .with_client_type(ClientType::Console);
                run(backend, &request, &args).await
            }
        }
    });

    if args.json {
        match serde_json::to_string_pretty(&results) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("{}", format!("failed to encode results: {e}").red());
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!("{}", output::format_results(&results));
    }

    if results.iter().any(AddressResult::has_errors) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn run<B: Backend>(backend: B, request: &QueryRequest, args: &Args) -> Vec<AddressResult> {
    let limiter = Arc::new(Semaphore::new(args.concurrency));
    Dispatcher::new(Arc::new(backend), limiter)
        .run(request)
        .await
}
