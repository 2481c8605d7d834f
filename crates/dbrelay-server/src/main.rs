mod config;
mod http;
mod metrics;
mod server;
mod tls;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dbrelay_core::redis::catalog;
use tracing::info;

use crate::config::DbRelayConfig;
use crate::http::AppState;

#[derive(Parser)]
#[command(name = "dbrelay-server", about = "remote command execution for database fleets")]
struct Args {
    /// path to TOML configuration file
    #[arg(short = 'c', long, env = "DBRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// print default configuration as TOML and exit
    #[arg(long)]
    config_template: bool,

    /// address to bind to
    #[arg(long, env = "DBRELAY_HOST")]
    host: Option<String>,

    /// port to listen on
    #[arg(short, long, env = "DBRELAY_PORT")]
    port: Option<u16>,

    /// maximum number of backend connections open at once, across all requests
    #[arg(long, env = "DBRELAY_CONCURRENCY")]
    concurrency: Option<usize>,

    /// largest accepted request body in bytes
    #[arg(long, env = "DBRELAY_MAX_REQUEST_BYTES")]
    max_request_bytes: Option<usize>,

    /// disable the prometheus /metrics route
    #[arg(long, env = "DBRELAY_NO_METRICS")]
    no_metrics: bool,

    // -- backend credentials --
    #[arg(long, env = "DBRELAY_MYSQL_USER")]
    mysql_user: Option<String>,

    #[arg(long, env = "DBRELAY_MYSQL_PASSWORD", hide_env_values = true)]
    mysql_password: Option<String>,

    #[arg(long, env = "DBRELAY_PROXY_USER")]
    proxy_user: Option<String>,

    #[arg(long, env = "DBRELAY_PROXY_PASSWORD", hide_env_values = true)]
    proxy_password: Option<String>,

    #[arg(long, env = "DBRELAY_COLUMNAR_USER")]
    columnar_user: Option<String>,

    #[arg(long, env = "DBRELAY_COLUMNAR_PASSWORD", hide_env_values = true)]
    columnar_password: Option<String>,

    /// default cache-engine password. requests may bring their own
    #[arg(long, env = "DBRELAY_REDIS_PASSWORD", hide_env_values = true)]
    redis_password: Option<String>,

    // -- TLS options --
    /// port for TLS connections. when set, enables TLS alongside plain HTTP
    #[arg(long, env = "DBRELAY_TLS_PORT")]
    tls_port: Option<u16>,

    /// path to server certificate file (PEM format)
    #[arg(long, env = "DBRELAY_TLS_CERT_FILE")]
    tls_cert_file: Option<String>,

    /// path to server private key file (PEM format)
    #[arg(long, env = "DBRELAY_TLS_KEY_FILE")]
    tls_key_file: Option<String>,

    /// path to CA certificate for client verification (enables mTLS)
    #[arg(long, env = "DBRELAY_TLS_CA_CERT_FILE")]
    tls_ca_cert_file: Option<String>,

    /// require client certificates when a CA cert is configured.
    /// accepts: yes, no
    #[arg(long, env = "DBRELAY_TLS_AUTH_CLIENTS")]
    tls_auth_clients: Option<String>,
}

/// Applies CLI and env overrides on top of the file config. Only values
/// that were actually given take effect.
fn apply_args(cfg: &mut DbRelayConfig, args: &Args) {
    if let Some(ref host) = args.host {
        cfg.bind = host.clone();
    }
    if let Some(port) = args.port {
        cfg.port = port;
    }
    if let Some(n) = args.concurrency {
        cfg.concurrency = n;
    }
    if let Some(n) = args.max_request_bytes {
        cfg.max_request_bytes = n;
    }
    if args.no_metrics {
        cfg.metrics = false;
    }

    let creds = &mut cfg.credentials;
    for (value, slot) in [
        (&args.mysql_user, &mut creds.mysql.user),
        (&args.mysql_password, &mut creds.mysql.password),
        (&args.proxy_user, &mut creds.proxy.user),
        (&args.proxy_password, &mut creds.proxy.password),
        (&args.columnar_user, &mut creds.columnar.user),
        (&args.columnar_password, &mut creds.columnar.password),
        (&args.redis_password, &mut creds.redis.password),
    ] {
        if let Some(v) = value {
            *slot = v.clone();
        }
    }

    if let Some(port) = args.tls_port {
        cfg.tls_port = port;
    }
    if let Some(ref v) = args.tls_cert_file {
        cfg.tls_cert_file = v.clone();
    }
    if let Some(ref v) = args.tls_key_file {
        cfg.tls_key_file = v.clone();
    }
    if let Some(ref v) = args.tls_ca_cert_file {
        cfg.tls_ca_cert_file = v.clone();
    }
    if let Some(ref v) = args.tls_auth_clients {
        cfg.tls_auth_clients = v.clone();
    }
}

/// Prints `msg` to stderr and exits with code 1.
fn exit_err(msg: impl std::fmt::Display) -> ! {
    eprintln!("{msg}");
    std::process::exit(1);
}

/// Parses a `host:port` pair into a `SocketAddr`. Exits with a message on failure.
fn parse_bind_addr(host: &str, port: u16, label: &str) -> SocketAddr {
    match format!("{host}:{port}").parse() {
        Ok(a) => a,
        Err(e) if label.is_empty() => exit_err(format!("invalid bind address '{host}:{port}': {e}")),
        Err(e) => exit_err(format!("invalid {label} bind address '{host}:{port}': {e}")),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dbrelay=info".into()),
        )
        .init();

    let args = Args::parse();

    if args.config_template {
        match DbRelayConfig::default().to_toml() {
            Ok(toml) => {
                println!("{toml}");
                std::process::exit(0);
            }
            Err(e) => exit_err(format!("failed to generate config template: {e}")),
        }
    }

    let mut cfg = match &args.config {
        Some(path) => DbRelayConfig::from_file(path).unwrap_or_else(|e| exit_err(e)),
        None => DbRelayConfig::default(),
    };
    apply_args(&mut cfg, &args);
    cfg.validate().unwrap_or_else(|e| exit_err(e));

    let addr = parse_bind_addr(&cfg.bind, cfg.port, "");

    let tls = match tls::TlsConfig::from_config(&cfg).unwrap_or_else(|e| exit_err(e)) {
        Some(tls_config) => {
            let tls_port = cfg.tls_port;
            let tls_addr = parse_bind_addr(&cfg.bind, tls_port, "TLS");
            let acceptor = tls::load_tls_acceptor(&tls_config)
                .unwrap_or_else(|e| exit_err(format!("failed to load TLS config: {e}")));
            info!(tls_port, cert = %tls_config.cert_file, "TLS enabled");
            Some((tls_addr, acceptor))
        }
        None => None,
    };

    // build the command table before the first request needs it
    let commands = catalog::init();
    info!("cache-engine catalog loaded: {commands} commands");

    let metrics_handle = if cfg.metrics {
        match metrics::install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => exit_err(e),
        }
    } else {
        None
    };

    let state = Arc::new(AppState::new(&cfg, metrics_handle));

    if let Err(e) = server::run(addr, tls, state).await {
        eprintln!("server error: {e}");
        std::process::exit(1);
    }
}
