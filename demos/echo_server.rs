//! Echo Server - small BERT-RPC service.
//!
//! This example demonstrates:
//! - Building a server with the builder pattern
//! - Registering modules of async functions
//! - Returning application faults as wire errors
//! - A logging middleware
//!
//! # Running
//!
//! ```text
//! RUST_LOG=debug cargo run --example echo_server -- --port 2133
//! ```
//!
//! Then send `{call, echo, echo, [<<"hello">>]}` from any BERT-RPC client
//! and expect `{reply, [<<"hello">>]}`.

use std::path::PathBuf;
use std::time::Duration;

use bertlet::codec::Term;
use bertlet::fault::Fault;
use bertlet::handler::{Middleware, Module, PreHook};
use bertlet::protocol::CallRequest;
use bertlet::{Server, ServerConfig};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// BERT-RPC echo and math server.
#[derive(Parser, Debug)]
#[command(name = "echo_server")]
#[command(about = "Serve demo BERT-RPC modules")]
struct Cli {
    /// JSON configuration file; BERTLET_* variables override it.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen host.
    #[arg(long)]
    host: Option<String>,

    /// Listen port.
    #[arg(short, long)]
    port: Option<u16>,

    /// PEM certificate chain (requires --tls-key).
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key (requires --tls-cert).
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Compress negotiated responses from this many bytes.
    #[arg(long)]
    gzip_threshold: Option<usize>,

    /// Per-call timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

/// Logs every request before dispatch.
struct AccessLog;

impl Middleware for AccessLog {
    fn process_request(&self, request: CallRequest) -> Result<PreHook, Fault> {
        info!(
            kind = request.kind.as_str(),
            module = %request.module,
            function = %request.function,
            peer = ?request.peer,
            "request"
        );
        Ok(PreHook::Continue(request))
    }
}

fn echo_module() -> Module {
    Module::new("demo.echo")
        .function("echo", |args: Vec<Term>| async move { Ok(Term::list(args)) })
        .function("sleep", |args: Vec<Term>| async move {
            let ms = args.first().and_then(Term::as_integer).unwrap_or(0).max(0);
            tokio::time::sleep(Duration::from_millis(ms as u64)).await;
            Ok(Term::atom("ok"))
        })
}

fn math_module() -> Module {
    Module::new("demo.math")
        .function("add", |args: Vec<Term>| async move {
            args.iter()
                .try_fold(0i64, |acc, arg| match arg {
                    Term::Integer(n) => acc.checked_add(*n),
                    _ => None,
                })
                .map(Term::from)
                .ok_or_else(|| Fault::new("ArithmeticError", "add takes integers that fit in i64"))
        })
        .function("double", |args: Vec<Term>| async move {
            match args.as_slice() {
                [Term::Integer(n)] => Ok(Term::from(n.saturating_mul(2))),
                _ => Err(Fault::new("TypeError", "double takes one integer")),
            }
        })
        .function("div", |args: Vec<Term>| async move {
            match args.as_slice() {
                [Term::Integer(_), Term::Integer(0)] => {
                    Err(Fault::new("ZeroDivisionError", "integer division by zero"))
                }
                [Term::Integer(a), Term::Integer(b)] => Ok(Term::from(a / b)),
                _ => Err(Fault::new("TypeError", "div takes two integers")),
            }
        })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_json_file(path)?,
        None => ServerConfig::from_env()?,
    };
    if let Some(host) = cli.host {
        config = config.with_host(host);
    }
    if let Some(port) = cli.port {
        config = config.with_port(port);
    }
    if let (Some(cert), Some(key)) = (cli.tls_cert, cli.tls_key) {
        config = config.with_tls(bertlet::TlsConfig::new(cert, key));
    }
    if let Some(threshold) = cli.gzip_threshold {
        config = config.with_gzip_threshold(threshold);
    }
    if let Some(ms) = cli.timeout_ms {
        config = config.with_call_timeout(Some(Duration::from_millis(ms)));
    }

    let bound = Server::builder()
        .config(config)
        .middleware(AccessLog)
        .register(echo_module())
        .register(math_module())
        .build()
        .bind()
        .await?;

    info!(addr = %bound.local_addr()?, "serving modules: {:?}", bound.registry().names());
    bound.run().await?;

    info!("stopped");
    Ok(())
}
