//! rackd — the rack daemon.
//!
//! Single binary with three modes:
//! - `api` — serve the HTTP/WebSocket API over a provider
//! - `router` — run the hostname router
//! - `build` — run one build as a child process and exit
//!
//! # Usage
//!
//! ```text
//! rackd api --port 5443 --password secret
//! rackd router --cidr 10.42.0.0/16
//! rackd build --app app1 --id BABCDEFGHIJ --url object://app1/src.tgz
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use rack_build::{Builder, LogWriter, Options, Runtime, ShellExec};
use rack_provider::{MockProvider, Provider};
use rack_router::{RouterConfig, ShellInterface};
use tracing::error;

#[derive(Parser)]
#[command(name = "rackd", about = "Rack control plane daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the API.
    Api {
        /// Port to listen on.
        #[arg(long, default_value = "5443")]
        port: u16,

        /// Rack password; omit to leave the rack open.
        #[arg(long, env = "RACK_PASSWORD")]
        password: Option<String>,

        /// Provider backend.
        #[arg(long, env = "RACK_PROVIDER", default_value = "mock")]
        provider: String,
    },

    /// Run the router.
    Router {
        #[arg(long, default_value = "10.42.0.0/16")]
        cidr: String,

        #[arg(long, default_value = "convox")]
        domain: String,

        #[arg(long, default_value = "/var/lib/rack-router")]
        data_dir: PathBuf,

        /// Upstream resolver for passthrough queries.
        #[arg(long, default_value = "8.8.8.8:53")]
        dns_upstream: String,

        #[arg(long, default_value = "vrack0")]
        iface: String,
    },

    /// Run one build and exit non-zero on failure.
    Build(BuildArgs),
}

/// Flags mirror the `BUILD_*` environment; flags win when both are set.
#[derive(Args)]
struct BuildArgs {
    #[arg(long, env = "BUILD_APP")]
    app: String,

    #[arg(long, env = "BUILD_AUTH", default_value = "{}")]
    auth: String,

    #[arg(long, env = "BUILD_DEVELOPMENT")]
    development: bool,

    #[arg(long, env = "BUILD_GENERATION", default_value = "2")]
    generation: String,

    #[arg(long, env = "BUILD_ID")]
    id: String,

    #[arg(long, env = "BUILD_MANIFEST")]
    manifest: Option<String>,

    #[arg(long, env = "BUILD_PUSH")]
    push: Option<String>,

    #[arg(long, env = "BUILD_RACK")]
    rack: String,

    #[arg(long = "url", env = "BUILD_URL")]
    source: String,

    #[arg(long)]
    no_cache: bool,

    #[arg(long, default_value = "default")]
    runtime: Runtime,

    #[arg(long, env = "RACK_PROVIDER", default_value = "mock")]
    provider: String,
}

fn provider_from_name(name: &str) -> anyhow::Result<Arc<dyn Provider>> {
    match name {
        "mock" => Ok(Arc::new(MockProvider::new())),
        other => anyhow::bail!("unknown provider: {other}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rackd=debug,rack=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Api {
            port,
            password,
            provider,
        } => {
            let provider = provider_from_name(&provider)?;
            let server = rack_api::Server::new(provider, password).await?;
            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            server.serve(addr).await
        }

        Command::Router {
            cidr,
            domain,
            data_dir,
            dns_upstream,
            iface,
        } => {
            let config = RouterConfig {
                cidr,
                domain,
                data_dir,
                dns_upstream,
                iface,
            };
            rack_router::run(config, Arc::new(ShellInterface)).await
        }

        Command::Build(args) => {
            let provider = provider_from_name(&args.provider)?;
            let opts = Options {
                app: args.app,
                auth: args.auth,
                cache: !args.no_cache,
                development: args.development,
                generation: args.generation,
                id: args.id,
                manifest: args.manifest,
                push: args.push,
                rack: args.rack,
                source: args.source,
                runtime: args.runtime,
                ..Default::default()
            };
            let logs = LogWriter::with_sink(Box::new(std::io::stdout()));
            let builder = Builder::new(provider, Arc::new(ShellExec), opts, logs);
            if let Err(e) = builder.execute().await {
                error!(error = %e, "build failed");
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
