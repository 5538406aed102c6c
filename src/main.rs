use anyhow::Result;
use clap::{Parser, Subcommand};
use query_gateway::config::GatewayConfig;
use query_gateway::gateway::{GatewayRequest, QueryGateway};
use query_gateway::server;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "query-gateway")]
#[command(about = "Conversational SQL gateway with confirmation for mutating statements")]
struct Args {
    /// Dataset used when a request does not name one
    #[arg(long, global = true)]
    dataset: Option<String>,

    /// SQLite file for pending operations (in-memory when omitted)
    #[arg(long, global = true)]
    pending_db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP listener
    Serve {
        /// Address to bind, e.g. 0.0.0.0:8080
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Run a single prompt and print the reply
    Ask {
        /// The request in natural language, or the confirmation keyword
        prompt: String,

        #[arg(short, long)]
        session: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("query_gateway=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = GatewayConfig::from_env()?;
    if let Some(dataset) = args.dataset {
        config.default_dataset = dataset;
    }
    if let Some(path) = args.pending_db {
        config.pending_db = Some(path);
    }
    config.validate()?;

    match args.command {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            let bind_addr = config.bind_addr.clone();
            let gateway = Arc::new(QueryGateway::from_config(config)?);
            server::serve(gateway, &bind_addr).await?;
        }
        Command::Ask { prompt, session } => {
            let gateway = QueryGateway::from_config(config)?;
            let mut request = GatewayRequest::new(prompt);
            request.session_id = session;

            info!("Running one-shot request");
            let response = gateway.handle(request).await?;
            println!("{}", response.reply);
        }
    }

    Ok(())
}
