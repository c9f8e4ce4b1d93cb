use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use tracing::Level;
use viessmann_iot::authenticator::HttpAuthenticator;
use viessmann_iot::credential_store::FileCredentialStore;
use viessmann_iot::http::client::HttpClient;
use viessmann_iot::node::ApiNode;
use viessmann_iot::parameters::{Commands, ConnectionArgs};
use viessmann_iot::token_manager::TokenManager;

#[derive(Parser, Debug)]
#[command(name = "viessmann-cli", about = "Query and control Viessmann heating devices")]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let level = if cli.connection.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let http_config = cli.connection.http_config()?;
    let http_client =
        HttpClient::new(&http_config).map_err(|e| format!("error creating http client: {}", e))?;

    let manager = TokenManager::try_new(
        cli.connection.auth_settings(),
        HttpAuthenticator::new(http_client.clone(), cli.connection.token_url()?),
        FileCredentialStore::new(&cli.connection.credentials),
    )?;

    let node = ApiNode::new(
        cli.command.node_kind(),
        Some(Arc::new(manager)),
        cli.connection.api_settings()?,
        http_client,
    );

    let out = node.handle(cli.command.message())?;
    println!("{}", serde_json::to_string_pretty(&out["payload"])?);
    Ok(())
}
