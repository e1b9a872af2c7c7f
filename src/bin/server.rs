use std::{
    env,
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use axum_server::Handle;
use clap::Parser;
use rusqlite::Connection;

use banksync::{
    AesGcmCipher, AppState, SyncConfig, add_tracing_layer, build_router, graceful_shutdown,
    setup_logging,
};

/// The webhook receiver for banksync.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to the application SQLite database.
    #[arg(long)]
    db_path: String,

    /// The address to listen on.
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// The port to serve the API from.
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// The base URL of the bank's API.
    #[arg(long)]
    base_url: Option<String>,
}

#[tokio::main]
async fn main() {
    setup_logging().expect("Could not set up logging");

    let args = Args::parse();

    let addr = SocketAddr::from((args.host, args.port));

    let token_secret =
        env::var("TOKEN_SECRET").expect("The environment variable 'TOKEN_SECRET' must be set");
    let webhook_secret = env::var("WEBHOOK_SECRET").ok();

    if webhook_secret.as_deref().is_none_or(str::is_empty) {
        tracing::warn!("WEBHOOK_SECRET is not set, webhook signatures will not be verified");
    }

    let mut config = SyncConfig::default().with_webhook_secret(webhook_secret);
    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }

    let conn = Connection::open(&args.db_path).expect("Could not open the database");
    let state = AppState::new(conn, Arc::new(AesGcmCipher::new(&token_secret)), config)
        .expect("Could not initialize the database");

    let handle = Handle::new();
    tokio::spawn(graceful_shutdown(handle.clone()));

    let router = add_tracing_layer(build_router(state));

    tracing::info!("HTTP server listening on {}", addr);
    axum_server::bind(addr)
        .handle(handle)
        .serve(router.into_make_service())
        .await
        .unwrap();
}
