use anyhow::Result;
use axum::Router;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};
use sticker_keywords_server::build_app;
use tokio::net::TcpListener;

#[derive(Parser)]
struct Args {
    /// Working directory holding tdata/sticker_keywords.json
    #[arg(long, default_value = ".")]
    workdir: PathBuf,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let app: Router = build_app(args.workdir.clone())?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, workdir = %args.workdir.display(), "keywords server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
