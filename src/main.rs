use chronotheus::server::CliArgs;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse_args();

    let filter = if args.debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chronotheus=debug"))
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("chronotheus {}", env!("CARGO_PKG_VERSION"));
    tracing::info!(listen = %args.listen, debug = args.debug, "starting proxy");

    let app = chronotheus::server::build_app()?;
    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
