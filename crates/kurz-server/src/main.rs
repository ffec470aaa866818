use kurz_server::app::App;
use kurz_server::config;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = config::load()?;
    info!(
        server_address = %config.server_address,
        base_url = %config.base_url,
        grpc_address = %config.grpc_address,
        "starting kurz"
    );

    App::new(config).run().await
}
