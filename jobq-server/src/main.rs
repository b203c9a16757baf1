use envconfig::Envconfig;
use eyre::Result;

use jobq_server::config::Config;
use jobq_server::server;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");

    server::run(config).await
}
