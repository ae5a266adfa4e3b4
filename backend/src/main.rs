use backend::config::RelayConfig;
use backend::start_server;

#[tokio::main]
async fn main() {
    start_server(RelayConfig::from_env()).await;
}
