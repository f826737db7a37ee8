use mock_server::{AppState, MockConfig};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "54321".to_string());
    let config = MockConfig {
        require_email_confirmation: std::env::var("MOCK_REQUIRE_CONFIRMATION").is_ok_and(|v| v == "1" || v == "true"),
    };
    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, confirmation = config.require_email_confirmation, "mock backend listening");
    mock_server::run_with(listener, AppState::new(config)).await
}
