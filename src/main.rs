use maibel_eval::infrastructure::config::Settings;
use maibel_eval::infrastructure::db::init_db;
use maibel_eval::interfaces::http::{start_server, state::AppState};
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::load()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
    let pool = init_db(&settings.database_url)
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?;

    info!(host = %settings.host, port = settings.port, "Starting Maibel eval server");

    let state = Arc::new(AppState::new(settings, pool));
    let logs = Arc::new(Mutex::new(Vec::new()));
    start_server(state, logs)?.await
}
