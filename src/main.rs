use anyhow::Result;
use popcorn::config::{OmdbConfig, ServerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,popcorn=info,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).compact().init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_file = dotenvy::dotenv().ok();
    init_tracing();
    if let Some(path) = env_file {
        info!("Loaded environment from {:?}", path);
    }

    let omdb = OmdbConfig::from_env()?;
    let server = ServerConfig::from_env()?;
    info!("OMDb endpoint {}, data under {:?}", omdb.base_url, server.data_dir);
    popcorn::app::run_server(server, omdb).await
}
