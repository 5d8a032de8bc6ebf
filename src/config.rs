use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_OMDB_BASE: &str = "https://www.omdbapi.com/";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_ADDR: &str = "0.0.0.0:3146";

#[derive(Debug, Clone)]
pub struct OmdbConfig {
    pub base_url: String,
    pub api_key: String,
}

impl OmdbConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_env() -> Result<Self> {
        let api_key = env::var("OMDB_API_KEY")
            .ok()
            .filter(|s| !s.is_empty())
            .context("OMDB_API_KEY not set")?;
        let base_url = env::var("OMDB_BASE_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_OMDB_BASE.to_string());
        Ok(Self { base_url, api_key })
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub data_dir: PathBuf,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let addr = env::var("POPCORN_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
        let addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("POPCORN_ADDR is not a socket address: {}", addr))?;
        let data_dir = env::var("POPCORN_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR));
        Ok(Self { addr, data_dir })
    }
}
