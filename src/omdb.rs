use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::OmdbConfig;
use crate::error::FetchError;
use crate::models::{MovieDetails, MovieSummary};

#[async_trait]
pub trait OmdbApi: Send + Sync {
    async fn search(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<Vec<MovieSummary>, FetchError>;
    async fn fetch_details(
        &self,
        imdb_id: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<MovieDetails, FetchError>;
}

#[derive(Debug, Clone)]
pub struct OmdbClient {
    client: Client,
    config: OmdbConfig,
}

impl OmdbClient {
    pub fn new(config: OmdbConfig) -> Result<Self> {
        let user_agent = format!("popcorn/{}", env!("CARGO_PKG_VERSION"));
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .context("Failed to build OMDb HTTP client")?;
        Ok(Self { client, config })
    }

    fn url(&self, param: &str, value: &str) -> String {
        format!(
            "{}?apikey={}&{}={}",
            self.config.base_url,
            urlencoding::encode(&self.config.api_key),
            param,
            urlencoding::encode(value)
        )
    }

    async fn get_json(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<Value, FetchError> {
        let request = async {
            let res = self.client.get(url).send().await?;
            let status = res.status();
            if !status.is_success() {
                debug!("OMDb answered with status {}", status);
                return Err(FetchError::Transport);
            }
            Ok::<_, FetchError>(res.bytes().await?)
        };

        // Dropping the request future on cancellation aborts the connection.
        let bytes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            res = request => res?,
        };

        let value: Value =
            serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode(e.to_string()))?;
        check_response(&value)?;
        Ok(value)
    }
}

#[async_trait]
impl OmdbApi for OmdbClient {
    async fn search(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<Vec<MovieSummary>, FetchError> {
        #[derive(Deserialize)]
        struct SearchResponse {
            #[serde(rename = "Search", default)]
            search: Vec<MovieSummary>,
        }

        debug!("Searching OMDb for '{}'", query);
        let value = self.get_json(&self.url("s", query), cancel).await?;
        let data: SearchResponse =
            serde_json::from_value(value).map_err(|e| FetchError::Decode(e.to_string()))?;
        Ok(data.search)
    }

    async fn fetch_details(
        &self,
        imdb_id: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<MovieDetails, FetchError> {
        debug!("Fetching OMDb details for {}", imdb_id);
        let value = self.get_json(&self.url("i", imdb_id), cancel).await?;
        let mut details: MovieDetails =
            serde_json::from_value(value).map_err(|e| FetchError::Decode(e.to_string()))?;
        if details.imdb_id.is_empty() {
            details.imdb_id = imdb_id.to_string();
        }
        Ok(details)
    }
}

/// OMDb reports "no results" and bad ids with a 200 and `Response: "False"`.
fn check_response(value: &Value) -> std::result::Result<(), FetchError> {
    if value.get("Response").and_then(|v| v.as_str()) == Some("False") {
        let message = value
            .get("Error")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown OMDb error")
            .to_string();
        return Err(FetchError::Domain(message));
    }
    Ok(())
}

pub fn parse_imdb_id(input: &str) -> Option<String> {
    let lower = input.trim().to_lowercase();
    if lower.starts_with("tt") && lower.len() > 2 && lower[2..].chars().all(|c| c.is_ascii_digit())
    {
        return Some(lower);
    }
    None
}
