use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::error::StoreError;
use crate::models::WatchedMovie;
use crate::store::{KeyValueStore, PersistentState};

pub const WATCHED_KEY: &str = "watched";

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WatchedSummary {
    pub count: usize,
    pub avg_imdb_rating: f64,
    pub avg_user_rating: f64,
    pub avg_runtime: f64,
}

pub struct WatchedList {
    state: PersistentState<Vec<WatchedMovie>>,
}

impl WatchedList {
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let state = PersistentState::load(store, WATCHED_KEY, Vec::new());
        info!("Loaded {} watched movies", state.with(|m| m.len()));
        Self { state }
    }

    pub fn movies(&self) -> Vec<WatchedMovie> {
        self.state.get()
    }

    pub fn add(&self, movie: WatchedMovie) -> Result<bool, StoreError> {
        let imdb_id = movie.imdb_id.clone();
        let mut inserted = false;
        self.state.update(|prev| {
            if prev.iter().any(|m| m.imdb_id == imdb_id) {
                return prev.clone();
            }
            inserted = true;
            let mut next = prev.clone();
            next.push(movie);
            next
        })?;
        if inserted {
            info!("Added {} to watched list", imdb_id);
        }
        Ok(inserted)
    }

    pub fn remove(&self, imdb_id: &str) -> Result<bool, StoreError> {
        let mut removed = false;
        self.state.update(|prev| {
            let next: Vec<WatchedMovie> =
                prev.iter().filter(|m| m.imdb_id != imdb_id).cloned().collect();
            removed = next.len() != prev.len();
            next
        })?;
        if removed {
            info!("Removed {} from watched list", imdb_id);
        }
        Ok(removed)
    }

    pub fn is_watched(&self, imdb_id: &str) -> bool {
        self.state.with(|m| m.iter().any(|w| w.imdb_id == imdb_id))
    }

    pub fn user_rating(&self, imdb_id: &str) -> Option<u8> {
        self.state
            .with(|m| m.iter().find(|w| w.imdb_id == imdb_id).map(|w| w.user_rating))
    }

    pub fn summary(&self) -> WatchedSummary {
        self.state.with(|movies| WatchedSummary {
            count: movies.len(),
            avg_imdb_rating: average(movies.iter().filter_map(|m| m.imdb_rating)),
            avg_user_rating: average(movies.iter().map(|m| f64::from(m.user_rating))),
            avg_runtime: average(movies.iter().filter_map(|m| m.runtime.map(f64::from))),
        })
    }
}

fn average(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}
