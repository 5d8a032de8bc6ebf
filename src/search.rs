use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::models::MovieSummary;
use crate::omdb::OmdbApi;

pub const MIN_QUERY_LEN: usize = 3;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchState {
    pub query: String,
    pub results: Vec<MovieSummary>,
    pub is_loading: bool,
    pub error: Option<String>,
    #[serde(skip)]
    pub generation: u64,
}

#[derive(Default)]
struct Runs {
    generation: u64,
    live: Option<CancellationToken>,
}

struct Shared {
    api: Arc<dyn OmdbApi>,
    state: watch::Sender<SearchState>,
    runs: Mutex<Runs>,
}

impl Shared {
    fn lock_runs(&self) -> MutexGuard<'_, Runs> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn settle(&self, generation: u64, outcome: Result<Vec<MovieSummary>, FetchError>) {
        let mut runs = self.lock_runs();
        if runs.generation != generation {
            debug!("Discarding superseded search run {}", generation);
            return;
        }
        runs.live = None;
        self.state.send_modify(|s| {
            s.is_loading = false;
            match outcome {
                Ok(results) => {
                    debug!("Search '{}' returned {} results", s.query, results.len());
                    s.results = results;
                    s.error = None;
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    warn!("Search '{}' failed: {}", s.query, e);
                    s.results.clear();
                    s.error = Some(e.to_string());
                }
            }
        });
    }
}

struct RunGuard {
    shared: Arc<Shared>,
    generation: u64,
    settled: bool,
}

impl RunGuard {
    fn settle(mut self, outcome: Result<Vec<MovieSummary>, FetchError>) {
        self.settled = true;
        self.shared.settle(self.generation, outcome);
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.settled {
            self.shared.settle(self.generation, Err(FetchError::Cancelled));
        }
    }
}

pub struct SearchFetcher {
    shared: Arc<Shared>,
}

impl SearchFetcher {
    pub fn new(api: Arc<dyn OmdbApi>) -> Self {
        let (state, _) = watch::channel(SearchState::default());
        Self {
            shared: Arc::new(Shared {
                api,
                state,
                runs: Mutex::new(Runs::default()),
            }),
        }
    }

    pub fn state(&self) -> SearchState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchState> {
        self.shared.state.subscribe()
    }

    /// Must be called from within a tokio runtime.
    pub fn set_query(&self, query: &str) -> u64 {
        let mut runs = self.shared.lock_runs();
        if let Some(previous) = runs.live.take() {
            previous.cancel();
        }
        runs.generation += 1;
        let generation = runs.generation;
        let trimmed = query.trim();

        if trimmed.chars().count() < MIN_QUERY_LEN {
            self.shared.state.send_modify(|s| {
                s.query = query.to_string();
                s.results.clear();
                s.error = None;
                s.is_loading = false;
                s.generation = generation;
            });
            return generation;
        }

        let cancel = CancellationToken::new();
        runs.live = Some(cancel.clone());
        self.shared.state.send_modify(|s| {
            s.query = query.to_string();
            s.error = None;
            s.is_loading = true;
            s.generation = generation;
        });
        drop(runs);

        let guard = RunGuard {
            shared: Arc::clone(&self.shared),
            generation,
            settled: false,
        };
        let query = trimmed.to_string();
        tokio::spawn(async move {
            let outcome = guard.shared.api.search(&query, &cancel).await;
            guard.settle(outcome);
        });
        generation
    }

    /// Sets the query and waits for its run to settle. `None` when a later
    /// query or `cancel` superseded it first.
    pub async fn search(&self, query: &str) -> Option<SearchState> {
        let generation = self.set_query(query);
        let mut rx = self.subscribe();
        let state = {
            let settled = rx
                .wait_for(|s| s.generation != generation || !s.is_loading)
                .await
                .ok()?;
            settled.clone()
        };
        (state.generation == generation).then_some(state)
    }

    pub fn cancel(&self) {
        let mut runs = self.shared.lock_runs();
        runs.generation += 1;
        let generation = runs.generation;
        if let Some(live) = runs.live.take() {
            debug!("Cancelling in-flight search");
            live.cancel();
        }
        self.shared.state.send_modify(|s| {
            s.is_loading = false;
            s.generation = generation;
        });
    }
}

impl Drop for SearchFetcher {
    fn drop(&mut self) {
        if let Some(live) = self.shared.lock_runs().live.take() {
            live.cancel();
        }
    }
}
