// src/services/client.rs

//! API client for the board index, board listings and thread details.
//!
//! Every request goes through the shared [`RateLimiter`]. Thread detail
//! requests additionally follow a fixed retry policy: a 404 is final,
//! any other failure is retried up to [`MAX_RETRIES`] times with a
//! pause of [`BACKOFF_MULTIPLIER`] request intervals before each retry.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{ApiConfig, BoardIndex, Listing, ThreadPayload};
use crate::services::RateLimiter;
use crate::utils::http::{HttpFetcher, ReqwestFetcher};
use crate::utils::{parse_base_url, resolve_url};

/// Retries after the initial thread request fails.
pub const MAX_RETRIES: u32 = 5;

/// Pause before each retry, in multiples of the request interval.
pub const BACKOFF_MULTIPLIER: u32 = 5;

/// Why a thread fetch produced no payload.
///
/// Callers must treat both reasons identically; the distinction is only
/// kept for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoneReason {
    /// The API answered 404
    NotFound,
    /// Every attempt failed with a retryable error
    RetriesExhausted,
}

/// Outcome of a thread detail fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemFetch {
    Found(ThreadPayload),
    Gone(GoneReason),
}

/// The three fetch operations the monitor depends on.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    /// Fetch the index of every board.
    async fn fetch_board_index(&self) -> Result<BoardIndex>;

    /// Fetch the paged thread listing of one board.
    async fn fetch_listing(&self, board: &str) -> Result<Listing>;

    /// Fetch the detail document of one thread.
    async fn fetch_item(&self, board: &str, thread: &str) -> Result<ItemFetch>;

    /// Fetch the board codes of the index.
    async fn fetch_board_codes(&self) -> Result<Vec<String>> {
        Ok(self.fetch_board_index().await?.codes())
    }
}

/// Rate-limited client for the imageboard JSON API.
pub struct ApiClient {
    fetcher: Arc<dyn HttpFetcher>,
    limiter: Arc<RateLimiter>,
    base_url: Url,
}

impl ApiClient {
    /// Create a client over an arbitrary fetcher.
    pub fn new(
        fetcher: Arc<dyn HttpFetcher>,
        limiter: Arc<RateLimiter>,
        base_url: &str,
    ) -> Result<Self> {
        Ok(Self {
            fetcher,
            limiter,
            base_url: parse_base_url(base_url)?,
        })
    }

    /// Create a client backed by `reqwest`.
    pub fn from_config(config: &ApiConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        let fetcher = Arc::new(ReqwestFetcher::new(config)?);
        Self::new(fetcher, limiter, &config.base_url)
    }

    fn board_index_url(&self) -> Result<String> {
        resolve_url(&self.base_url, "boards.json")
    }

    fn listing_url(&self, board: &str) -> Result<String> {
        resolve_url(&self.base_url, &format!("{board}/threads.json"))
    }

    fn thread_url(&self, board: &str, thread: &str) -> Result<String> {
        resolve_url(&self.base_url, &format!("{board}/thread/{thread}.json"))
    }

    /// Rate-limited GET that fails on any non-2xx status.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.limiter.acquire().await;
        let response = self.fetcher.get(url).await?;
        if !response.is_success() {
            return Err(AppError::transport(url, response.status));
        }
        Ok(serde_json::from_slice(&response.body)?)
    }
}

#[async_trait]
impl ApiTransport for ApiClient {
    async fn fetch_board_index(&self) -> Result<BoardIndex> {
        log::debug!("Board index requested");
        let url = self.board_index_url()?;
        self.get_json(&url).await
    }

    async fn fetch_listing(&self, board: &str) -> Result<Listing> {
        log::debug!("Board /{}/ thread listing requested", board);
        let url = self.listing_url(board)?;
        self.get_json(&url).await
    }

    async fn fetch_item(&self, board: &str, thread: &str) -> Result<ItemFetch> {
        let url = self.thread_url(board, thread)?;
        let interval = self.limiter.interval();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.limiter.acquire().await;

            let failure = match self.fetcher.get(&url).await {
                Ok(response) if response.status == 200 => {
                    match serde_json::from_slice::<ThreadPayload>(&response.body) {
                        Ok(payload) => {
                            log::debug!("Received thread {} on /{}/", thread, board);
                            sleep(interval).await;
                            return Ok(ItemFetch::Found(payload));
                        }
                        Err(e) => format!("undecodable body ({e})"),
                    }
                }
                Ok(response) if response.is_not_found() => {
                    log::warn!(
                        "Request for thread {} on /{}/ returned 404, skipping",
                        thread,
                        board
                    );
                    return Ok(ItemFetch::Gone(GoneReason::NotFound));
                }
                Ok(response) => format!("status {}", response.status),
                Err(e) => e.to_string(),
            };

            if attempt > MAX_RETRIES {
                log::warn!(
                    "Request for thread {} on /{}/ failed with {} after {} attempts, giving up",
                    thread,
                    board,
                    failure,
                    attempt
                );
                return Ok(ItemFetch::Gone(GoneReason::RetriesExhausted));
            }

            log::warn!(
                "Request for thread {} on /{}/ failed with {}, retrying {} more times",
                thread,
                board,
                failure,
                MAX_RETRIES + 1 - attempt
            );
            sleep(interval.saturating_mul(BACKOFF_MULTIPLIER)).await;
        }
    }
}
