//! Shared HTTP plumbing for network engines.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{
    Quota, RateLimiter, clock::DefaultClock, state::InMemoryState, state::direct::NotKeyed,
};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::{LyricError, LyricResult};

pub type EngineRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub fn build_client(user_agent: &str, timeout: Duration, engine: &str) -> LyricResult<Client> {
    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(5)))
        .build()
        .map_err(|e| LyricError::network(engine, e))
}

pub fn rate_limiter(requests_per_second: u32) -> EngineRateLimiter {
    let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
    RateLimiter::direct(Quota::per_second(per_second))
}

/// Paced GET returning the body as JSON. `Ok(None)` means the source
/// answered 404.
pub async fn get_json<T: DeserializeOwned>(
    client: &Client,
    limiter: &EngineRateLimiter,
    engine: &str,
    url: &str,
) -> LyricResult<Option<T>> {
    limiter.until_ready().await;
    tracing::debug!(engine, url, "GET");

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| LyricError::from_reqwest(engine, e))?;

    match response.status() {
        StatusCode::NOT_FOUND => Ok(None),
        status if status.is_success() => {
            let text = response
                .text()
                .await
                .map_err(|e| LyricError::from_reqwest(engine, e))?;
            serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| LyricError::parse(engine, e))
        }
        status => Err(LyricError::network(
            engine,
            format!("unexpected status {status} for {url}"),
        )),
    }
}
