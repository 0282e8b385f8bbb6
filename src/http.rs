use std::future::Future;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, warn};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;

use crate::config::NetworkSettings;

const DOWNLOAD_TIMEOUT_FACTOR: u32 = 10;

#[derive(thiserror::Error, Debug)]
pub(crate) enum FetchError {
    #[error("{0} was not found")]
    NotFound(String),
    #[error("Request to {0} timed out after {1:?}")]
    Timeout(String, Duration),
    #[error("Request to {0} failed: {1}")]
    Transport(String, String),
    #[error("{0} answered with status {1}")]
    Status(String, StatusCode),
    #[error("Unexpected response from {0}: {1}")]
    Decode(String, String),
    #[error("Could not write {0}: {1}")]
    Io(String, String),
    #[error("{0} is not configured")]
    Unconfigured(&'static str),
}

impl FetchError {
    /// Failures worth another attempt after the backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout(..) | FetchError::Transport(..) | FetchError::Status(..)
        )
    }
}

fn check_status(url: &str, status: StatusCode) -> Result<(), FetchError> {
    if status == StatusCode::NOT_FOUND {
        Err(FetchError::NotFound(url.to_owned()))
    } else if !status.is_success() {
        Err(FetchError::Status(url.to_owned(), status))
    } else {
        Ok(())
    }
}

#[derive(Clone)]
pub(crate) struct HttpClient {
    client: reqwest::Client,
    timeout: Duration,
    attempts: u32,
    backoff: Duration,
}

impl HttpClient {
    pub fn new(network: &NetworkSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(network.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self::with_policy(
            client,
            Duration::from_secs(network.timeout_secs),
            network.attempts,
            Duration::from_secs(network.backoff_secs),
        ))
    }

    pub fn with_policy(client: reqwest::Client, timeout: Duration, attempts: u32, backoff: Duration) -> Self {
        Self {
            client,
            timeout,
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Runs `op` up to `attempts` times, each bounded by `timeout`. Non-transient
    /// errors end the loop immediately.
    pub async fn retry<T, F, Fut>(&self, url: &str, timeout: Duration, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut last_error = FetchError::Transport(url.to_owned(), "no attempt made".to_owned());
        for attempt in 1..=self.attempts {
            let error = match tokio::time::timeout(timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) if !err.is_transient() => return Err(err),
                Ok(Err(err)) => err,
                Err(_) => FetchError::Timeout(url.to_owned(), timeout),
            };
            if attempt < self.attempts {
                warn!("Attempt {}/{} failed: {}; retrying", attempt, self.attempts, error);
                tokio::time::sleep(self.backoff).await;
            }
            last_error = error;
        }
        Err(last_error)
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        self.retry(url, self.timeout, || async {
            debug!("GET {}", url);
            let mut request = self.client.get(url).query(query);
            for (name, value) in headers {
                request = request.header(*name, *value);
            }
            let response = request
                .send()
                .await
                .map_err(|e| FetchError::Transport(url.to_owned(), e.to_string()))?;
            check_status(url, response.status())?;
            response
                .json::<T>()
                .await
                .map_err(|e| FetchError::Decode(url.to_owned(), e.to_string()))
        })
        .await
    }

    /// Streams `url` into `dest`. A failed attempt removes the partial file.
    pub async fn download(&self, url: &str, dest: &Path, label: &str) -> Result<u64, FetchError> {
        let timeout = self.timeout * DOWNLOAD_TIMEOUT_FACTOR;
        let result = self
            .retry(url, timeout, || async {
                let outcome = self.download_once(url, dest, label).await;
                if outcome.is_err() {
                    let _ = tokio::fs::remove_file(dest).await;
                }
                outcome
            })
            .await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(dest).await;
        }
        result
    }

    async fn download_once(&self, url: &str, dest: &Path, label: &str) -> Result<u64, FetchError> {
        let transport = |e: reqwest::Error| FetchError::Transport(url.to_owned(), e.to_string());
        let io = |e: std::io::Error| FetchError::Io(dest.display().to_string(), e.to_string());

        let mut response = self.client.get(url).send().await.map_err(transport)?;
        check_status(url, response.status())?;

        let progress = download_bar(response.content_length(), label);
        let mut file = tokio::fs::File::create(dest).await.map_err(io)?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(transport)? {
            file.write_all(&chunk).await.map_err(io)?;
            written += chunk.len() as u64;
            progress.set_position(written);
        }
        file.flush().await.map_err(io)?;
        progress.finish_and_clear();

        if written == 0 {
            return Err(FetchError::Decode(url.to_owned(), "empty body".to_owned()));
        }
        Ok(written)
    }
}

fn download_bar(length: Option<u64>, label: &str) -> ProgressBar {
    let bar = match length {
        Some(length) => {
            let bar = ProgressBar::new(length);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes:>10}/{total_bytes:10} ({eta}) {msg}")
            {
                bar.set_style(style.progress_chars("█▉▊▋▌▍▎▏ "));
            }
            bar
        }
        None => ProgressBar::new_spinner(),
    };
    bar.set_message(label.to_owned());
    bar
}
