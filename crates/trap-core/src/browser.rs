//! Best-effort cleanup of browser tabs opened by agents.
//!
//! Talks to a local browser-control HTTP endpoint. This whole surface is
//! optional: callers swallow every error, so a missing or broken
//! endpoint never affects a cycle.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Tab {
    id: String,
    url: String,
}

/// Client for the local browser-control endpoint.
pub struct BrowserControl {
    client: reqwest::Client,
    base_url: String,
}

impl BrowserControl {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build browser-control client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        })
    }

    /// Close every open tab whose URL contains one of `patterns`.
    /// Returns how many tabs were closed.
    pub async fn close_matching_tabs(&self, patterns: &[String]) -> Result<usize> {
        let tabs: Vec<Tab> = self
            .client
            .get(format!("{}/tabs", self.base_url))
            .send()
            .await
            .context("failed to list tabs")?
            .error_for_status()
            .context("tab listing rejected")?
            .json()
            .await
            .context("unparseable tab listing")?;

        let mut closed = 0;
        for tab in tabs {
            if !patterns.iter().any(|p| tab.url.contains(p.as_str())) {
                continue;
            }
            let result = self
                .client
                .post(format!("{}/tabs/{}/close", self.base_url, tab.id))
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(url = %tab.url, "closed stale agent tab");
                    closed += 1;
                }
                Ok(response) => {
                    tracing::debug!(url = %tab.url, status = %response.status(), "tab close refused");
                }
                Err(e) => {
                    tracing::debug!(url = %tab.url, error = %e, "tab close failed");
                }
            }
        }
        Ok(closed)
    }
}
