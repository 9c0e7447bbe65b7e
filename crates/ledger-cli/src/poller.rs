//! Repeated polling of `/chain/tail`. A failed poll never clears what is on
//! screen: the last window that arrived intact is shown until a newer one
//! does.

use anyhow::{bail, Result};
use ledger_core::Block;
use reqwest::Client;
use std::fmt::Write;
use tracing::{debug, warn};

pub struct Poller {
    client: Client,
    url: String,
    last_good: Option<Vec<Block>>,
    failures: u32,
}

impl Poller {
    pub fn new(client: Client, node: &str, n: usize) -> Self {
        Self {
            client,
            url: format!("{}/chain/tail?n={n}", node.trim_end_matches('/')),
            last_good: None,
            failures: 0,
        }
    }

    pub async fn fetch(&self) -> Result<Vec<Block>> {
        let res = self.client.get(&self.url).send().await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            bail!("node answered {status}: {body}");
        }
        Ok(res.json().await?)
    }

    /// Fold one poll outcome in and return the window to show.
    pub fn record(&mut self, outcome: Result<Vec<Block>>) -> Option<&[Block]> {
        match outcome {
            Ok(window) => {
                debug!(blocks = window.len(), "poll ok");
                self.failures = 0;
                self.last_good = Some(window);
            }
            Err(e) => {
                self.failures += 1;
                warn!(error = %e, failures = self.failures, "poll failed, keeping last window");
            }
        }
        self.last_good.as_deref()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }
}

/// One line per block, most recent first as served.
pub fn render(window: &[Block]) -> String {
    if window.is_empty() {
        return "no classifications yet\n".to_string();
    }
    let mut out = String::new();
    for block in window {
        let status = if block.verification_status.is_verified() {
            "VERIFIED"
        } else {
            "UNVERIFIED"
        };
        let _ = writeln!(
            out,
            "#{:<6} {:<6} {:>6.2}%  {:<10}  ts={}  request={}  hash={}",
            block.index,
            block.plastic_type,
            block.confidence * 100.0,
            status,
            block.timestamp,
            block.request_id,
            &block.hash_hex()[..16],
        );
    }
    out
}
