mod poller;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use ledger_core::constants::{DEFAULT_POLL_INTERVAL_SECS, DEFAULT_TAIL_SIZE};
use ledger_core::VerificationStatus;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

use crate::poller::{render, Poller};

#[derive(Parser, Debug)]
#[command(name = "ledger-cli")]
#[command(about = "CLI client for the plastic classification ledger node")]
struct Cli {
    /// Node base URL
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    node: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Append a classification to the ledger
    #[command(group(ArgGroup::new("image_source").required(true).args(["image", "image_hash"])))]
    Submit {
        /// Plastic label, e.g. PET
        #[arg(long)]
        plastic_type: String,
        /// Model confidence in [0, 1]
        #[arg(long)]
        confidence: f64,
        /// Image file; its SHA-256 becomes the image hash
        #[arg(long)]
        image: Option<PathBuf>,
        /// Precomputed image hash
        #[arg(long)]
        image_hash: Option<String>,
        /// Request id; the node generates one when omitted
        #[arg(long)]
        request_id: Option<String>,
        /// Verification status
        #[arg(long, default_value = "verified")]
        status: String,
    },
    /// Print the most recent classifications once
    Tail {
        #[arg(short, default_value_t = DEFAULT_TAIL_SIZE)]
        n: usize,
    },
    /// Poll the most recent classifications until interrupted
    Watch {
        #[arg(short, default_value_t = DEFAULT_TAIL_SIZE)]
        n: usize,
        /// Seconds between polls
        #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
        interval: u64,
    },
    /// Ask the node to audit the whole chain
    Verify,
    /// Show the last block's index and hash
    Head,
}

#[derive(Serialize)]
struct ClassificationOut {
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
    plastic_type: String,
    confidence: f64,
    image_hash: String,
    verification_status: VerificationStatus,
}

fn hash_image(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    let node = cli.node.trim_end_matches('/').to_string();
    let client = reqwest::Client::new();
    match cli.cmd {
        Command::Submit {
            plastic_type,
            confidence,
            image,
            image_hash,
            request_id,
            status,
        } => {
            let image_hash = match (image, image_hash) {
                (Some(path), _) => hash_image(&path)?,
                (None, Some(hash)) => hash,
                (None, None) => unreachable!("clap requires one image source"),
            };
            let body = ClassificationOut {
                request_id,
                plastic_type,
                confidence,
                image_hash,
                verification_status: VerificationStatus::from(status),
            };
            let res = client
                .post(format!("{node}/classifications"))
                .json(&body)
                .send()
                .await?;
            let status = res.status();
            let body = res.text().await?;
            println!("status: {}", status);
            println!("{body}");
        }
        Command::Tail { n } => {
            let poller = Poller::new(client, &node, n);
            let window = poller.fetch().await?;
            print!("{}", render(&window));
        }
        Command::Watch { n, interval } => {
            let mut poller = Poller::new(client, &node, n);
            let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let outcome = poller.fetch().await;
                        let failed = outcome.is_err();
                        if let Some(window) = poller.record(outcome) {
                            println!("--- {} block(s){}", window.len(), if failed { " (stale)" } else { "" });
                            print!("{}", render(window));
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
        Command::Verify => {
            let res = client.get(format!("{node}/chain/verify")).send().await?;
            println!("status: {}", res.status());
            println!("{}", res.text().await?);
        }
        Command::Head => {
            let res = client
                .get(format!("{node}/chain/head"))
                .send()
                .await?
                .error_for_status()?;
            let head: serde_json::Value = res.json().await?;
            println!("{}", serde_json::to_string_pretty(&head)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn image_hash_is_sha256_hex() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();
        assert_eq!(
            hash_image(file.path()).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(hash_image(Path::new("/definitely/not/here.png")).is_err());
    }

    #[test]
    fn submit_requires_an_image_source() {
        let missing = Cli::try_parse_from([
            "ledger-cli",
            "submit",
            "--plastic-type",
            "PET",
            "--confidence",
            "0.9",
        ]);
        assert!(missing.is_err());

        let cli = Cli::try_parse_from([
            "ledger-cli",
            "--node",
            "http://ledger:9000",
            "submit",
            "--plastic-type",
            "PET",
            "--confidence",
            "0.9",
            "--image-hash",
            "00ff",
        ])
        .unwrap();
        assert_eq!(cli.node, "http://ledger:9000");
        assert!(matches!(cli.cmd, Command::Submit { image_hash: Some(_), .. }));
    }

    #[test]
    fn watch_defaults_match_display_contract() {
        let cli = Cli::try_parse_from(["ledger-cli", "watch"]).unwrap();
        match cli.cmd {
            Command::Watch { n, interval } => {
                assert_eq!(n, 10);
                assert_eq!(interval, 5);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn outgoing_body_omits_missing_request_id() {
        let body = ClassificationOut {
            request_id: None,
            plastic_type: "PS".into(),
            confidence: 0.25,
            image_hash: "00".into(),
            verification_status: VerificationStatus::Verified,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("request_id").is_none());
        assert_eq!(json["verification_status"], "verified");
    }
}
