//! iotlink Control CLI
//!
//! Command-line interface for the iotlink daemon's management API.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use iotlink_crypto::{DeviceTokenSigner, HmacAuthenticator};
use iotlink_protocol::{Command, validate_command};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::time::{SystemTime, UNIX_EPOCH};
use tabled::Tabled;

#[derive(Parser, Debug)]
#[command(name = "iotlinkctl")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    api: String,

    /// Identity reported to the daemon's rate limiter
    #[arg(long)]
    requester: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// View system statistics
    Stats,
    /// List connected devices
    Devices,
    /// Send a command to a device
    Send {
        /// Target device identity
        device: String,
        /// JSON payload
        payload: String,
    },
    /// Check whether a user is locked out
    LockStatus {
        /// User identity (email)
        email: String,
    },
    /// Clear a user's lock and failure history
    Unlock {
        /// User identity (email)
        email: String,
    },
    /// Issue a device token
    Token {
        /// Device identity
        device: String,
        /// HMAC secret (hex, 32 bytes)
        #[arg(long, env = "IOTLINK_DEVICE_TOKEN_SECRET")]
        secret: String,
        /// Lifetime in seconds
        #[arg(long, default_value = "86400")]
        ttl: u64,
    },
}

#[derive(Debug, Deserialize, Tabled)]
struct SystemStats {
    active_connections: usize,
    commands_routed: u64,
    commands_dropped: u64,
    device_messages: u64,
    lockouts: u64,
}

#[derive(Debug, Deserialize, Tabled)]
struct DeviceRow {
    device_identity: String,
    session_id: u64,
    status: String,
    connected_secs: u64,
}

#[derive(Debug, Deserialize)]
struct LockResponse {
    locked: bool,
    retry_after_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

struct Api {
    client: Client,
    base: String,
    requester: Option<String>,
}

impl Api {
    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.base, path));
        match &self.requester {
            Some(id) => builder.header("x-requester-id", id),
            None => builder,
        }
    }
}

async fn fail(resp: reqwest::Response) -> anyhow::Error {
    let status = resp.status();
    match resp.json::<ErrorBody>().await {
        Ok(body) => anyhow::anyhow!("{}: {}", status, body.error),
        Err(_) => anyhow::anyhow!("{}", status),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let api = Api {
        client: Client::new(),
        base: args.api.trim_end_matches('/').to_string(),
        requester: args.requester,
    };

    match args.command {
        Commands::Stats => {
            let resp = api.request(reqwest::Method::GET, "/api/stats").send().await?;
            if !resp.status().is_success() {
                return Err(fail(resp).await);
            }

            let stats: SystemStats = resp.json().await?;
            let table = tabled::Table::new(vec![stats]).to_string();
            println!("{}", table);
        }
        Commands::Devices => {
            let resp = api.request(reqwest::Method::GET, "/api/devices").send().await?;
            if !resp.status().is_success() {
                return Err(fail(resp).await);
            }

            let devices: Vec<DeviceRow> = resp.json().await?;
            if devices.is_empty() {
                println!("No devices connected");
            } else {
                println!("{}", tabled::Table::new(devices));
            }
        }
        Commands::Send { device, payload } => {
            let payload = serde_json::from_str(&payload).context("payload is not valid JSON")?;
            let command = Command::new(device, payload);
            validate_command(&command)?;

            let resp = api
                .request(reqwest::Method::POST, "/api/commands")
                .json(&command)
                .send()
                .await?;

            if resp.status() == StatusCode::ACCEPTED {
                // Accepted does not mean delivered
                println!("Command accepted for {}", command.target_device_identity);
            } else {
                return Err(fail(resp).await);
            }
        }
        Commands::LockStatus { email } => {
            let resp = api
                .request(reqwest::Method::GET, &format!("/api/auth/lock/{}", email))
                .send()
                .await?;

            let status = resp.status();
            if status != StatusCode::OK && status != StatusCode::TOO_MANY_REQUESTS {
                return Err(fail(resp).await);
            }

            match resp.json::<LockResponse>().await {
                Ok(LockResponse {
                    locked: true,
                    retry_after_secs,
                }) => println!(
                    "{} is locked; retry after {}s",
                    email,
                    retry_after_secs.unwrap_or(0)
                ),
                Ok(_) => println!("{} is not locked", email),
                Err(_) => bail!("{}: rate limited", status),
            }
        }
        Commands::Unlock { email } => {
            let resp = api
                .request(reqwest::Method::DELETE, &format!("/api/auth/lock/{}", email))
                .send()
                .await?;

            if resp.status().is_success() {
                println!("{} unlocked", email);
            } else {
                return Err(fail(resp).await);
            }
        }
        Commands::Token {
            device,
            secret,
            ttl,
        } => {
            let signer = DeviceTokenSigner::new(HmacAuthenticator::from_hex(&secret)?);
            let expires_at_ms = now_ms() + ttl.saturating_mul(1000);
            println!("{}", signer.issue(&device, expires_at_ms));
        }
    }

    Ok(())
}
