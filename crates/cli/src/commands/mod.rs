//! Command implementations.
//!
//! Output goes through `tracing` so it honors `PRICEPULSE_LOG_FORMAT`.

pub mod alerts;
pub mod auth;
pub mod products;

use tokio::io::{AsyncBufReadExt, BufReader};

use pricepulse_client::ClientError;

/// Ask for one line of input on stdin.
pub async fn prompt(label: &str) -> Result<String, ClientError> {
    tracing::info!("{label}:");
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .map_err(|e| ClientError::BadRequest(format!("could not read input: {e}")))?;
    Ok(line.trim().to_string())
}
