//! Price alert commands.

use std::str::FromStr;

use rust_decimal::Decimal;
use tracing::info;

use pricepulse_client::{ClientError, PricePulse};
use pricepulse_core::{AlertId, ProductId};

/// Create an alert. The notification goes to the account email by default.
pub async fn create(client: &PricePulse, id: &str, price: &str, email: Option<&str>) -> Result<(), ClientError> {
    let target = Decimal::from_str(price.trim().trim_start_matches('$'))
        .map_err(|_| ClientError::BadRequest(format!("'{price}' is not a price")))?;

    let email = match email {
        Some(email) => email.to_string(),
        None => client
            .session()
            .current()
            .map(|s| s.identity.email.to_string())
            .ok_or_else(|| ClientError::BadRequest("pass --email or sign in first".to_string()))?,
    };

    let message = client.alerts().submit(&ProductId::new(id), target, &email).await?;
    info!("{message}");
    Ok(())
}

/// List alerts.
pub async fn list(client: &PricePulse) -> Result<(), ClientError> {
    let alerts = client.alerts().list().await?;
    if alerts.is_empty() {
        info!("No price alerts");
        return Ok(());
    }
    for alert in alerts {
        info!(
            "{}  {} at or below {}  -> {}",
            alert.id,
            alert.product_name.as_deref().unwrap_or_else(|| alert.product_id.as_str()),
            alert.target_price,
            alert.email
        );
    }
    Ok(())
}

/// Delete an alert.
pub async fn delete(client: &PricePulse, id: &str) -> Result<(), ClientError> {
    client.alerts().delete(&AlertId::new(id)).await?;
    info!("Deleted alert {id}");
    Ok(())
}
