//! Product commands.

use pricepulse_client::{ClientError, PricePulse};
use pricepulse_core::{HistoryRange, PriceWindow, ProductId, TrackedProduct, TrendDirection, TrendSummary};
use tracing::info;

/// Start tracking a URL.
pub async fn track(client: &PricePulse, url: &str) -> Result<(), ClientError> {
    info!("Registering {url} (the first price check can take a while)");
    let product = client.track(url).await?;
    info!(id = %product.id, "Now tracking {} at {}", product.display_name, product.current_price);
    Ok(())
}

/// List tracked products with their trend badge.
pub async fn list(client: &PricePulse) -> Result<(), ClientError> {
    let products = client.products().refresh_list().await?;
    if products.is_empty() {
        info!("No tracked products yet. Use `pricepulse track <url>` to add one.");
        return Ok(());
    }
    for product in products.iter() {
        info!("{}", summary_line(product));
    }
    Ok(())
}

fn summary_line(product: &TrackedProduct) -> String {
    let status = if product.tracking_enabled { "" } else { " [paused]" };
    let trend = product.trend().map(|t| format!(" {}", badge(&t))).unwrap_or_default();
    format!(
        "{}  {}  {}{}{}",
        product.id, product.current_price, product.display_name, trend, status
    )
}

fn badge(trend: &TrendSummary) -> String {
    let arrow = match trend.direction {
        TrendDirection::Up => '▲',
        TrendDirection::Down => '▼',
    };
    format!("{arrow}{:.1}%", trend.percent_change.abs())
}

/// Show a product's price history over `range`.
pub async fn show(client: &PricePulse, id: &str, range: HistoryRange) -> Result<(), ClientError> {
    let (product, window) = client.price_window(&ProductId::new(id), range).await?;

    info!("{}", product.display_name);
    info!("{}", product.source_url);
    info!("Current price: {}", product.current_price);

    match window {
        PriceWindow::NoData => info!("No price data for the last {range}"),
        PriceWindow::Series { points, summary } => {
            info!("Last {range}: {}", badge(&summary));
            for point in points {
                info!("  {}  {}", point.timestamp.format("%Y-%m-%d %H:%M"), point.price);
            }
        }
    }
    Ok(())
}

/// Delete a product.
pub async fn remove(client: &PricePulse, id: &str) -> Result<(), ClientError> {
    client.products().remove(&ProductId::new(id)).await?;
    info!("Removed {id}");
    Ok(())
}

/// Pause or resume price checks.
pub async fn set_tracking(client: &PricePulse, id: &str, enabled: bool) -> Result<(), ClientError> {
    client.products().set_tracking(&ProductId::new(id), enabled).await?;
    info!("{} price checks for {id}", if enabled { "Resumed" } else { "Paused" });
    Ok(())
}

/// Refresh on the configured periods until Ctrl-C.
pub async fn watch(client: &PricePulse, product: Option<String>) -> Result<(), ClientError> {
    list(client).await?;

    let polling = client.polling();
    let _list = polling.start_list_refresh()?;
    if let Some(id) = product {
        let id = ProductId::new(id);
        client.products().refresh_product(&id).await?;
        let _detail = polling.start_detail_refresh(id)?;
    }
    info!("Watching for price changes. Press Ctrl-C to stop.");

    let result = tokio::signal::ctrl_c().await;
    polling.stop_all();
    result.map_err(|e| ClientError::BadRequest(format!("could not listen for Ctrl-C: {e}")))?;

    info!("Stopped watching");
    for product in client.collection().snapshot().iter() {
        info!("{}", summary_line(product));
    }
    Ok(())
}
