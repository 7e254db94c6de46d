use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info};

/// USD quote of the tracked asset. Best effort: `None` means unknown.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn get_price(&self) -> Option<f64>;
}

/// Exchange ticker endpoint returning `{"data": {"ticker": {"last": ...}}}`
#[derive(Debug, Clone)]
pub struct TickerPriceFeed {
    url: String,
    http_client: reqwest::Client,
    fallback: Option<f64>,
}

impl TickerPriceFeed {
    pub fn new(url: &str, timeout: Duration, fallback: Option<f64>) -> eyre::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| eyre::eyre!("Failed to create HTTP client: {}", e))?;

        Ok(Self { url: url.to_string(), http_client, fallback })
    }

    async fn fetch(&self) -> eyre::Result<f64> {
        let response = self.http_client.get(&self.url).send().await?.error_for_status()?;
        let body: Value = response.json().await?;
        parse_ticker_last(&body).ok_or_else(|| eyre::eyre!("No ticker price in response"))
    }
}

#[async_trait]
impl PriceFeed for TickerPriceFeed {
    async fn get_price(&self) -> Option<f64> {
        match self.fetch().await {
            Ok(price) => {
                info!("Price: ${:.6}", price);
                Some(price)
            }
            Err(e) => {
                error!("Error fetching price from {}: {}", self.url, e);
                self.fallback
            }
        }
    }
}

/// A constant quote, or none at all
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedPriceFeed(pub Option<f64>);

#[async_trait]
impl PriceFeed for FixedPriceFeed {
    async fn get_price(&self) -> Option<f64> {
        self.0
    }
}

/// `data.ticker.last`, sent as a string by most exchanges
pub fn parse_ticker_last(body: &Value) -> Option<f64> {
    let last = body.get("data")?.get("ticker")?.get("last")?;
    let price = match last {
        Value::String(s) => s.parse::<f64>().ok()?,
        Value::Number(n) => n.as_f64()?,
        _ => return None,
    };
    (price.is_finite() && price >= 0.0).then_some(price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_ticker_last() {
        assert_eq!(parse_ticker_last(&json!({"data": {"ticker": {"last": "0.00123"}}})), Some(0.00123));
        assert_eq!(parse_ticker_last(&json!({"data": {"ticker": {"last": 2.5}}})), Some(2.5));
        assert_eq!(parse_ticker_last(&json!({"data": {"ticker": {"last": "n/a"}}})), None);
        assert_eq!(parse_ticker_last(&json!({"data": {"ticker": {"last": "-1"}}})), None);
        assert_eq!(parse_ticker_last(&json!({"code": 3})), None);
    }

    #[tokio::test]
    async fn test_unreachable_feed_uses_fallback() {
        let feed = TickerPriceFeed::new("http://127.0.0.1:1/ticker", Duration::from_millis(200), Some(0.002)).unwrap();
        assert_eq!(feed.get_price().await, Some(0.002));

        let feed = TickerPriceFeed::new("http://127.0.0.1:1/ticker", Duration::from_millis(200), None).unwrap();
        assert_eq!(feed.get_price().await, None);
    }

    #[tokio::test]
    async fn test_fixed_feed() {
        assert_eq!(FixedPriceFeed(Some(1.5)).get_price().await, Some(1.5));
        assert_eq!(FixedPriceFeed::default().get_price().await, None);
    }
}
