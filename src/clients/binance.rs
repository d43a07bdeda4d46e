use crate::clients::{new_limiter, retry_policy, ClientError, DirectLimiter};
use crate::config::BinanceConfig;
use backon::Retryable;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// A 1-second candlestick. Only the close matters to the fee pipeline; it is
/// the authoritative ETH/USDT rate for the candle's open instant.
#[derive(Debug, Clone)]
pub struct Kline {
    pub open_time: DateTime<Utc>,
    pub close: BigDecimal,
    pub close_time: DateTime<Utc>,
}

#[derive(Clone)]
pub struct BinanceClient {
    http: reqwest::Client,
    base_url: String,
    limiter: Arc<DirectLimiter>,
    max_retries: usize,
    retry_base_delay: Duration,
}

impl BinanceClient {
    pub fn new(cfg: &BinanceConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(cfg.timeout).build()?;

        Ok(Self {
            http,
            base_url: cfg.base_url.clone(),
            limiter: Arc::new(new_limiter(cfg.rate_limit, cfg.rate_burst)),
            max_retries: cfg.max_retries,
            retry_base_delay: cfg.retry_base_delay,
        })
    }

    /// Returns the 1s candle whose open time is `timestamp`, truncated to the
    /// second. The exchange returns the candle covering the requested instant,
    /// so the close is the spot rate used for fee conversion.
    pub async fn get_price(
        &self,
        symbol: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Kline, ClientError> {
        let start_ms = timestamp.timestamp_millis();

        let fetch = || async {
            self.limiter.until_ready().await;
            self.fetch_kline(symbol, start_ms).await
        };

        fetch
            .retry(&retry_policy(self.max_retries, self.retry_base_delay))
            .when(ClientError::is_retryable)
            .notify(|err, dur| {
                warn!("Binance request failed, retrying in {:?}: {}", dur, err);
            })
            .await
    }

    async fn fetch_kline(&self, symbol: &str, start_ms: i64) -> Result<Kline, ClientError> {
        let url = format!("{}/klines", self.base_url);
        let start_time = start_ms.to_string();
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("symbol", symbol),
                ("interval", "1s"),
                ("startTime", start_time.as_str()),
                ("limit", "1"),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let rows: Vec<Vec<Value>> = resp.json().await?;
        let row = rows.first().ok_or_else(|| ClientError::EmptyPriceData {
            symbol: symbol.to_string(),
            timestamp_ms: start_ms,
        })?;

        parse_kline(row)
    }
}

/// Klines arrive as positional arrays:
/// `[openTime, open, high, low, close, volume, closeTime, ...]`.
fn parse_kline(row: &[Value]) -> Result<Kline, ClientError> {
    let open_time = millis_to_datetime(field_as_i64(row, 0, "openTime")?, "openTime")?;
    let close = field_as_decimal(row, 4, "close")?;
    let close_time = millis_to_datetime(field_as_i64(row, 6, "closeTime")?, "closeTime")?;

    Ok(Kline {
        open_time,
        close,
        close_time,
    })
}

fn field_as_i64(row: &[Value], idx: usize, field: &'static str) -> Result<i64, ClientError> {
    let value = row.get(idx).ok_or_else(|| ClientError::Parse {
        field,
        value: "<missing>".to_string(),
    })?;
    match value {
        Value::Number(n) => n.as_i64().ok_or_else(|| ClientError::Parse {
            field,
            value: n.to_string(),
        }),
        Value::String(s) => s.parse().map_err(|_| ClientError::Parse {
            field,
            value: s.clone(),
        }),
        other => Err(ClientError::Parse {
            field,
            value: other.to_string(),
        }),
    }
}

fn field_as_decimal(row: &[Value], idx: usize, field: &'static str) -> Result<BigDecimal, ClientError> {
    let value = row.get(idx).ok_or_else(|| ClientError::Parse {
        field,
        value: "<missing>".to_string(),
    })?;
    let raw = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    };
    BigDecimal::from_str(&raw).map_err(|_| ClientError::Parse { field, value: raw })
}

fn millis_to_datetime(ms: i64, field: &'static str) -> Result<DateTime<Utc>, ClientError> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| ClientError::Parse {
        field,
        value: ms.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_kline_row() {
        let row: Vec<Value> = serde_json::from_value(json!([
            1620250931000i64,
            "2000.10000000",
            "2001.00000000",
            "1999.90000000",
            "2000.50000000",
            "12.34500000",
            1620250931999i64,
            "24696.17000000",
            42,
            "6.00000000",
            "12003.00000000",
            "0"
        ]))
        .unwrap();

        let kline = parse_kline(&row).unwrap();
        assert_eq!(kline.open_time.timestamp_millis(), 1620250931000);
        assert_eq!(kline.close_time.timestamp_millis(), 1620250931999);
        assert_eq!(kline.close, BigDecimal::from_str("2000.5").unwrap());
    }

    #[test]
    fn rejects_short_row() {
        let row = vec![json!(1620250931000i64), json!("2000.1")];
        assert!(parse_kline(&row).is_err());
    }

    #[test]
    fn rejects_non_numeric_close() {
        let row: Vec<Value> = serde_json::from_value(json!([
            1620250931000i64,
            "2000.1",
            "2001.0",
            "1999.9",
            "not-a-price",
            "12.3",
            1620250931999i64
        ]))
        .unwrap();
        assert!(matches!(
            parse_kline(&row),
            Err(ClientError::Parse { field: "close", .. })
        ));
    }
}
