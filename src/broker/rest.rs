//! Brokerage REST API client
//!
//! Handles HTTP communication with the brokerage: OAuth token refresh,
//! account lookup, quotes, option chains and order entry. Credentials
//! come from the constructor or fall back to environment variables.

use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use reqwest::{
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, LOCATION},
    Client,
};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use super::types::{
    BrokerOrder, CashBalance, ChainResponse, OrderAck, OrderSpec, UnderlyingQuote,
};
use super::{AccountSource, BrokerError, ChainSource, OrderBroker};
use async_trait::async_trait;

const DEFAULT_STRIKE_COUNT: u32 = 9;
const DEFAULT_DTE_WINDOW_DAYS: i64 = 14;

/// Pick the first non-empty string value among candidate keys
fn pick(value: &serde_json::Value, candidates: &[&str]) -> Option<String> {
    for key in candidates {
        if let Some(v) = value.get(*key).and_then(|v| v.as_str()) {
            if !v.trim().is_empty() {
                return Some(v.to_string());
            }
        }
    }
    None
}

/// Pick the first finite numeric value among candidate keys
fn pick_f64(value: &serde_json::Value, candidates: &[&str]) -> Option<f64> {
    for key in candidates {
        if let Some(v) = value.get(*key).and_then(|v| v.as_f64()) {
            if v.is_finite() {
                return Some(v);
            }
        }
    }
    None
}

/// Order id is the last path segment of the Location header on a
/// successful submission
fn order_id_from_location(location: &str) -> Option<String> {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn entered_time_bounds(from: NaiveDate, to: NaiveDate) -> (String, String) {
    (
        format!("{}T00:00:00.000Z", from.format("%Y-%m-%d")),
        format!("{}T23:59:59.000Z", to.format("%Y-%m-%d")),
    )
}

struct CachedToken {
    access_token: String,
    expires_at: chrono::DateTime<Utc>,
}

/// REST client implementing the full brokerage surface
pub struct RestBroker {
    client: Client,
    base_url: String,
    app_key: Option<String>,
    app_secret: Option<String>,
    refresh_token: Option<String>,
    token: RwLock<Option<CachedToken>>,
    strike_count: u32,
    dte_window_days: i64,
}

impl RestBroker {
    /// Create a new REST broker. Credentials left as `None` are resolved
    /// from the environment on first use.
    pub fn new(
        base_url: &str,
        app_key: Option<String>,
        app_secret: Option<String>,
        refresh_token: Option<String>,
    ) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            app_key,
            app_secret,
            refresh_token,
            token: RwLock::new(None),
            strike_count: DEFAULT_STRIKE_COUNT,
            dte_window_days: DEFAULT_DTE_WINDOW_DAYS,
        }
    }

    /// Override the chain fetch window
    pub fn with_chain_window(mut self, strike_count: u32, dte_window_days: i64) -> Self {
        self.strike_count = strike_count.max(1);
        self.dte_window_days = dte_window_days.max(1);
        self
    }

    fn resolve_env(var_names: &[&str]) -> Option<String> {
        for var in var_names {
            if let Ok(value) = std::env::var(var) {
                if !value.trim().is_empty() {
                    return Some(value);
                }
            }
        }
        None
    }

    fn credentials(&self) -> Result<(String, String, String), BrokerError> {
        let app_key = self
            .app_key
            .clone()
            .or_else(|| Self::resolve_env(&["SCHWAB_APP_KEY", "BROKER_APP_KEY"]))
            .ok_or_else(|| BrokerError::Auth("SCHWAB_APP_KEY not configured".to_string()))?;
        let app_secret = self
            .app_secret
            .clone()
            .or_else(|| Self::resolve_env(&["SCHWAB_APP_SECRET", "BROKER_APP_SECRET"]))
            .ok_or_else(|| BrokerError::Auth("SCHWAB_APP_SECRET not configured".to_string()))?;
        let refresh_token = self
            .refresh_token
            .clone()
            .or_else(|| Self::resolve_env(&["SCHWAB_REFRESH_TOKEN", "BROKER_REFRESH_TOKEN"]))
            .ok_or_else(|| BrokerError::Auth("SCHWAB_REFRESH_TOKEN not configured".to_string()))?;
        Ok((app_key, app_secret, refresh_token))
    }

    /// Cached bearer token, refreshed 60 seconds before expiry
    async fn access_token(&self) -> Result<String, BrokerError> {
        if let Some(token) = self.token.read().await.as_ref() {
            if token.expires_at > Utc::now() + ChronoDuration::seconds(60) {
                return Ok(token.access_token.clone());
            }
        }
        self.refresh_access_token().await
    }

    async fn refresh_access_token(&self) -> Result<String, BrokerError> {
        let (app_key, app_secret, refresh_token) = self.credentials()?;
        let basic = general_purpose::STANDARD.encode(format!("{app_key}:{app_secret}"));

        let response = self
            .client
            .post(format!("{}/v1/oauth/token", self.base_url))
            .header("Authorization", format!("Basic {basic}"))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::Auth(format!(
                "token refresh failed with status {status}: {body}"
            )));
        }

        let raw: serde_json::Value = response.json().await?;
        let access_token = pick(&raw, &["access_token", "accessToken", "token"])
            .ok_or_else(|| BrokerError::BadResponse("missing access_token".to_string()))?;
        let expires_in = raw.get("expires_in").and_then(|v| v.as_i64()).unwrap_or(1800);

        debug!(expires_in, "refreshed brokerage access token");
        *self.token.write().await = Some(CachedToken {
            access_token: access_token.clone(),
            expires_at: Utc::now() + ChronoDuration::seconds(expires_in.max(120)),
        });
        Ok(access_token)
    }

    async fn rejection(response: reqwest::Response) -> BrokerError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        BrokerError::Rejected { status, body }
    }
}

#[async_trait]
impl AccountSource for RestBroker {
    async fn cash_balance(&self) -> Result<CashBalance, BrokerError> {
        let token = self.access_token().await?;

        let response = self
            .client
            .get(format!("{}/trader/v1/accounts/accountNumbers", self.base_url))
            .bearer_auth(&token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        let raw: serde_json::Value = response.json().await?;
        let first = raw
            .as_array()
            .and_then(|accounts| accounts.first())
            .ok_or_else(|| BrokerError::BadResponse("no linked accounts".to_string()))?;
        let account_hash = pick(first, &["hashValue", "hash"])
            .ok_or_else(|| BrokerError::BadResponse("account hash missing".to_string()))?;
        let account_id = pick(first, &["accountNumber", "account"]);

        let response = self
            .client
            .get(format!(
                "{}/trader/v1/accounts/{}",
                self.base_url, account_hash
            ))
            .bearer_auth(&token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        let raw: serde_json::Value = response.json().await?;
        let account = raw.get("securitiesAccount").unwrap_or(&raw);
        let balances = account.get("currentBalances").unwrap_or(account);
        let available_cash = pick_f64(
            balances,
            &[
                "availableFunds",
                "cashAvailableForTrading",
                "cashBalance",
                "buyingPower",
            ],
        )
        .ok_or_else(|| BrokerError::BadResponse("available cash missing".to_string()))?;

        debug!(available_cash, account = account_id.as_deref().unwrap_or("?"), "fetched cash balance");
        Ok(CashBalance {
            available_cash,
            account_hash,
            account_id,
        })
    }
}

#[async_trait]
impl ChainSource for RestBroker {
    async fn quote(&self, symbol: &str) -> Result<UnderlyingQuote, BrokerError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(format!("{}/marketdata/v1/quotes", self.base_url))
            .bearer_auth(&token)
            .query(&[("symbols", symbol), ("fields", "quote")])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        let raw: serde_json::Value = response.json().await?;
        let entry = raw
            .get(symbol)
            .ok_or_else(|| BrokerError::BadResponse(format!("no quote entry for {symbol}")))?;
        let quote = entry.get("quote").unwrap_or(entry);
        let last_price = pick_f64(quote, &["lastPrice", "last", "mark", "closePrice"])
            .ok_or_else(|| BrokerError::BadResponse(format!("no last price for {symbol}")))?;

        Ok(UnderlyingQuote {
            symbol: symbol.to_string(),
            last_price,
            bid: pick_f64(quote, &["bidPrice", "bid"]),
            ask: pick_f64(quote, &["askPrice", "ask"]),
            total_volume: pick_f64(quote, &["totalVolume"]),
            quote_time: quote.get("quoteTime").and_then(|v| v.as_i64()),
        })
    }

    async fn option_chain(
        &self,
        symbol: &str,
        target_strike: f64,
    ) -> Result<ChainResponse, BrokerError> {
        let token = self.access_token().await?;
        let today = Utc::now().date_naive();
        let to_date = today + ChronoDuration::days(self.dte_window_days);

        let strike_count = self.strike_count.to_string();
        let from_date = today.format("%Y-%m-%d").to_string();
        let to_date = to_date.format("%Y-%m-%d").to_string();
        let mut params = vec![
            ("symbol", symbol.to_string()),
            ("contractType", "ALL".to_string()),
            ("strikeCount", strike_count),
            ("fromDate", from_date),
            ("toDate", to_date),
        ];
        if target_strike.is_finite() && target_strike > 0.0 {
            params.push(("strike", format!("{}", target_strike.round() as i64)));
        }

        let response = self
            .client
            .get(format!("{}/marketdata/v1/chains", self.base_url))
            .bearer_auth(&token)
            .query(&params)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        let chain: ChainResponse = response.json().await?;
        debug!(
            symbol,
            expirations = chain.call_exp_date_map.len() + chain.put_exp_date_map.len(),
            "fetched option chain"
        );
        Ok(chain)
    }
}

#[async_trait]
impl OrderBroker for RestBroker {
    async fn submit_order(
        &self,
        account_hash: &str,
        spec: &OrderSpec,
    ) -> Result<OrderAck, BrokerError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!(
                "{}/trader/v1/accounts/{}/orders",
                self.base_url, account_hash
            ))
            .bearer_auth(&token)
            .json(spec)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        let order_id = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(order_id_from_location);
        debug!(order_id = order_id.as_deref().unwrap_or("?"), "order accepted");
        Ok(OrderAck { order_id })
    }

    async fn query_orders(
        &self,
        account_hash: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<BrokerOrder>, BrokerError> {
        let token = self.access_token().await?;
        let (from_entered, to_entered) = entered_time_bounds(from, to);

        let response = self
            .client
            .get(format!(
                "{}/trader/v1/accounts/{}/orders",
                self.base_url, account_hash
            ))
            .bearer_auth(&token)
            .query(&[
                ("fromEnteredTime", from_entered.as_str()),
                ("toEnteredTime", to_entered.as_str()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        let orders: Vec<BrokerOrder> = response.json().await?;
        Ok(orders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_prefers_first_present_key() {
        let value = serde_json::json!({"accessToken": "abc", "token": "def"});
        assert_eq!(
            pick(&value, &["access_token", "accessToken", "token"]),
            Some("abc".to_string())
        );
        assert_eq!(pick(&value, &["missing"]), None);
    }

    #[test]
    fn pick_f64_skips_non_finite() {
        let value = serde_json::json!({"a": "not a number", "b": 2.5});
        assert_eq!(pick_f64(&value, &["a", "b"]), Some(2.5));
    }

    #[test]
    fn order_id_comes_from_last_location_segment() {
        assert_eq!(
            order_id_from_location("https://api.example.com/trader/v1/accounts/HX1/orders/4567"),
            Some("4567".to_string())
        );
        assert_eq!(
            order_id_from_location("https://api.example.com/orders/999/"),
            Some("999".to_string())
        );
    }

    #[test]
    fn entered_time_bounds_span_full_days() {
        let from = NaiveDate::from_ymd_opt(2025, 5, 8).unwrap();
        let to = NaiveDate::from_ymd_opt(2025, 5, 9).unwrap();
        let (lo, hi) = entered_time_bounds(from, to);
        assert_eq!(lo, "2025-05-08T00:00:00.000Z");
        assert_eq!(hi, "2025-05-09T23:59:59.000Z");
    }
}
