//! Outbound notifications
//!
//! Posts trade and alert messages to a configured webhook as
//! `{subject, body, html}` JSON, optionally signed with HMAC-SHA256.
//! Falls back to log-only when no webhook is configured. Delivery
//! failures are logged and swallowed so a dead webhook can never stop
//! a trading cycle.

use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::NotifyConfig;
use crate::types::SelectedTrade;

#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    subject: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<&'a str>,
}

/// Webhook notifier shared across the agent
#[derive(Clone)]
pub struct Notifier {
    client: Client,
    webhook_url: Option<String>,
    sign_key: Option<String>,
}

impl Notifier {
    pub fn new(webhook_url: Option<String>, sign_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            webhook_url: webhook_url.filter(|u| !u.trim().is_empty()),
            sign_key: sign_key.filter(|k| !k.trim().is_empty()),
        }
    }

    pub fn from_config(config: &NotifyConfig) -> Self {
        Self::new(config.webhook_url.clone(), config.sign_key.clone())
    }

    /// Deliver a message, or log it when no webhook is configured
    pub async fn send(&self, subject: &str, body: &str, html: Option<String>) {
        let Some(url) = &self.webhook_url else {
            info!(subject, "notification (webhook not configured)");
            debug!(%body, "notification body");
            return;
        };

        let message = WebhookMessage {
            subject,
            body,
            html: html.as_deref(),
        };
        let payload = match serde_json::to_string(&message) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(subject, error = %err, "failed to encode notification");
                return;
            }
        };

        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(payload.clone());
        if let Some(key) = &self.sign_key {
            let timestamp = Utc::now().timestamp();
            match sign_payload(key, timestamp, &payload) {
                Ok(signature) => {
                    request = request
                        .header("X-Timestamp", timestamp.to_string())
                        .header("X-Signature", signature);
                }
                Err(err) => warn!(subject, error = %err, "failed to sign notification"),
            }
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!(subject, "notification delivered");
            }
            Ok(response) => {
                warn!(subject, status = %response.status(), "webhook rejected notification");
            }
            Err(err) => {
                warn!(subject, error = %err, "failed to deliver notification");
            }
        }
    }

    /// Announce one selected trade before its entry order goes out,
    /// with any fundamentals context the candidate source offered
    pub async fn trade_alert(
        &self,
        trade: &SelectedTrade,
        fundamentals: Option<&serde_json::Value>,
    ) {
        let subject = format!("Trade Notification: {}", trade.symbol);
        let body = trade_body(trade, fundamentals);
        let html = trade_html(trade, fundamentals);
        self.send(&subject, &body, Some(html)).await;
    }

    pub async fn error_alert(&self, context: &str, error: &str) {
        let body = format!("Context: {context}\nError: {error}");
        self.send("ERROR ALERT", &body, None).await;
    }

    pub async fn low_cash_alert(&self, available_cash: f64, minimum: f64) {
        let body = format!(
            "Available cash ${available_cash:.2} is below the ${minimum:.2} minimum. \
Skipping this trading cycle."
        );
        self.send("Low Cash Alert", &body, None).await;
    }
}

fn trade_fields(trade: &SelectedTrade) -> Vec<(&'static str, String)> {
    vec![
        ("Symbol", trade.symbol.clone()),
        ("Contract", trade.contract_symbol.clone()),
        ("Type", trade.right.to_string()),
        (
            "Premium per Contract",
            format!("${:.2}", trade.premium_per_contract),
        ),
        ("Exit Premium", format!("${:.2}", trade.exit_premium)),
        ("Stop Loss", format!("${:.2}", trade.stop_loss)),
        ("Quantity", trade.contracts_to_buy.to_string()),
        ("Possible Total Cost", format!("${:.2}", trade.total_cost)),
        (
            "Possible Total Profit",
            format!("${:.2}", trade.total_profit),
        ),
        ("Acceptable Total Loss", format!("${:.2}", trade.total_loss)),
    ]
}

fn trade_body(trade: &SelectedTrade, fundamentals: Option<&serde_json::Value>) -> String {
    let mut lines = trade_fields(trade)
        .into_iter()
        .map(|(label, value)| format!("{label}: {value}"))
        .collect::<Vec<_>>();
    if let Some(context) = fundamentals {
        lines.push(format!("Fundamentals:\n{}", fundamentals_block(context)));
    }
    lines.join("\n")
}

fn trade_html(trade: &SelectedTrade, fundamentals: Option<&serde_json::Value>) -> String {
    let mut rows = trade_fields(trade)
        .into_iter()
        .map(|(label, value)| format!("<p><b>{label}:</b> {value}</p>"))
        .collect::<Vec<_>>();
    if let Some(context) = fundamentals {
        let escaped = fundamentals_block(context)
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;");
        rows.push(format!("<p><b>Fundamentals:</b></p>\n<pre>{escaped}</pre>"));
    }
    format!("<html><body>\n{}\n</body></html>", rows.join("\n"))
}

fn fundamentals_block(context: &serde_json::Value) -> String {
    serde_json::to_string_pretty(context).unwrap_or_else(|_| context.to_string())
}

fn sign_payload(key: &str, timestamp: i64, payload: &str) -> Result<String> {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac =
        HmacSha256::new_from_slice(key.as_bytes()).context("Failed to initialize HMAC")?;
    mac.update(format!("{timestamp}{payload}").as_bytes());
    Ok(general_purpose::URL_SAFE.encode(mac.finalize().into_bytes()))
}
