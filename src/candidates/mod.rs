//! Candidate discovery
//!
//! Sources of underlying tickers to analyze each cycle:
//! - `MostActiveSource`: scrapes the most-active stocks page and pulls
//!   the embedded trending-tickers JSON
//! - `LlmSource`: asks an OpenAI-compatible chat endpoint for a
//!   `{"candidates": [...]}` reply, and serves per-ticker fundamentals
//! - `StaticSource`: fixed list for dry runs and tests

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::CandidatesConfig;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

const SCANNER_SYSTEM_PROMPT: &str = "You are a market scanner agent. \
Reply with a JSON object of the form {\"candidates\": [\"AAPL\", \"MSFT\"]} \
listing ticker symbols of today's most active U.S. equities. Output the JSON only.";

const FUNDAMENTALS_SYSTEM_PROMPT: &str = "You are an options trading assistant. \
Reply with a JSON object holding a \"fundamentals\" field with earnings, dividends \
and upcoming corporate events for the requested ticker. Output the JSON only.";

/// Supplier of tickers to analyze
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Tickers to analyze this cycle, most interesting first
    async fn fetch_candidates(&self) -> Result<Vec<String>>;

    /// Opaque fundamentals payload for a ticker; `None` when the source
    /// has nothing to offer
    async fn fetch_fundamentals(&self, ticker: &str) -> Result<Option<serde_json::Value>>;
}

/// Build the configured candidate source
pub fn build_source(config: &CandidatesConfig) -> Result<Arc<dyn CandidateSource>> {
    match config.source.as_str() {
        "most_active" => Ok(Arc::new(MostActiveSource::new(
            &config.most_active_url,
            config.top_n,
        ))),
        "llm" => Ok(Arc::new(LlmSource::new(
            &config.llm_endpoint,
            &config.llm_model,
            None,
        ))),
        "static" => Ok(Arc::new(StaticSource::new(config.static_tickers.clone()))),
        other => bail!("unknown candidate source '{other}' (expected most_active, llm or static)"),
    }
}

/// Scrapes the most-active stocks page
pub struct MostActiveSource {
    client: Client,
    url: String,
    top_n: usize,
}

impl MostActiveSource {
    pub fn new(url: &str, top_n: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(BROWSER_USER_AGENT)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            url: url.to_string(),
            top_n: top_n.max(1),
        }
    }
}

#[async_trait]
impl CandidateSource for MostActiveSource {
    async fn fetch_candidates(&self) -> Result<Vec<String>> {
        // Randomized politeness delay so repeated fetches do not look
        // like a scripted burst
        let delay = rand::thread_rng().gen_range(1.0..3.0);
        tokio::time::sleep(Duration::from_secs_f64(delay)).await;

        let response = self
            .client
            .get(&self.url)
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await
            .context("Failed to fetch most-active page")?;
        if !response.status().is_success() {
            bail!("most-active page returned status {}", response.status());
        }

        let html = response.text().await.context("Failed to read page body")?;
        let payload = extract_embedded_json(&html, "fin-trending-tickers")
            .context("trending tickers script not found in page")?;
        let symbols = parse_trending_symbols(payload, self.top_n)?;

        debug!(count = symbols.len(), "scraped most-active symbols");
        Ok(symbols)
    }

    async fn fetch_fundamentals(&self, _ticker: &str) -> Result<Option<serde_json::Value>> {
        Ok(None)
    }
}

/// Asks an OpenAI-compatible chat-completion endpoint
pub struct LlmSource {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl LlmSource {
    pub fn new(endpoint: &str, model: &str, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            api_key,
        }
    }

    fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            return Some(key.clone());
        }
        for var in ["OPENAI_API_KEY", "LLM_API_KEY"] {
            if let Ok(value) = std::env::var(var) {
                if !value.trim().is_empty() {
                    return Some(value);
                }
            }
        }
        None
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = self.resolve_api_key() {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.context("Failed to reach LLM endpoint")?;
        if !response.status().is_success() {
            bail!("LLM endpoint returned status {}", response.status());
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse LLM response")?;
        let content = raw
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .context("LLM response has no message content")?;
        Ok(content.to_string())
    }
}

#[async_trait]
impl CandidateSource for LlmSource {
    async fn fetch_candidates(&self) -> Result<Vec<String>> {
        let content = self
            .chat(
                SCANNER_SYSTEM_PROMPT,
                "List today's ten most active U.S. equities in the JSON format specified.",
            )
            .await?;
        let candidates = parse_candidates_payload(&content)?;
        debug!(count = candidates.len(), "LLM returned candidates");
        Ok(candidates)
    }

    async fn fetch_fundamentals(&self, ticker: &str) -> Result<Option<serde_json::Value>> {
        let user = format!(
            "What are the fundamentals and corporate events for {ticker} in the next 30 days?"
        );
        let content = match self.chat(FUNDAMENTALS_SYSTEM_PROMPT, &user).await {
            Ok(content) => content,
            Err(err) => {
                warn!(ticker, error = %err, "fundamentals lookup failed");
                return Ok(None);
            }
        };

        let json_text = extract_fenced_json(&content).unwrap_or(content.as_str());
        let Ok(parsed) = serde_json::from_str::<serde_json::Value>(json_text) else {
            warn!(ticker, "fundamentals reply was not valid JSON");
            return Ok(None);
        };
        Ok(parsed.get("fundamentals").cloned().or(Some(parsed)))
    }
}

/// Fixed ticker list
pub struct StaticSource {
    tickers: Vec<String>,
}

impl StaticSource {
    pub fn new(tickers: Vec<String>) -> Self {
        Self { tickers }
    }
}

#[async_trait]
impl CandidateSource for StaticSource {
    async fn fetch_candidates(&self) -> Result<Vec<String>> {
        Ok(normalize_symbols(self.tickers.iter().map(|s| s.as_str()), usize::MAX))
    }

    async fn fetch_fundamentals(&self, _ticker: &str) -> Result<Option<serde_json::Value>> {
        Ok(None)
    }
}

/// Body of `<script id="...">...</script>` in an HTML document
fn extract_embedded_json<'a>(html: &'a str, script_id: &str) -> Option<&'a str> {
    let marker = format!("id=\"{script_id}\"");
    let tag_pos = html.find(&marker)?;
    let after_tag = &html[tag_pos..];
    let body_start = after_tag.find('>')? + 1;
    let body = &after_tag[body_start..];
    let body_end = body.find("</script>")?;
    Some(body[..body_end].trim())
}

/// Content of the first ```json fenced block
fn extract_fenced_json(text: &str) -> Option<&str> {
    let start = text.find("```json")? + "```json".len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

fn parse_trending_symbols(json_text: &str, top_n: usize) -> Result<Vec<String>> {
    let entries: Vec<serde_json::Value> =
        serde_json::from_str(json_text).context("trending tickers payload is not a JSON array")?;
    Ok(normalize_symbols(
        entries
            .iter()
            .filter_map(|entry| entry.get("symbol").and_then(|s| s.as_str())),
        top_n,
    ))
}

fn parse_candidates_payload(content: &str) -> Result<Vec<String>> {
    let json_text = extract_fenced_json(content).unwrap_or(content);
    let parsed: serde_json::Value =
        serde_json::from_str(json_text).context("candidates reply is not valid JSON")?;
    let list = parsed
        .get("candidates")
        .and_then(|v| v.as_array())
        .context("candidates reply has no candidates array")?;
    Ok(normalize_symbols(
        list.iter().filter_map(|v| v.as_str()),
        usize::MAX,
    ))
}

/// Uppercase, trim, drop empties and duplicates, keep order
fn normalize_symbols<'a>(raw: impl Iterator<Item = &'a str>, top_n: usize) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    for symbol in raw {
        let symbol = symbol.trim().to_uppercase();
        if !symbol.is_empty() && !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    symbols.truncate(top_n);
    symbols
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_json_is_extracted_from_script_tag() {
        let html = r#"<html><head>
            <script id="other">{"x":1}</script>
            <script id="fin-trending-tickers" type="application/json">
                [{"symbol":"AAPL"},{"symbol":"TSLA"}]
            </script>
        </head></html>"#;
        let payload = extract_embedded_json(html, "fin-trending-tickers").unwrap();
        assert!(payload.starts_with('['));
        assert!(payload.contains("TSLA"));
        assert!(extract_embedded_json(html, "missing").is_none());
    }

    #[test]
    fn trending_symbols_dedupe_and_truncate() {
        let payload = r#"[
            {"symbol":"aapl"},
            {"symbol":"TSLA"},
            {"symbol":"AAPL"},
            {"shortName":"No symbol"},
            {"symbol":"NVDA"}
        ]"#;
        let symbols = parse_trending_symbols(payload, 2).unwrap();
        assert_eq!(symbols, vec!["AAPL", "TSLA"]);
    }

    #[test]
    fn candidates_payload_parses_bare_and_fenced_json() {
        let bare = r#"{"candidates":["AAPL","MSFT"]}"#;
        assert_eq!(
            parse_candidates_payload(bare).unwrap(),
            vec!["AAPL", "MSFT"]
        );

        let fenced = "Here you go:\n```json\n{\"candidates\":[\"amd\",\"AMD\",\"NVDA\"]}\n```";
        assert_eq!(
            parse_candidates_payload(fenced).unwrap(),
            vec!["AMD", "NVDA"]
        );

        assert!(parse_candidates_payload("no json here").is_err());
    }

    #[test]
    fn fenced_extraction_requires_closing_marker() {
        assert_eq!(
            extract_fenced_json("```json\n{\"a\":1}\n```"),
            Some("{\"a\":1}")
        );
        assert!(extract_fenced_json("```json\n{\"a\":1}").is_none());
    }

    #[tokio::test]
    async fn static_source_normalizes_its_list() {
        let source = StaticSource::new(vec![
            " aapl ".to_string(),
            "TSLA".to_string(),
            "AAPL".to_string(),
            String::new(),
        ]);
        let symbols = source.fetch_candidates().await.unwrap();
        assert_eq!(symbols, vec!["AAPL", "TSLA"]);
        assert!(source.fetch_fundamentals("AAPL").await.unwrap().is_none());
    }
}
