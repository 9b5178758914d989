//! Jupiter v6 quote API

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Quote, QuoteService};
use crate::error::{Error, Result};

/// Raw quote response (amounts are decimal strings)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    pub in_amount: String,
    pub out_amount: String,
    #[serde(default)]
    pub price_impact_pct: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error: Option<String>,
    error_code: Option<String>,
}

impl QuoteResponse {
    pub fn into_quote(self) -> Result<Quote> {
        let in_amount = self
            .in_amount
            .parse::<u64>()
            .map_err(|e| Error::Serialization(format!("inAmount: {}", e)))?;
        let out_amount = self
            .out_amount
            .parse::<u64>()
            .map_err(|e| Error::Serialization(format!("outAmount: {}", e)))?;
        // Jupiter reports impact as a fraction
        let price_impact_pct = self
            .price_impact_pct
            .and_then(|p| p.parse::<f64>().ok())
            .map(|p| p * 100.0)
            .unwrap_or(0.0);
        Ok(Quote {
            in_amount,
            out_amount,
            price_impact_pct,
        })
    }
}

pub struct JupiterQuotes {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retry_base_delay_ms: u64,
}

impl JupiterQuotes {
    pub fn new(base_url: &str, api_key: Option<String>, timeout_ms: u64) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(timeout_ms))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            retry_base_delay_ms: 150,
        }
    }

    /// Single attempt
    async fn quote_once(
        &self,
        input: &str,
        output: &str,
        amount: u64,
        slippage_bps: u16,
    ) -> Result<Quote> {
        let url = format!("{}/quote", self.base_url);
        let mut request = self.client.get(&url).query(&[
            ("inputMint", input.to_string()),
            ("outputMint", output.to_string()),
            ("amount", amount.to_string()),
            ("slippageBps", slippage_bps.to_string()),
        ]);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(Error::RateLimited("jupiter quote".to_string()));
        }
        if status.is_server_error() {
            return Err(Error::Upstream(format!("jupiter {}", status)));
        }
        if !status.is_success() {
            let body: ErrorResponse = resp.json().await.unwrap_or(ErrorResponse {
                error: None,
                error_code: None,
            });
            let code = body.error_code.unwrap_or_default();
            let message = body.error.unwrap_or_else(|| status.to_string());
            if code == "COULD_NOT_FIND_ANY_ROUTE" || code == "TOKEN_NOT_TRADABLE" {
                return Err(Error::NoRoute {
                    input: input.to_string(),
                    output: output.to_string(),
                });
            }
            return Err(Error::TemporaryNoRoute(message));
        }

        let quote: QuoteResponse = resp.json().await?;
        quote.into_quote()
    }
}

#[async_trait]
impl QuoteService for JupiterQuotes {
    async fn quote(
        &self,
        input: &str,
        output: &str,
        amount: u64,
        slippage_bps: u16,
    ) -> Result<Quote> {
        if amount == 0 {
            return Err(Error::BelowMinimum {
                amount: 0.0,
                minimum: 1.0,
            });
        }

        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(self.retry_base_delay_ms),
            max_interval: Duration::from_millis(self.retry_base_delay_ms * 4),
            max_elapsed_time: Some(Duration::from_millis(1500)),
            ..Default::default()
        };

        let quote = retry(backoff, || async {
            match self.quote_once(input, output, amount, slippage_bps).await {
                Ok(quote) => Ok(quote),
                Err(e) if e.is_retryable() => {
                    warn!("Retryable quote error: {}", e);
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await?;

        debug!(
            input = %input,
            output = %output,
            in_amount = quote.in_amount,
            out_amount = quote.out_amount,
            "Quote"
        );
        Ok(quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_response_parse() {
        let json = r#"{"inAmount":"100000000","outAmount":"4521000000","priceImpactPct":"0.0123","routePlan":[]}"#;
        let resp: QuoteResponse = serde_json::from_str(json).unwrap();
        let quote = resp.into_quote().unwrap();
        assert_eq!(quote.in_amount, 100_000_000);
        assert_eq!(quote.out_amount, 4_521_000_000);
        assert!((quote.price_impact_pct - 1.23).abs() < 1e-9);
    }

    #[test]
    fn test_bad_amount_is_serialization_error() {
        let resp = QuoteResponse {
            in_amount: "1".into(),
            out_amount: "abc".into(),
            price_impact_pct: None,
        };
        assert!(matches!(resp.into_quote(), Err(Error::Serialization(_))));
    }

    #[tokio::test]
    async fn test_zero_amount_rejected() {
        let quotes = JupiterQuotes::new("http://127.0.0.1:1", None, 100);
        let err = quotes.quote("A", "B", 0, 100).await.unwrap_err();
        assert!(matches!(err, Error::BelowMinimum { .. }));
    }
}
