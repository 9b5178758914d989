//! Paper trading book
//!
//! Implements swaps and ledger reads in memory, filled at live quotes. Buys
//! settle only after a configurable delay so the pending-credit path runs
//! exactly as it does against a real chain.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::info;

use super::{
    to_raw, to_ui, Ledger, PostBalance, QuoteService, SwapService, TokenBalance, TxDetails,
};
use crate::error::{Error, Result};
use crate::strategy::{LAMPORTS_PER_SOL, SOL_MINT};

/// Default decimals when no decimals source is attached
const DEFAULT_DECIMALS: u8 = 6;

#[derive(Debug, Clone)]
struct PaperTrade {
    mint: String,
    /// Token delta credited at settlement
    credit: f64,
    settles_at: Instant,
}

#[derive(Debug, Default)]
struct Book {
    sol: f64,
    holdings: HashMap<String, f64>,
    pending: HashMap<String, PaperTrade>,
    settled: HashMap<String, String>,
    seq: u64,
}

impl Book {
    fn settle(&mut self, now: Instant) {
        let due: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, t)| t.settles_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in due {
            if let Some(trade) = self.pending.remove(&id) {
                *self.holdings.entry(trade.mint.clone()).or_insert(0.0) += trade.credit;
                self.settled.insert(id, trade.mint);
            }
        }
    }
}

pub struct PaperBook {
    owner: String,
    quotes: Arc<dyn QuoteService>,
    decimals_source: Option<Arc<dyn Ledger>>,
    credit_delay: Duration,
    fee_sol: f64,
    book: Mutex<Book>,
}

impl PaperBook {
    pub fn new(
        owner: &str,
        quotes: Arc<dyn QuoteService>,
        decimals_source: Option<Arc<dyn Ledger>>,
        starting_sol: f64,
        credit_delay: Duration,
        fee_sol: f64,
    ) -> Self {
        Self {
            owner: owner.to_string(),
            quotes,
            decimals_source,
            credit_delay,
            fee_sol,
            book: Mutex::new(Book {
                sol: starting_sol,
                ..Default::default()
            }),
        }
    }

    async fn decimals(&self, mint: &str) -> u8 {
        match &self.decimals_source {
            Some(source) => source.mint_decimals(mint).await.unwrap_or(DEFAULT_DECIMALS),
            None => DEFAULT_DECIMALS,
        }
    }

    fn next_ref(book: &mut Book) -> String {
        book.seq += 1;
        format!("paper-{}-{}", book.seq, uuid::Uuid::new_v4().simple())
    }
}

#[async_trait]
impl SwapService for PaperBook {
    async fn swap(
        &self,
        input: &str,
        output: &str,
        amount_ui: f64,
        slippage_bps: u16,
    ) -> Result<String> {
        if input == SOL_MINT {
            let lamports = to_raw(amount_ui, 9);
            let quote = self.quotes.quote(input, output, lamports, slippage_bps).await?;
            let decimals = self.decimals(output).await;

            let mut book = self.book.lock().await;
            let cost = amount_ui + self.fee_sol;
            if book.sol < cost {
                return Err(Error::InsufficientBalance {
                    available: book.sol,
                    required: cost,
                });
            }
            book.sol -= cost;
            let id = Self::next_ref(&mut book);
            let credit = to_ui(quote.out_amount, decimals);
            book.pending.insert(
                id.clone(),
                PaperTrade {
                    mint: output.to_string(),
                    credit,
                    settles_at: Instant::now() + self.credit_delay,
                },
            );
            info!(mint = %output, spend_sol = amount_ui, tokens = credit, tx = %id, "Paper buy");
            Ok(id)
        } else if output == SOL_MINT {
            let decimals = self.decimals(input).await;
            let quote = self
                .quotes
                .quote(input, output, to_raw(amount_ui, decimals), slippage_bps)
                .await?;

            let mut book = self.book.lock().await;
            book.settle(Instant::now());
            let held = book.holdings.get(input).copied().unwrap_or(0.0);
            if held + 1e-9 < amount_ui {
                return Err(Error::InsufficientBalance {
                    available: held,
                    required: amount_ui,
                });
            }
            let remaining = (held - amount_ui).max(0.0);
            book.holdings.insert(input.to_string(), remaining);
            let proceeds = quote.out_amount as f64 / LAMPORTS_PER_SOL - self.fee_sol;
            book.sol += proceeds.max(0.0);
            let id = Self::next_ref(&mut book);
            book.settled.insert(id.clone(), input.to_string());
            info!(mint = %input, tokens = amount_ui, proceeds_sol = proceeds, tx = %id, "Paper sell");
            Ok(id)
        } else {
            Err(Error::NoRoute {
                input: input.to_string(),
                output: output.to_string(),
            })
        }
    }
}

#[async_trait]
impl Ledger for PaperBook {
    async fn balance(&self, _owner: &str, mint: &str) -> Result<TokenBalance> {
        let decimals = self.decimals(mint).await;
        let mut book = self.book.lock().await;
        book.settle(Instant::now());
        Ok(TokenBalance {
            quantity: book.holdings.get(mint).copied().unwrap_or(0.0),
            decimals,
        })
    }

    async fn owner_scan(&self, owner: &str, mint: &str) -> Result<TokenBalance> {
        self.balance(owner, mint).await
    }

    async fn tx_details(&self, tx_ref: &str) -> Result<Option<TxDetails>> {
        let mut book = self.book.lock().await;
        book.settle(Instant::now());
        let Some(mint) = book.settled.get(tx_ref).cloned() else {
            return Ok(None);
        };
        let quantity = book.holdings.get(&mint).copied().unwrap_or(0.0);
        drop(book);
        Ok(Some(TxDetails {
            succeeded: true,
            post_balances: vec![PostBalance {
                owner: self.owner.clone(),
                decimals: self.decimals(&mint).await,
                mint,
                quantity,
            }],
        }))
    }

    async fn native_balance(&self, _owner: &str) -> Result<f64> {
        Ok(self.book.lock().await.sol)
    }

    async fn mint_decimals(&self, mint: &str) -> Result<u8> {
        Ok(self.decimals(mint).await)
    }

    async fn account_exists(&self, _owner: &str, mint: &str) -> Result<bool> {
        let book = self.book.lock().await;
        Ok(book.holdings.contains_key(mint))
    }

    async fn close_wrapped_dust(&self, _owner: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::mock::MockQuotes;

    fn book(delay_ms: u64) -> PaperBook {
        let quotes = Arc::new(MockQuotes::new());
        // 1 lamport buys 1 raw token unit (6 decimals): 1 SOL = 1000 tokens
        quotes.set_rate(SOL_MINT, "M", 1.0);
        quotes.set_rate("M", SOL_MINT, 1.0);
        PaperBook::new("me", quotes, None, 1.0, Duration::from_millis(delay_ms), 0.0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_buy_settles_after_delay() {
        let paper = book(2000);
        let tx = paper.swap(SOL_MINT, "M", 0.1, 100).await.unwrap();

        assert_eq!(paper.balance("me", "M").await.unwrap().quantity, 0.0);
        assert!(paper.tx_details(&tx).await.unwrap().is_none());

        tokio::time::advance(Duration::from_millis(2001)).await;
        assert_eq!(paper.balance("me", "M").await.unwrap().quantity, 100.0);
        let details = paper.tx_details(&tx).await.unwrap().unwrap();
        assert_eq!(details.post_balance("me", "M").unwrap().quantity, 100.0);
        assert!((paper.native_balance("me").await.unwrap() - 0.9).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sell_debits_immediately() {
        let paper = book(0);
        paper.swap(SOL_MINT, "M", 0.1, 100).await.unwrap();
        paper.swap("M", SOL_MINT, 100.0, 100).await.unwrap();
        assert_eq!(paper.balance("me", "M").await.unwrap().quantity, 0.0);
        assert!((paper.native_balance("me").await.unwrap() - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_overspend_rejected() {
        let paper = book(0);
        let err = paper.swap(SOL_MINT, "M", 5.0, 100).await.unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { .. }));
    }
}
