//! Scripted in-memory collaborators
//!
//! Each mock counts its calls so tests can assert that a path did or did not
//! reach an upstream (e.g. zero swaps after a refused buy).

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{
    Ledger, Quote, QuoteService, RiskClassifier, SignalPanel, SwapService, TokenBalance,
    TxDetails,
};
use crate::error::{Error, Result};
use crate::strategy::{PanelSnapshot, RugSignal};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Panel with settable rows
#[derive(Default)]
pub struct MockPanel {
    rows: Mutex<HashMap<String, PanelSnapshot>>,
    discovered: Mutex<Vec<String>>,
    leader: Mutex<Option<String>>,
    momentum: Mutex<bool>,
    pub focus_calls: AtomicUsize,
}

impl MockPanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, mint: &str, row: PanelSnapshot) {
        lock(&self.rows).insert(mint.to_string(), row);
    }

    pub fn set_discovered(&self, mints: &[&str]) {
        *lock(&self.discovered) = mints.iter().map(|m| m.to_string()).collect();
    }

    pub fn set_leader(&self, mint: Option<&str>, momentum: bool) {
        *lock(&self.leader) = mint.map(str::to_string);
        *lock(&self.momentum) = momentum;
    }
}

#[async_trait]
impl SignalPanel for MockPanel {
    async fn focus(&self, mint: &str) -> Result<PanelSnapshot> {
        self.focus_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.rows)
            .get(mint)
            .cloned()
            .ok_or_else(|| Error::Upstream(format!("no panel row for {}", mint)))
    }

    async fn discover(&self, limit: usize) -> Result<Vec<String>> {
        Ok(lock(&self.discovered).iter().take(limit).cloned().collect())
    }

    async fn leader(&self) -> Result<Option<String>> {
        Ok(lock(&self.leader).clone())
    }

    async fn momentum_mode(&self) -> Result<bool> {
        Ok(*lock(&self.momentum))
    }
}

/// Risk classifier with settable signals (default calm, zero severity)
#[derive(Default)]
pub struct MockRisk {
    signals: Mutex<HashMap<String, RugSignal>>,
    failing: Mutex<bool>,
}

impl MockRisk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, mint: &str, signal: RugSignal) {
        lock(&self.signals).insert(mint.to_string(), signal);
    }

    /// Make every lookup fail until switched back
    pub fn set_failing(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }
}

#[async_trait]
impl RiskClassifier for MockRisk {
    async fn risk_signal(&self, mint: &str) -> Result<RugSignal> {
        if *lock(&self.failing) {
            return Err(Error::Upstream(format!("risk lookup failed for {}", mint)));
        }
        Ok(lock(&self.signals).get(mint).copied().unwrap_or_default())
    }
}

/// Quotes at a fixed rate per route: `out = in * rate`
#[derive(Default)]
pub struct MockQuotes {
    rates: Mutex<HashMap<(String, String), f64>>,
    failing: Mutex<HashSet<(String, String)>>,
    pub calls: AtomicUsize,
}

impl MockQuotes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_rate(&self, input: &str, output: &str, rate: f64) {
        lock(&self.rates).insert((input.to_string(), output.to_string()), rate);
    }

    /// Make a route return an error instead of a quote
    pub fn fail_route(&self, input: &str, output: &str) {
        lock(&self.failing).insert((input.to_string(), output.to_string()));
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuoteService for MockQuotes {
    async fn quote(
        &self,
        input: &str,
        output: &str,
        amount: u64,
        _slippage_bps: u16,
    ) -> Result<Quote> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = (input.to_string(), output.to_string());
        if lock(&self.failing).contains(&key) {
            return Err(Error::NoRoute {
                input: input.to_string(),
                output: output.to_string(),
            });
        }
        let rate = lock(&self.rates).get(&key).copied().ok_or_else(|| Error::NoRoute {
            input: input.to_string(),
            output: output.to_string(),
        })?;
        Ok(Quote {
            in_amount: amount,
            out_amount: (amount as f64 * rate).floor() as u64,
            price_impact_pct: 0.0,
        })
    }
}

/// One recorded swap
#[derive(Debug, Clone, PartialEq)]
pub struct SwapCall {
    pub input: String,
    pub output: String,
    pub amount_ui: f64,
}

/// Swap service that records submissions
#[derive(Default)]
pub struct MockSwap {
    calls: Mutex<Vec<SwapCall>>,
    failures: Mutex<VecDeque<Error>>,
}

impl MockSwap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error for the next submission
    pub fn fail_next(&self, error: Error) {
        lock(&self.failures).push_back(error);
    }

    pub fn calls(&self) -> Vec<SwapCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

#[async_trait]
impl SwapService for MockSwap {
    async fn swap(
        &self,
        input: &str,
        output: &str,
        amount_ui: f64,
        _slippage_bps: u16,
    ) -> Result<String> {
        let mut calls = lock(&self.calls);
        calls.push(SwapCall {
            input: input.to_string(),
            output: output.to_string(),
            amount_ui,
        });
        let n = calls.len();
        drop(calls);

        if let Some(error) = lock(&self.failures).pop_front() {
            return Err(error);
        }
        Ok(format!("mock-tx-{}", n))
    }
}

/// Ledger with scripted balance sequences
///
/// A scripted sequence yields one value per call and repeats its last value
/// once exhausted.
#[derive(Default)]
pub struct MockLedger {
    balances: Mutex<HashMap<String, VecDeque<f64>>>,
    scans: Mutex<HashMap<String, VecDeque<f64>>>,
    txs: Mutex<HashMap<String, TxDetails>>,
    decimals: Mutex<HashMap<String, u8>>,
    existing_accounts: Mutex<HashSet<String>>,
    native: Mutex<f64>,
    stressed: Mutex<usize>,
    pub balance_calls: AtomicUsize,
    pub scan_calls: AtomicUsize,
    pub tx_calls: AtomicUsize,
    pub dust_closes: AtomicUsize,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_balance(&self, mint: &str, values: &[f64]) {
        lock(&self.balances).insert(mint.to_string(), values.iter().copied().collect());
    }

    pub fn set_balance(&self, mint: &str, value: f64) {
        self.script_balance(mint, &[value]);
    }

    pub fn script_scan(&self, mint: &str, values: &[f64]) {
        lock(&self.scans).insert(mint.to_string(), values.iter().copied().collect());
    }

    pub fn set_tx(&self, tx_ref: &str, details: TxDetails) {
        lock(&self.txs).insert(tx_ref.to_string(), details);
    }

    pub fn set_decimals(&self, mint: &str, decimals: u8) {
        lock(&self.decimals).insert(mint.to_string(), decimals);
    }

    pub fn set_account_exists(&self, mint: &str) {
        lock(&self.existing_accounts).insert(mint.to_string());
    }

    pub fn set_native(&self, sol: f64) {
        *lock(&self.native) = sol;
    }

    /// Make the next `n` balance polls fail with a rate-limit error
    pub fn stress(&self, n: usize) {
        *lock(&self.stressed) = n;
    }

    fn next(script: &Mutex<HashMap<String, VecDeque<f64>>>, mint: &str) -> f64 {
        let mut scripts = lock(script);
        match scripts.get_mut(mint) {
            Some(seq) if seq.len() > 1 => seq.pop_front().unwrap_or(0.0),
            Some(seq) => seq.front().copied().unwrap_or(0.0),
            None => 0.0,
        }
    }

    fn decimals_of(&self, mint: &str) -> u8 {
        lock(&self.decimals).get(mint).copied().unwrap_or(6)
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn balance(&self, _owner: &str, mint: &str) -> Result<TokenBalance> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut stressed = lock(&self.stressed);
            if *stressed > 0 {
                *stressed -= 1;
                return Err(Error::RateLimited("mock ledger stressed".into()));
            }
        }
        Ok(TokenBalance {
            quantity: Self::next(&self.balances, mint),
            decimals: self.decimals_of(mint),
        })
    }

    async fn owner_scan(&self, _owner: &str, mint: &str) -> Result<TokenBalance> {
        self.scan_calls.fetch_add(1, Ordering::SeqCst);
        Ok(TokenBalance {
            quantity: Self::next(&self.scans, mint),
            decimals: self.decimals_of(mint),
        })
    }

    async fn tx_details(&self, tx_ref: &str) -> Result<Option<TxDetails>> {
        self.tx_calls.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.txs).get(tx_ref).cloned())
    }

    async fn native_balance(&self, _owner: &str) -> Result<f64> {
        Ok(*lock(&self.native))
    }

    async fn mint_decimals(&self, mint: &str) -> Result<u8> {
        Ok(self.decimals_of(mint))
    }

    async fn account_exists(&self, _owner: &str, mint: &str) -> Result<bool> {
        Ok(lock(&self.existing_accounts).contains(mint))
    }

    async fn close_wrapped_dust(&self, _owner: &str) -> Result<Option<String>> {
        self.dust_closes.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_balance_repeats_last() {
        let ledger = MockLedger::new();
        ledger.script_balance("M", &[0.0, 0.0, 1000.0]);
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(ledger.balance("me", "M").await.unwrap().quantity);
        }
        assert_eq!(seen, vec![0.0, 0.0, 1000.0, 1000.0, 1000.0]);
        assert_eq!(ledger.balance_calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_failing_route() {
        let quotes = MockQuotes::new();
        quotes.set_rate("A", "B", 2.0);
        assert_eq!(quotes.quote("A", "B", 10, 0).await.unwrap().out_amount, 20);
        quotes.fail_route("A", "B");
        assert!(quotes.quote("A", "B", 10, 0).await.is_err());
        assert_eq!(quotes.call_count(), 2);
    }
}
