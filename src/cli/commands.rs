//! CLI command implementations

use anyhow::{Context, Result};
use dialoguer::Confirm;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::build_services;
use crate::config::Config;
use crate::engine::Engine;
use crate::persist::{Settings, StateStore};
use crate::strategy::SelectionMode;

/// Runtime settings changes accepted by the `settings` command
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsChange {
    Show,
    Enable,
    Disable,
    Mode(SelectionMode),
    BuyFraction(f64),
    PollMs(u64),
}

/// Open the state file and overlay persisted settings on `config`
async fn open_state(config: &mut Config) -> Result<Arc<StateStore>> {
    let store = StateStore::open(&config.engine.state_path)
        .await
        .with_context(|| format!("Failed to open state file {}", config.engine.state_path))?;
    if let Some(settings) = store.settings().await {
        config.apply_settings(&settings);
    }
    Ok(Arc::new(store))
}

/// Start the engine and run until Ctrl-C
pub async fn start(mut config: Config, dry_run: bool) -> Result<()> {
    if dry_run {
        warn!("Running in DRY-RUN mode - trades are filled by the paper book");
    }
    let store = open_state(&mut config).await?;
    config.validate()?;

    info!("Starting sniper engine...");
    info!(
        "Buy fraction: {}, range {} - {} SOL, Slippage: {}bps, Mode: {}",
        config.trading.buy_fraction,
        config.trading.min_buy_sol,
        config.trading.max_buy_sol,
        config.trading.slippage_bps,
        config.selection.mode
    );

    let services = build_services(&config, dry_run)?;
    let engine = Arc::new(Engine::new(config, services, store));

    if let Some(position) = engine.restore().await {
        info!(
            "Resuming position {} ({} units, cost {:.4} SOL, awaiting credit: {})",
            position.mint, position.size_ui, position.cost_basis_sol, position.awaiting_size_sync
        );
    }
    if !engine.settings().await.enabled {
        warn!("Engine disabled: the open position is managed but no new buys are made");
    }

    engine.start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    match engine.stop().await {
        Ok(Some(report)) => {
            println!("\nLiquidated {} on stop", report.mint);
            println!("  Sold: {:.4} units", report.sold_ui);
            println!("  Proceeds: {:.6} SOL", report.proceeds_sol);
            if let Some(tx) = &report.tx_ref {
                println!("  Signature: {}", tx);
            }
        }
        Ok(None) => info!("Stopped with nothing to liquidate"),
        Err(e) => {
            error!("Stop liquidation failed: {}", e);
            anyhow::bail!("Position left open: {}", e);
        }
    }
    Ok(())
}

/// Manually liquidate the current position
pub async fn sell(mut config: Config, percent: f64, force: bool, dry_run: bool) -> Result<()> {
    if percent <= 0.0 || percent > 100.0 {
        anyhow::bail!("Percentage must be between 0 and 100");
    }
    let store = open_state(&mut config).await?;
    let services = build_services(&config, dry_run)?;
    let engine = Engine::new(config, services, store);

    let Some(position) = engine.restore().await else {
        println!("No open position.");
        return Ok(());
    };

    let valuation = engine.valuation().await?;
    if let Some(v) = &valuation {
        println!(
            "\n{}: {:.4} units, cost {:.4} SOL, value {:.6} SOL ({:+.2}%)",
            position.mint,
            position.size_ui,
            position.cost_basis_sol,
            v.net_sol(),
            position.pnl_pct(v.net_sol())
        );
    }

    if !force {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Sell {}% of {}? This cannot be undone.",
                percent, position.mint
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            info!("Sell cancelled by user");
            return Ok(());
        }
    }

    if dry_run {
        info!("DRY-RUN: Would sell {}% of {}", percent, position.mint);
        return Ok(());
    }

    let report = if percent >= 100.0 {
        engine.liquidate("MANUAL").await?
    } else {
        Some(engine.sell_now(Some(percent)).await?)
    };
    match report {
        Some(report) => {
            println!("\nSell confirmed!");
            println!("  Sold: {:.4} units, remaining {:.4}", report.sold_ui, report.remaining_ui);
            println!("  Proceeds: {:.6} SOL", report.proceeds_sol);
            if let Some(tx) = &report.tx_ref {
                println!("  Signature: {}", tx);
                println!("  View on Solscan: https://solscan.io/tx/{}", tx);
            }
        }
        None => println!("Credit still pending; nothing sold."),
    }
    Ok(())
}

/// Show the persisted position and settings
pub async fn status(mut config: Config, json: bool) -> Result<()> {
    let store = open_state(&mut config).await?;
    let state = store.snapshot().await;
    let settings = state
        .settings
        .clone()
        .unwrap_or_else(|| Settings::from_config(&config));

    if json {
        let out = serde_json::json!({
            "settings": settings,
            "position": state.position,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("\n=== SNIPER ENGINE STATUS ===\n");
    println!("Enabled: {}", settings.enabled);
    println!("Selection mode: {}", settings.selection_mode);
    println!("Poll interval: {}ms", settings.poll_ms);
    println!("Buy fraction: {}", settings.buy_fraction);
    println!(
        "Profit target: start {}% floor {}%",
        settings.profit_target.start_pct, settings.profit_target.floor_pct
    );

    println!("\n=== POSITION ===\n");
    match &state.position {
        Some(p) => {
            println!("Mint: {}", p.mint);
            println!("Entry: {} at {}", p.entry_mode, p.acquired_at);
            println!("Size: {:.4} (decimals {})", p.size_ui, p.decimals);
            println!("Cost basis: {:.6} SOL", p.cost_basis_sol);
            println!("Realized: {:.6} SOL", p.realized_sol);
            println!("Awaiting credit: {}", p.awaiting_size_sync);
            if let Some(tx) = &p.entry_tx {
                println!("Entry tx: {}", tx);
            }
        }
        None => println!("No open position."),
    }
    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Run the round-trip edge estimate once
pub async fn edge(config: Config, mint: &str, sol: Option<f64>) -> Result<()> {
    let spend = sol.unwrap_or(config.trading.max_buy_sol);
    let services = build_services(&config, true)?;
    let store = Arc::new(StateStore::in_memory());
    let engine = Engine::new(config, services, store);

    let edge = engine
        .edge(mint, spend)
        .await
        .with_context(|| format!("Round trip failed for {}", mint))?;
    let limit = engine.config().edge.max_round_trip_loss_pct;

    println!("\n=== ROUND TRIP {} ===\n", mint);
    println!("Spend: {:.6} SOL", edge.spend_sol);
    println!("Asset out (raw): {}", edge.asset_out_raw);
    println!("Gross back: {:.6} SOL", edge.proceeds.gross_sol);
    println!(
        "Platform fee: {:.6} SOL (applied: {})",
        edge.proceeds.platform_fee_sol, edge.proceeds.fee_applied
    );
    println!("Fixed costs: {:.6} SOL (ATA exists: {})", edge.proceeds.fixed_costs_sol, edge.ata_exists);
    println!("Net back: {:.6} SOL", edge.proceeds.net_sol);
    println!("Edge: {:+.2}% (limit -{:.2}%)", edge.edge_pct, limit);
    println!(
        "Verdict: {}",
        if edge.edge_pct < -limit { "REFUSE" } else { "OK" }
    );
    Ok(())
}

/// Apply `change` to the persisted settings
pub async fn settings(mut config: Config, change: SettingsChange) -> Result<()> {
    let store = open_state(&mut config).await?;
    let mut settings = store
        .settings()
        .await
        .unwrap_or_else(|| Settings::from_config(&config));

    match change {
        SettingsChange::Show => {}
        SettingsChange::Enable => settings.enabled = true,
        SettingsChange::Disable => settings.enabled = false,
        SettingsChange::Mode(mode) => settings.selection_mode = mode,
        SettingsChange::BuyFraction(f) => {
            if f <= 0.0 || f > 1.0 {
                anyhow::bail!("buy fraction must be in (0, 1]");
            }
            settings.buy_fraction = f;
        }
        SettingsChange::PollMs(ms) => {
            if ms == 0 {
                anyhow::bail!("poll interval must be positive");
            }
            settings.poll_ms = ms;
        }
    }

    if change != SettingsChange::Show {
        store.save_settings(settings.clone()).await?;
        info!("Settings saved to {}", config.engine.state_path);
    }
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_settings_persist_across_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.engine.state_path = dir.path().join("state.json").to_string_lossy().to_string();

        settings(config.clone(), SettingsChange::Disable).await.unwrap();
        settings(config.clone(), SettingsChange::PollMs(900)).await.unwrap();
        settings(config.clone(), SettingsChange::Mode(SelectionMode::Leader))
            .await
            .unwrap();

        let mut reloaded = config.clone();
        open_state(&mut reloaded).await.unwrap();
        assert!(!reloaded.engine.enabled);
        assert_eq!(reloaded.engine.tick_ms, 900);
        assert_eq!(reloaded.selection.mode, SelectionMode::Leader);
    }

    #[tokio::test]
    async fn test_settings_reject_bad_fraction() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.engine.state_path = dir.path().join("state.json").to_string_lossy().to_string();
        assert!(settings(config, SettingsChange::BuyFraction(1.5)).await.is_err());
    }
}
