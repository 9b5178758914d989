//! Solana JSON-RPC ledger

use async_trait::async_trait;
use dashmap::DashMap;
use solana_account_decoder::parse_token::UiTokenAmount;
use solana_account_decoder::UiAccountData;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_client::rpc_request::TokenAccountsFilter;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::transaction::Transaction;
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::UiTransactionEncoding;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use super::{Ledger, PostBalance, TokenBalance, TxDetails};
use crate::error::{Error, Result};
use crate::strategy::LAMPORTS_PER_SOL;

fn parse_pubkey(s: &str) -> Result<Pubkey> {
    Pubkey::from_str(s).map_err(|e| Error::Config(format!("invalid pubkey {}: {}", s, e)))
}

/// Associated token account of `owner` for `mint`
pub fn derive_ata(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    spl_associated_token_account::get_associated_token_address(owner, mint)
}

fn ui_quantity(amount: &UiTokenAmount) -> f64 {
    amount
        .amount
        .parse::<u64>()
        .map(|raw| raw as f64 / 10f64.powi(amount.decimals as i32))
        .unwrap_or_else(|_| amount.ui_amount.unwrap_or(0.0))
}

fn is_missing_account(e: &solana_client::client_error::ClientError) -> bool {
    let msg = e.to_string().to_lowercase();
    msg.contains("could not find account") || msg.contains("invalid param")
}

pub struct RpcLedger {
    rpc: Arc<RpcClient>,
    /// Needed only to close wrapped-SOL dust
    signer: Option<Arc<Keypair>>,
    commitment: CommitmentConfig,
    decimals: DashMap<String, u8>,
}

impl RpcLedger {
    pub fn new(rpc: Arc<RpcClient>, signer: Option<Arc<Keypair>>) -> Self {
        Self {
            rpc,
            signer,
            commitment: CommitmentConfig::confirmed(),
            decimals: DashMap::new(),
        }
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn balance(&self, owner: &str, mint: &str) -> Result<TokenBalance> {
        let ata = derive_ata(&parse_pubkey(owner)?, &parse_pubkey(mint)?);
        match self
            .rpc
            .get_token_account_balance_with_commitment(&ata, self.commitment)
            .await
        {
            Ok(resp) => Ok(TokenBalance {
                quantity: ui_quantity(&resp.value),
                decimals: resp.value.decimals,
            }),
            Err(e) if is_missing_account(&e) => Ok(TokenBalance {
                quantity: 0.0,
                decimals: self.mint_decimals(mint).await.unwrap_or(0),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn owner_scan(&self, owner: &str, mint: &str) -> Result<TokenBalance> {
        let accounts = self
            .rpc
            .get_token_accounts_by_owner(
                &parse_pubkey(owner)?,
                TokenAccountsFilter::Mint(parse_pubkey(mint)?),
            )
            .await?;

        let mut total = TokenBalance::default();
        for keyed in accounts {
            if let UiAccountData::Json(parsed) = keyed.account.data {
                let token_amount = &parsed.parsed["info"]["tokenAmount"];
                if let Ok(amount) = serde_json::from_value::<UiTokenAmount>(token_amount.clone()) {
                    total.quantity += ui_quantity(&amount);
                    total.decimals = amount.decimals;
                }
            }
        }
        debug!(owner = %owner, mint = %mint, quantity = total.quantity, "Owner scan");
        Ok(total)
    }

    async fn tx_details(&self, tx_ref: &str) -> Result<Option<TxDetails>> {
        let signature = Signature::from_str(tx_ref)
            .map_err(|e| Error::Internal(format!("invalid signature {}: {}", tx_ref, e)))?;

        let tx = match self
            .rpc
            .get_transaction_with_config(
                &signature,
                RpcTransactionConfig {
                    encoding: Some(UiTransactionEncoding::JsonParsed),
                    commitment: Some(self.commitment),
                    max_supported_transaction_version: Some(0),
                },
            )
            .await
        {
            Ok(tx) => tx,
            Err(e) => {
                let err = Error::from(e);
                if err.is_stress() {
                    return Err(err);
                }
                // Not yet visible at this commitment
                debug!(tx = %tx_ref, "Transaction not available: {}", err);
                return Ok(None);
            }
        };

        let Some(meta) = tx.transaction.meta else {
            return Ok(None);
        };

        let post: Option<Vec<_>> = meta.post_token_balances.into();
        let post_balances = post
            .unwrap_or_default()
            .into_iter()
            .filter_map(|b| {
                let owner = match b.owner {
                    OptionSerializer::Some(owner) => owner,
                    _ => return None,
                };
                Some(PostBalance {
                    owner,
                    mint: b.mint,
                    quantity: ui_quantity(&b.ui_token_amount),
                    decimals: b.ui_token_amount.decimals,
                })
            })
            .collect();

        Ok(Some(TxDetails {
            succeeded: meta.err.is_none(),
            post_balances,
        }))
    }

    async fn native_balance(&self, owner: &str) -> Result<f64> {
        let lamports = self.rpc.get_balance(&parse_pubkey(owner)?).await?;
        Ok(lamports as f64 / LAMPORTS_PER_SOL)
    }

    async fn mint_decimals(&self, mint: &str) -> Result<u8> {
        if let Some(d) = self.decimals.get(mint) {
            return Ok(*d);
        }
        let supply = self.rpc.get_token_supply(&parse_pubkey(mint)?).await?;
        self.decimals.insert(mint.to_string(), supply.decimals);
        Ok(supply.decimals)
    }

    async fn account_exists(&self, owner: &str, mint: &str) -> Result<bool> {
        let ata = derive_ata(&parse_pubkey(owner)?, &parse_pubkey(mint)?);
        let resp = self
            .rpc
            .get_account_with_commitment(&ata, self.commitment)
            .await?;
        Ok(resp.value.is_some())
    }

    async fn close_wrapped_dust(&self, owner: &str) -> Result<Option<String>> {
        let Some(signer) = &self.signer else {
            return Ok(None);
        };
        let owner = parse_pubkey(owner)?;
        if signer.pubkey() != owner {
            return Ok(None);
        }

        let ata = derive_ata(&owner, &spl_token::native_mint::id());
        let exists = self
            .rpc
            .get_account_with_commitment(&ata, self.commitment)
            .await?
            .value
            .is_some();
        if !exists {
            return Ok(None);
        }

        let ix = spl_token::instruction::close_account(&spl_token::id(), &ata, &owner, &owner, &[])
            .map_err(|e| Error::Transaction(format!("close_account: {}", e)))?;
        let blockhash = self.rpc.get_latest_blockhash().await?;
        let tx = Transaction::new_signed_with_payer(
            &[ix],
            Some(&owner),
            &[signer.as_ref()],
            blockhash,
        );
        let signature = self.rpc.send_and_confirm_transaction(&tx).await?;
        info!(account = %ata, signature = %signature, "Closed wrapped SOL dust");
        Ok(Some(signature.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_ata_is_deterministic() {
        let owner = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        assert_eq!(derive_ata(&owner, &mint), derive_ata(&owner, &mint));
        assert_ne!(derive_ata(&owner, &mint), derive_ata(&owner, &Pubkey::new_unique()));
    }

    #[test]
    fn test_ui_quantity_prefers_raw_amount() {
        let amount = UiTokenAmount {
            ui_amount: Some(1.0),
            decimals: 6,
            amount: "1500000".to_string(),
            ui_amount_string: "1.5".to_string(),
        };
        assert_eq!(ui_quantity(&amount), 1.5);
    }

    #[test]
    fn test_parse_pubkey_rejects_garbage() {
        assert!(matches!(parse_pubkey("not-a-key"), Err(Error::Config(_))));
    }
}
