/*!
## External data sources
- Account balances and block/transaction point lookups are pulled from the
  public Dashboard ledger API and its ICRC counterpart.
- A Rosetta gateway serves as fallback when the Dashboard API has no answer.

All of these mirror state the ledger canisters already hold; they are used
for cross-checks and the balance summary, never as the source of truth for
the scan itself.
*/
use std::str::FromStr;

use anyhow::{bail, Result};
use reqwest::{header::CONTENT_TYPE, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};

const DASHBOARD_API: &str = "https://ledger-api.internetcomputer.org";
const ICRC_API: &str = "https://icrc-api.internetcomputer.org";
const ROSETTA_API: &str = "https://rosetta-api.internetcomputer.org";

/// Rosetta addresses the native ledger by blockchain name plus the ledger
/// canister's id.
const ROSETTA_BLOCKCHAIN: &str = "Internet Computer";
const ROSETTA_NETWORK: &str = "00000000000000020101";

#[derive(Deserialize, Debug)]
/// Balance portion of a Dashboard account lookup.
pub struct DashboardAccount {
    pub balance: String,
}

#[derive(Deserialize, Debug)]
/// One page of Dashboard transaction history for an account.
pub struct DashboardTxPage {
    pub total: u64,
    pub blocks: Vec<Value>,
}

#[derive(Deserialize, Debug)]
struct RosettaAmount {
    value: String,
}

#[derive(Deserialize, Debug)]
struct RosettaBalanceResponse {
    balances: Vec<RosettaAmount>,
}

#[derive(Deserialize, Debug)]
struct RosettaSearchResponse {
    total_count: u64,
}

/// Returns the native-ledger balance for an account identifier, in base
/// units, or `None` when the API has no record of the account.
pub async fn balance_from_dashboard_api(
    client: &reqwest::Client,
    account_hex: &str,
) -> Result<Option<u128>> {
    let url = Url::from_str(DASHBOARD_API)?.join(&format!("/accounts/{account_hex}"))?;
    let response = client
        .get(url)
        .header(CONTENT_TYPE, "application/json")
        .send()
        .await;
    let Ok(r) = response else {
        bail!("the balance request failed for {account_hex}")
    };
    if r.status() != StatusCode::OK {
        return Ok(None);
    }
    let account: DashboardAccount = r.json().await?;
    Ok(account.balance.parse().ok())
}

/// Returns recent Dashboard transaction history for an account.
pub async fn transactions_from_dashboard_api(
    client: &reqwest::Client,
    account_hex: &str,
    limit: u32,
) -> Result<Option<DashboardTxPage>> {
    let url = Url::from_str(DASHBOARD_API)?.join(&format!("/accounts/{account_hex}/transactions"))?;
    let response = client
        .get(url)
        .query(&[("limit", limit.to_string())])
        .header(CONTENT_TYPE, "application/json")
        .send()
        .await;
    let Ok(r) = response else {
        bail!("the transaction history request failed for {account_hex}")
    };
    if r.status() != StatusCode::OK {
        return Ok(None);
    }
    Ok(Some(r.json().await?))
}

/// Point lookup of one native-ledger block by index.
pub async fn block_from_dashboard_api(
    client: &reqwest::Client,
    index: u64,
) -> Result<Option<Value>> {
    let url = Url::from_str(DASHBOARD_API)?.join(&format!("/blocks/{index}"))?;
    let response = client
        .get(url)
        .header(CONTENT_TYPE, "application/json")
        .send()
        .await;
    let Ok(r) = response else {
        bail!("the block request failed for index {index}")
    };
    if r.status() != StatusCode::OK {
        return Ok(None);
    }
    Ok(Some(r.json().await?))
}

/// Returns an ICRC ledger balance for an owner, in base units.
pub async fn icrc_balance_from_index_api(
    client: &reqwest::Client,
    ledger_canister: &str,
    account: &str,
) -> Result<Option<u128>> {
    let url = Url::from_str(ICRC_API)?
        .join(&format!("/api/v1/ledgers/{ledger_canister}/accounts/{account}"))?;
    let response = client
        .get(url)
        .header(CONTENT_TYPE, "application/json")
        .send()
        .await;
    let Ok(r) = response else {
        bail!("the balance request failed for {account} on {ledger_canister}")
    };
    if r.status() != StatusCode::OK {
        return Ok(None);
    }
    let account: DashboardAccount = r.json().await?;
    Ok(account.balance.parse().ok())
}

fn rosetta_network() -> Value {
    json!({
        "blockchain": ROSETTA_BLOCKCHAIN,
        "network": ROSETTA_NETWORK,
    })
}

/// Rosetta fallback for the native-ledger balance.
pub async fn balance_from_rosetta_api(
    client: &reqwest::Client,
    account_hex: &str,
) -> Result<Option<u128>> {
    let url = Url::from_str(ROSETTA_API)?.join("/account/balance")?;
    let body = json!({
        "network_identifier": rosetta_network(),
        "account_identifier": { "address": account_hex },
    });
    let response = client.post(url).json(&body).send().await;
    let Ok(r) = response else {
        bail!("the rosetta balance request failed for {account_hex}")
    };
    if r.status() != StatusCode::OK {
        return Ok(None);
    }
    let parsed: RosettaBalanceResponse = r.json().await?;
    Ok(parsed
        .balances
        .first()
        .and_then(|amount| amount.value.parse().ok()))
}

/// Rosetta fallback for how many transactions touch an account.
pub async fn transaction_count_from_rosetta_api(
    client: &reqwest::Client,
    account_hex: &str,
) -> Result<Option<u64>> {
    let url = Url::from_str(ROSETTA_API)?.join("/search/transactions")?;
    let body = json!({
        "network_identifier": rosetta_network(),
        "account_identifier": { "address": account_hex },
    });
    let response = client.post(url).json(&body).send().await;
    let Ok(r) = response else {
        bail!("the rosetta search request failed for {account_hex}")
    };
    if r.status() != StatusCode::OK {
        return Ok(None);
    }
    let parsed: RosettaSearchResponse = r.json().await?;
    Ok(Some(parsed.total_count))
}

/// Rosetta fallback for one block by index.
pub async fn block_from_rosetta_api(client: &reqwest::Client, index: u64) -> Result<Option<Value>> {
    let url = Url::from_str(ROSETTA_API)?.join("/block")?;
    let body = json!({
        "network_identifier": rosetta_network(),
        "block_identifier": { "index": index },
    });
    let response = client.post(url).json(&body).send().await;
    let Ok(r) = response else {
        bail!("the rosetta block request failed for index {index}")
    };
    if r.status() != StatusCode::OK {
        return Ok(None);
    }
    let parsed: Value = r.json().await?;
    Ok(parsed.get("block").cloned())
}
