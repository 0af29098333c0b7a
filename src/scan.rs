//! Drives the scan for one ledger: resolve the log length, walk the block
//! log in segments, normalize and classify every block, and append the
//! qualifying rows. Also hosts the pre-scan probes against known
//! historical blocks and the end-of-run account overview.

use anyhow::{Context, Result};
use ic_agent::Agent;
use log::{debug, info, warn};

use crate::apis;
use crate::block::{format_amount, normalize, TransferRecord};
use crate::classify::WatchedAccount;
use crate::config::{Config, LedgerDescriptor, SanityCheck, ScanWindow};
use crate::fetch::{plan_segments, run_segments, FetchLimits, SegmentOutcome};
use crate::ledger::{LedgerClient, LedgerKind, RawBlock};
use crate::report::Reporter;

/// Per-ledger result of one scan run.
#[derive(Debug)]
pub struct ScanSummary {
    pub symbol: String,
    pub blocks_seen: usize,
    pub rows_appended: u64,
    pub segments_completed: usize,
    pub segments_skipped: usize,
}

/// Scans one ledger end to end.
///
/// Failure to resolve the chain length is fatal for this ledger only;
/// everything past that point degrades per segment instead of failing.
pub async fn scan_ledger(
    config: &Config,
    ledger: &LedgerDescriptor,
    agent: Agent,
    watched: &WatchedAccount,
    reporter: &Reporter,
) -> Result<(ScanSummary, Vec<TransferRecord>)> {
    let client = LedgerClient::new(agent, ledger.canister_id, ledger.kind);
    let total_len = client
        .chain_length()
        .await
        .with_context(|| format!("{}: cannot resolve chain length", ledger.symbol))?;
    let segments = plan_segments(total_len, config.window.max_blocks, config.page_size);
    info!(
        "{}: chain length {total_len}, scanning {} segments of up to {} blocks",
        ledger.symbol,
        segments.len(),
        config.page_size
    );

    let limits = FetchLimits {
        segments: config.segment_concurrency,
        archives: config.archive_concurrency,
    };
    let (blocks, outcomes) = run_segments(&client, &ledger.symbol, segments, limits).await?;

    let mut records = Vec::new();
    let mut rows_appended = 0u64;
    for raw in &blocks {
        let Some(record) = normalize(raw, &ledger.symbol, ledger.decimals, watched) else {
            continue;
        };
        if !within_window(&config.window, &record) {
            continue;
        }
        reporter.append(&record)?;
        rows_appended += 1;
        records.push(record);
    }

    let segments_completed = outcomes
        .iter()
        .filter(|o| matches!(o, SegmentOutcome::Completed { .. }))
        .count();
    let summary = ScanSummary {
        symbol: ledger.symbol.clone(),
        blocks_seen: blocks.len(),
        rows_appended,
        segments_completed,
        segments_skipped: outcomes.len() - segments_completed,
    };
    Ok((summary, records))
}

/// Out-of-window blocks are decoded like any other but never reported.
fn within_window(window: &ScanWindow, record: &TransferRecord) -> bool {
    window.contains_ms(record.timestamp_ms)
}

/// Fetches one known historical block and prints whether the scanner
/// would emit it, and with which direction. Nothing is written to the
/// report; this is a manual smoke-test for the maintainer.
pub async fn sanity_probe(
    config: &Config,
    agent: &Agent,
    watched: &WatchedAccount,
    http: &reqwest::Client,
    check: &SanityCheck,
) -> Result<()> {
    let Some(ledger) = config.ledger(&check.symbol) else {
        warn!("probe {}#{}: no such ledger configured", check.symbol, check.block_index);
        return Ok(());
    };
    let client = LedgerClient::new(agent.clone(), ledger.canister_id, ledger.kind);
    let raw = fetch_single_block(&client, check.block_index).await?;
    match raw {
        None => info!(
            "probe {}#{}: ledger did not return this block",
            check.symbol, check.block_index
        ),
        Some(raw) => match normalize(&raw, &ledger.symbol, ledger.decimals, watched) {
            Some(record) => info!(
                "probe {}#{}: would emit direction={} amount={} from={} to={}",
                check.symbol,
                check.block_index,
                record.direction,
                record.amount,
                record.from,
                record.to
            ),
            None => info!(
                "probe {}#{}: would not emit (no match or non-transfer)",
                check.symbol, check.block_index
            ),
        },
    }
    if ledger.kind == LedgerKind::Native {
        cross_check_block(http, check.block_index).await;
    }
    Ok(())
}

async fn fetch_single_block(client: &LedgerClient, index: u64) -> Result<Option<RawBlock>> {
    let page = client.fetch_page(index, 1).await?;
    if let Some(block) = page.blocks.into_iter().find(|b| b.index() == index) {
        return Ok(Some(block));
    }
    // The block may have aged out of the ledger into an archive.
    for pointer in &page.archived {
        match client.fetch_archived(pointer).await {
            Ok(blocks) => {
                if let Some(block) = blocks.into_iter().find(|b| b.index() == index) {
                    return Ok(Some(block));
                }
            }
            Err(e) => debug!("probe archive fetch failed: {e:#}"),
        }
    }
    Ok(None)
}

/// Confirms the indexers also know the probed block. Purely informational.
async fn cross_check_block(http: &reqwest::Client, index: u64) {
    match apis::block_from_dashboard_api(http, index).await {
        Ok(Some(_)) => debug!("probe #{index}: dashboard API also has this block"),
        Ok(None) => match apis::block_from_rosetta_api(http, index).await {
            Ok(Some(_)) => debug!("probe #{index}: rosetta has this block"),
            Ok(None) => debug!("probe #{index}: unknown to dashboard and rosetta"),
            Err(e) => debug!("probe #{index}: rosetta lookup failed: {e:#}"),
        },
        Err(e) => debug!("probe #{index}: dashboard lookup failed: {e:#}"),
    }
}

/// Logs current balances for the watched account on every ledger, plus
/// how many native-ledger transactions the indexers know about. Failures
/// here only cost information, never the run.
pub async fn report_account_overview(
    config: &Config,
    watched: &WatchedAccount,
    http: &reqwest::Client,
) {
    for ledger in &config.ledgers {
        let balance = match ledger.kind {
            LedgerKind::Native => {
                let account_hex = watched.account_id_hex();
                match apis::balance_from_dashboard_api(http, &account_hex).await {
                    Ok(Some(units)) => Some(units),
                    _ => apis::balance_from_rosetta_api(http, &account_hex)
                        .await
                        .ok()
                        .flatten(),
                }
            }
            LedgerKind::Icrc => apis::icrc_balance_from_index_api(
                http,
                &ledger.canister_id.to_text(),
                &watched.owner.to_text(),
            )
            .await
            .ok()
            .flatten(),
        };
        match balance {
            Some(units) => info!(
                "{} balance: {}",
                ledger.symbol,
                format_amount(units, ledger.decimals)
            ),
            None => warn!("{}: balance unavailable from the indexer APIs", ledger.symbol),
        }
    }

    let account_hex = watched.account_id_hex();
    match apis::transactions_from_dashboard_api(http, &account_hex, 10).await {
        Ok(Some(page)) => info!(
            "dashboard knows {} native-ledger transactions ({} in the latest page)",
            page.total,
            page.blocks.len()
        ),
        _ => match apis::transaction_count_from_rosetta_api(http, &account_hex).await {
            Ok(Some(count)) => info!("rosetta knows {count} native-ledger transactions"),
            _ => debug!("no indexer transaction count available"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use candid::Principal;

    #[test]
    fn decoded_records_outside_the_window_are_dropped() {
        let watched = WatchedAccount::new(
            Principal::from_text("ryjl3-tyaaa-aaaaa-aaaba-cai").unwrap(),
            None,
            false,
        );
        // Transfer into the watched account, stamped well past the
        // window's end.
        let block = Value::Map(vec![
            ("ts".into(), Value::Nat64(2_000_000_000_000)),
            (
                "tx".into(),
                Value::Map(vec![
                    ("op".into(), Value::Text("xfer".into())),
                    ("amt".into(), Value::Nat64(10)),
                    (
                        "from".into(),
                        Value::Map(vec![(
                            "owner".into(),
                            Value::Blob(vec![1, 2, 3, 4, 5]),
                        )]),
                    ),
                    (
                        "to".into(),
                        Value::Map(vec![(
                            "owner".into(),
                            Value::Blob(watched.owner.as_slice().to_vec()),
                        )]),
                    ),
                ]),
            ),
        ]);
        let raw = RawBlock::Tagged { index: 1, block };
        let record = normalize(&raw, "ckBTC", 8, &watched).unwrap();

        let window = ScanWindow {
            from_ms: 0,
            to_ms: 1_000,
            max_blocks: 10,
        };
        // The block decodes fine; only the window keeps it out of the report.
        assert!(!within_window(&window, &record));
        let wide = ScanWindow {
            from_ms: 0,
            to_ms: i64::MAX,
            max_blocks: 10,
        };
        assert!(within_window(&wide, &record));
    }
}
