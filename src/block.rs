//! Turns one raw ledger block into at most one canonical transfer record.
//! Fixed-schema native blocks select their layout from the operation
//! variant; tagged-value blocks are interpreted by key lookup. Operations
//! that are not value movements (approvals) produce nothing.

use chrono::{DateTime, SecondsFormat};
use serde::Serialize;

use crate::classify::{classify, Direction, WatchedAccount};
use crate::ledger::{Operation, RawBlock};
use crate::value::{account_field, blob_field, nat_field, text_field, Value};

/// Canonical decoded transfer, ready for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct TransferRecord {
    pub timestamp: String,
    pub token: String,
    pub direction: Direction,
    pub amount: String,
    pub from: String,
    pub to: String,
    pub block_index: u64,
    pub memo: String,
    /// Base units before decimal formatting; used for aggregation.
    pub amount_units: u128,
    pub timestamp_ms: i64,
}

enum OpKind {
    Transfer,
    Mint,
    Burn,
}

/// Normalizes a block against the watched account.
///
/// Returns `None` for non-transfer operations, for transfers that touch
/// neither side of the watched account, and for blocks too malformed to
/// decode. Mint and Burn are passed through without identity matching.
pub fn normalize(
    raw: &RawBlock,
    symbol: &str,
    decimals: u32,
    watched: &WatchedAccount,
) -> Option<TransferRecord> {
    match raw {
        RawBlock::Native { index, block } => {
            let op = block.transaction.operation.as_ref()?;
            let (direction, from, to, amount_units) = match op {
                Operation::Transfer {
                    from, to, amount, ..
                }
                | Operation::TransferFrom {
                    from, to, amount, ..
                } => {
                    let direction = classify(
                        watched.matches_account_bytes(from),
                        watched.matches_account_bytes(to),
                    )?;
                    (
                        direction,
                        hex::encode(from),
                        hex::encode(to),
                        u128::from(amount.e8s),
                    )
                }
                Operation::Mint { to, amount } => (
                    Direction::Mint,
                    String::new(),
                    hex::encode(to),
                    u128::from(amount.e8s),
                ),
                Operation::Burn { from, amount } => (
                    Direction::Burn,
                    hex::encode(from),
                    String::new(),
                    u128::from(amount.e8s),
                ),
                Operation::Approve { .. } => return None,
            };
            let memo = match &block.transaction.icrc1_memo {
                Some(bytes) => hex::encode(bytes),
                None if block.transaction.memo != 0 => format!("{:x}", block.transaction.memo),
                None => String::new(),
            };
            let timestamp_ms = millis_from_nanos(block.timestamp.timestamp_nanos as u128);
            Some(TransferRecord {
                timestamp: format_timestamp_ms(timestamp_ms),
                token: symbol.to_owned(),
                direction,
                amount: format_amount(amount_units, decimals),
                from,
                to,
                block_index: *index,
                memo,
                amount_units,
                timestamp_ms,
            })
        }
        RawBlock::Tagged { index, block } => {
            let tx = block.get("tx")?;
            // Ledger implementations disagree on where the operation tag
            // lives: inside the tx map or at the block level.
            let op = tx
                .get("op")
                .and_then(Value::as_text)
                .or_else(|| block.get("btype").and_then(Value::as_text))
                .or_else(|| block.get("type").and_then(Value::as_text))?;
            let kind = match op {
                "xfer" | "1xfer" | "2xfer" | "transfer" => OpKind::Transfer,
                "mint" | "1mint" => OpKind::Mint,
                "burn" | "1burn" => OpKind::Burn,
                _ => return None,
            };
            // Amounts are numeric in every ledger observed so far, but a
            // decimal-text spelling also decodes.
            let amount_units = match nat_field(tx, "amt") {
                0 => text_field(tx, "amt").parse().unwrap_or(0),
                n => n,
            };
            let (direction, from, to) = match kind {
                OpKind::Transfer => {
                    let from = account_field(tx, "from")?;
                    let to = account_field(tx, "to")?;
                    let direction =
                        classify(watched.matches_icrc(&from), watched.matches_icrc(&to))?;
                    (direction, from.to_string(), to.to_string())
                }
                OpKind::Mint => {
                    let to = account_field(tx, "to")
                        .map(|a| a.to_string())
                        .unwrap_or_default();
                    (Direction::Mint, String::new(), to)
                }
                OpKind::Burn => {
                    let from = account_field(tx, "from")
                        .map(|a| a.to_string())
                        .unwrap_or_default();
                    (Direction::Burn, from, String::new())
                }
            };
            let ts_nanos = match block.get("ts") {
                Some(v) => v.as_nat().unwrap_or(0),
                None => nat_field(tx, "ts"),
            };
            let timestamp_ms = millis_from_nanos(ts_nanos);
            Some(TransferRecord {
                timestamp: format_timestamp_ms(timestamp_ms),
                token: symbol.to_owned(),
                direction,
                amount: format_amount(amount_units, decimals),
                from,
                to,
                block_index: *index,
                memo: hex::encode(blob_field(tx, "memo")),
                amount_units,
                timestamp_ms,
            })
        }
    }
}

/// Formats base units as a decimal string, trimming trailing fractional
/// zeros and omitting the point for whole amounts.
pub fn format_amount(units: u128, decimals: u32) -> String {
    if decimals == 0 {
        return units.to_string();
    }
    let scale = 10u128.pow(decimals);
    let whole = units / scale;
    let frac = units % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let frac_str = format!("{frac:0>width$}", width = decimals as usize);
    format!("{whole}.{}", frac_str.trim_end_matches('0'))
}

/// Ledger timestamps are nanoseconds since epoch; anything finer than a
/// millisecond is discarded.
pub fn millis_from_nanos(nanos: u128) -> i64 {
    i64::try_from(nanos / 1_000_000).unwrap_or(0)
}

pub fn format_timestamp_ms(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}
