//! Process configuration. Everything is read from the environment exactly
//! once, validated, and frozen into a [`Config`] that is passed by
//! reference; nothing downstream consults the environment again. Every
//! knob has a default so the scanner runs with zero configuration.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use candid::Principal;
use chrono::{DateTime, Utc};

use crate::classify::SUBACCOUNT_LEN;
use crate::ledger::LedgerKind;

const DEFAULT_IC_URL: &str = "https://ic0.app";
const DEFAULT_ACCOUNT: &str = "hijd3-ferev-ybojm-nailk-pdk3t-l2h3o-h6cdy-mfynr-p3oen-d67mg-5ae";
const DEFAULT_LEDGERS: &str = "ICP:ryjl3-tyaaa-aaaaa-aaaba-cai:8:native,\
                               ckBTC:mxzaz-hqaaa-aaaar-qaada-cai:8:icrc,\
                               ckETH:ss2fx-dyaaa-aaaar-qacoq-cai:18:icrc,\
                               ckUSDC:xevnm-gaaaa-aaaar-qafnq-cai:6:icrc";
const DEFAULT_FROM: &str = "2021-05-10T00:00:00Z";
const DEFAULT_SANITY: &str = "ICP:4651429,ckBTC:120492";
const DEFAULT_MAX_BLOCKS: u64 = 200_000;
const DEFAULT_PAGE_SIZE: u64 = 2_000;
const DEFAULT_CONCURRENCY: usize = 6;

/// One token's backing ledger.
#[derive(Debug, Clone)]
pub struct LedgerDescriptor {
    pub symbol: String,
    pub canister_id: Principal,
    pub decimals: u32,
    pub kind: LedgerKind,
}

/// Inclusive time range plus a ceiling on how many blocks to walk back.
#[derive(Debug, Clone, Copy)]
pub struct ScanWindow {
    pub from_ms: i64,
    pub to_ms: i64,
    pub max_blocks: u64,
}

impl ScanWindow {
    pub fn contains_ms(&self, ms: i64) -> bool {
        ms >= self.from_ms && ms <= self.to_ms
    }
}

/// A known historical block used as a pre-scan probe.
#[derive(Debug, Clone)]
pub struct SanityCheck {
    pub symbol: String,
    pub block_index: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub ic_url: String,
    pub watched_owner: Principal,
    pub watched_subaccount: Option<[u8; SUBACCOUNT_LEN]>,
    pub strict_subaccount: bool,
    pub ledgers: Vec<LedgerDescriptor>,
    pub window: ScanWindow,
    pub page_size: u64,
    pub segment_concurrency: usize,
    pub archive_concurrency: usize,
    pub csv_path: PathBuf,
    pub json_path: PathBuf,
    pub flows_path: PathBuf,
    pub sanity_checks: Vec<SanityCheck>,
}

impl Config {
    pub fn from_env() -> Result<Config> {
        let owner_text = var_or("FLOWSCAN_ACCOUNT", DEFAULT_ACCOUNT);
        let watched_owner = Principal::from_text(owner_text.trim())
            .with_context(|| format!("FLOWSCAN_ACCOUNT is not a principal: {owner_text}"))?;

        let watched_subaccount = match env::var("FLOWSCAN_SUBACCOUNT") {
            Ok(hex_str) if !hex_str.trim().is_empty() => Some(parse_subaccount(hex_str.trim())?),
            _ => None,
        };

        let from = parse_instant(&var_or("FLOWSCAN_FROM", DEFAULT_FROM))
            .context("FLOWSCAN_FROM is not an RFC 3339 instant")?;
        let to = match env::var("FLOWSCAN_TO") {
            Ok(s) => parse_instant(s.trim()).context("FLOWSCAN_TO is not an RFC 3339 instant")?,
            Err(_) => Utc::now(),
        };

        Ok(Config {
            ic_url: var_or("FLOWSCAN_IC_URL", DEFAULT_IC_URL),
            watched_owner,
            watched_subaccount,
            strict_subaccount: flag_var("FLOWSCAN_STRICT_SUBACCOUNT"),
            ledgers: parse_ledgers(&var_or("FLOWSCAN_LEDGERS", DEFAULT_LEDGERS))?,
            window: ScanWindow {
                from_ms: from.timestamp_millis(),
                to_ms: to.timestamp_millis(),
                max_blocks: parse_var("FLOWSCAN_MAX_BLOCKS", DEFAULT_MAX_BLOCKS)?,
            },
            page_size: parse_var("FLOWSCAN_PAGE_SIZE", DEFAULT_PAGE_SIZE)?,
            segment_concurrency: parse_var("FLOWSCAN_SEGMENT_CONCURRENCY", DEFAULT_CONCURRENCY)?,
            archive_concurrency: parse_var("FLOWSCAN_ARCHIVE_CONCURRENCY", DEFAULT_CONCURRENCY)?,
            csv_path: PathBuf::from(var_or("FLOWSCAN_CSV", "flows.csv")),
            json_path: PathBuf::from(var_or("FLOWSCAN_JSON", "flows.json")),
            flows_path: PathBuf::from(var_or("FLOWSCAN_FLOWS", "counterparties.csv")),
            sanity_checks: parse_sanity_checks(&var_or("FLOWSCAN_SANITY", DEFAULT_SANITY))?,
        })
    }

    pub fn ledger(&self, symbol: &str) -> Option<&LedgerDescriptor> {
        self.ledgers.iter().find(|l| l.symbol == symbol)
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_owned())
}

fn flag_var(name: &str) -> bool {
    matches!(env::var(name).as_deref(), Ok("1") | Ok("true") | Ok("yes"))
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(s) => s
            .trim()
            .parse()
            .with_context(|| format!("{name} has an unparseable value: {s}")),
        Err(_) => Ok(default),
    }
}

fn parse_instant(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

fn parse_subaccount(hex_str: &str) -> Result<[u8; SUBACCOUNT_LEN]> {
    let bytes = hex::decode(hex_str).context("FLOWSCAN_SUBACCOUNT is not hex")?;
    bytes
        .try_into()
        .map_err(|_| anyhow!("FLOWSCAN_SUBACCOUNT must be exactly {SUBACCOUNT_LEN} bytes"))
}

/// Parses `SYMBOL:canister:decimals:kind` descriptors, comma separated.
fn parse_ledgers(s: &str) -> Result<Vec<LedgerDescriptor>> {
    let mut ledgers = Vec::new();
    for entry in s.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let parts: Vec<&str> = entry.split(':').collect();
        let &[symbol, canister, decimals, kind] = parts.as_slice() else {
            return Err(anyhow!("ledger descriptor needs 4 fields: {entry}"));
        };
        let kind = match kind {
            "native" => LedgerKind::Native,
            "icrc" => LedgerKind::Icrc,
            other => return Err(anyhow!("unknown ledger kind: {other}")),
        };
        ledgers.push(LedgerDescriptor {
            symbol: symbol.to_owned(),
            canister_id: Principal::from_text(canister)
                .with_context(|| format!("bad canister id in ledger descriptor: {entry}"))?,
            decimals: decimals
                .parse()
                .with_context(|| format!("bad decimals in ledger descriptor: {entry}"))?,
            kind,
        });
    }
    if ledgers.is_empty() {
        return Err(anyhow!("no ledgers configured"));
    }
    Ok(ledgers)
}

/// Parses `SYMBOL:block_index` probes, comma separated. Empty disables.
fn parse_sanity_checks(s: &str) -> Result<Vec<SanityCheck>> {
    let mut checks = Vec::new();
    for entry in s.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (symbol, index) = entry
            .split_once(':')
            .ok_or_else(|| anyhow!("sanity check needs SYMBOL:index: {entry}"))?;
        checks.push(SanityCheck {
            symbol: symbol.to_owned(),
            block_index: index
                .parse()
                .with_context(|| format!("bad block index in sanity check: {entry}"))?,
        });
    }
    Ok(checks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ledgers_parse() {
        let ledgers = parse_ledgers(DEFAULT_LEDGERS).unwrap();
        assert_eq!(ledgers.len(), 4);
        assert_eq!(ledgers[0].symbol, "ICP");
        assert_eq!(ledgers[0].kind, LedgerKind::Native);
        assert_eq!(ledgers[2].decimals, 18);
        assert!(ledgers[1..].iter().all(|l| l.kind == LedgerKind::Icrc));
    }

    #[test]
    fn ledger_descriptor_rejects_malformed_entries() {
        assert!(parse_ledgers("ICP:ryjl3-tyaaa-aaaaa-aaaba-cai:8").is_err());
        assert!(parse_ledgers("ICP:not-a-canister:8:native").is_err());
        assert!(parse_ledgers("ICP:ryjl3-tyaaa-aaaaa-aaaba-cai:8:rosetta").is_err());
        assert!(parse_ledgers("").is_err());
    }

    #[test]
    fn sanity_checks_parse() {
        let checks = parse_sanity_checks("ICP:123, ckBTC:9").unwrap();
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0].block_index, 123);
        assert_eq!(checks[1].symbol, "ckBTC");
        assert!(parse_sanity_checks("").unwrap().is_empty());
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let w = ScanWindow {
            from_ms: 100,
            to_ms: 200,
            max_blocks: 10,
        };
        assert!(w.contains_ms(100));
        assert!(w.contains_ms(200));
        assert!(!w.contains_ms(99));
        assert!(!w.contains_ms(201));
    }
}
