//! Report artifacts: an append-only CSV of classified transfers, a JSON
//! dump with full record detail, and a counterparty aggregation CSV.
//!
//! The transfer CSV is append-only by design: the file is reopened for
//! every row, the header is written only when the file is new or empty,
//! and rows are never rewritten or deduplicated. Re-running a scan over an
//! overlapping window therefore appends duplicate rows; downstream
//! consumers dedupe on (token, block index).

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;

use anyhow::{Context, Result};
use csv::{QuoteStyle, Writer, WriterBuilder};

use crate::block::{format_amount, TransferRecord};
use crate::classify::Direction;
use crate::config::LedgerDescriptor;

pub const CSV_HEADER: [&str; 8] = [
    "timestamp",
    "token",
    "direction",
    "amount",
    "from",
    "to",
    "block_index",
    "memo",
];

const FLOWS_HEADER: [&str; 7] = [
    "deposit_address",
    "asset",
    "counterparty",
    "total_received",
    "total_sent",
    "net_flow",
    "tx_count",
];

pub struct Reporter {
    csv_path: PathBuf,
    json_path: PathBuf,
    flows_path: PathBuf,
}

fn quoted_writer(file: File) -> Writer<File> {
    WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_writer(file)
}

impl Reporter {
    pub fn new(csv_path: PathBuf, json_path: PathBuf, flows_path: PathBuf) -> Self {
        Reporter {
            csv_path,
            json_path,
            flows_path,
        }
    }

    /// Writes the header if the transfer CSV is missing or empty.
    pub fn ensure_header(&self) -> Result<()> {
        let needs_header = match std::fs::metadata(&self.csv_path) {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };
        if needs_header {
            let file = self.open_append()?;
            let mut writer = quoted_writer(file);
            writer.write_record(CSV_HEADER)?;
            writer.flush()?;
        }
        Ok(())
    }

    /// Appends one row. The file handle is not held between calls, so
    /// concurrent ledger tasks interleave whole rows at worst.
    pub fn append(&self, record: &TransferRecord) -> Result<()> {
        self.ensure_header()?;
        let file = self.open_append()?;
        let mut writer = quoted_writer(file);
        let direction = record.direction.to_string();
        let block_index = record.block_index.to_string();
        writer.write_record([
            record.timestamp.as_str(),
            record.token.as_str(),
            direction.as_str(),
            record.amount.as_str(),
            record.from.as_str(),
            record.to.as_str(),
            block_index.as_str(),
            record.memo.as_str(),
        ])?;
        writer.flush()?;
        Ok(())
    }

    fn open_append(&self) -> Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("cannot open {}", self.csv_path.display()))
    }

    /// Full record detail as pretty JSON, replaced wholesale each run.
    pub fn write_json(&self, records: &[TransferRecord]) -> Result<()> {
        let json = serde_json::to_string_pretty(records)?;
        std::fs::write(&self.json_path, json)
            .with_context(|| format!("cannot write {}", self.json_path.display()))?;
        Ok(())
    }

    /// Aggregates flows per (deposit address, asset, counterparty) and
    /// replaces the aggregation CSV.
    pub fn write_counterparty_flows(
        &self,
        records: &[TransferRecord],
        ledgers: &[LedgerDescriptor],
    ) -> Result<()> {
        let totals = aggregate_flows(records);
        let file = File::create(&self.flows_path)
            .with_context(|| format!("cannot write {}", self.flows_path.display()))?;
        let mut writer = quoted_writer(file);
        writer.write_record(FLOWS_HEADER)?;
        for ((deposit, asset, counterparty), flow) in &totals {
            let decimals = ledgers
                .iter()
                .find(|l| &l.symbol == asset)
                .map(|l| l.decimals)
                .unwrap_or(0);
            let net = flow.received as i128 - flow.sent as i128;
            let net_str = if net < 0 {
                format!("-{}", format_amount(net.unsigned_abs(), decimals))
            } else {
                format_amount(net as u128, decimals)
            };
            let received = format_amount(flow.received, decimals);
            let sent = format_amount(flow.sent, decimals);
            let count = flow.count.to_string();
            writer.write_record([
                deposit.as_str(),
                asset.as_str(),
                counterparty.as_str(),
                received.as_str(),
                sent.as_str(),
                net_str.as_str(),
                count.as_str(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct FlowTotals {
    received: u128,
    sent: u128,
    count: u64,
}

type FlowKey = (String, String, String);

fn aggregate_flows(records: &[TransferRecord]) -> BTreeMap<FlowKey, FlowTotals> {
    let mut totals: BTreeMap<FlowKey, FlowTotals> = BTreeMap::new();
    for record in records {
        let (deposit, counterparty, received) = match record.direction {
            Direction::Inflow | Direction::SelfTransfer => {
                (record.to.clone(), record.from.clone(), true)
            }
            Direction::Mint => (record.to.clone(), String::new(), true),
            Direction::Outflow => (record.from.clone(), record.to.clone(), false),
            Direction::Burn => (record.from.clone(), String::new(), false),
        };
        let flow = totals
            .entry((deposit, record.token.clone(), counterparty))
            .or_default();
        if received {
            flow.received += record.amount_units;
        } else {
            flow.sent += record.amount_units;
        }
        flow.count += 1;
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn record(direction: Direction, from: &str, to: &str, units: u128) -> TransferRecord {
        TransferRecord {
            timestamp: "2024-01-01T00:00:00.000Z".into(),
            token: "ICP".into(),
            direction,
            amount: format_amount(units, 8),
            from: from.into(),
            to: to.into(),
            block_index: 1,
            memo: String::new(),
            amount_units: units,
            timestamp_ms: 1_704_067_200_000,
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("flowscan-test-{}-{name}", std::process::id()))
    }

    fn remove(path: &Path) {
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn header_is_written_once_and_rows_accumulate() {
        let csv = temp_path("rows.csv");
        remove(&csv);
        let reporter = Reporter::new(csv.clone(), temp_path("rows.json"), temp_path("rows-agg.csv"));
        reporter.ensure_header().unwrap();
        reporter
            .append(&record(Direction::Inflow, "aaa", "bbb", 5_000_000))
            .unwrap();
        reporter
            .append(&record(Direction::Outflow, "bbb", "ccc", 1))
            .unwrap();

        let contents = std::fs::read_to_string(&csv).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("\"timestamp\",\"token\""));
        assert!(lines[1].contains("\"inflow\""));
        assert!(lines[1].contains("\"0.05\""));
        // Every field is quoted.
        assert!(lines[2].split(',').all(|f| f.starts_with('"') && f.ends_with('"')));
        remove(&csv);
    }

    #[test]
    fn embedded_quotes_are_doubled() {
        let csv = temp_path("quotes.csv");
        remove(&csv);
        let reporter = Reporter::new(
            csv.clone(),
            temp_path("quotes.json"),
            temp_path("quotes-agg.csv"),
        );
        let mut rec = record(Direction::Inflow, "a\"b", "c", 1);
        rec.memo = "he said \"hi\"".into();
        reporter.append(&rec).unwrap();
        let contents = std::fs::read_to_string(&csv).unwrap();
        assert!(contents.contains("\"a\"\"b\""));
        assert!(contents.contains("\"he said \"\"hi\"\"\""));
        remove(&csv);
    }

    #[test]
    fn flows_aggregate_by_deposit_asset_and_counterparty() {
        let records = vec![
            record(Direction::Inflow, "alice", "watched", 100),
            record(Direction::Outflow, "watched", "alice", 40),
            record(Direction::Inflow, "bob", "watched", 7),
            record(Direction::Mint, "", "watched", 3),
        ];
        let totals = aggregate_flows(&records);
        let alice = &totals[&("watched".into(), "ICP".into(), "alice".into())];
        assert_eq!(
            *alice,
            FlowTotals {
                received: 100,
                sent: 40,
                count: 2
            }
        );
        let mint = &totals[&("watched".into(), "ICP".into(), String::new())];
        assert_eq!(mint.received, 3);
        assert_eq!(totals.len(), 3);
    }
}
