//! Walks a ledger's block log backwards in bounded pages. Each segment is
//! fetched at most once; archive pointers returned inline are resolved
//! before the segment counts as complete. Segment and archive fetches are
//! throttled by two independent semaphores so concurrent scans stay polite
//! to the upstream boundary nodes.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use log::{info, warn};
use tokio::sync::Semaphore;

use crate::ledger::{LedgerClient, RawBlock};

/// One `[start, start+length)` window of the block log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: u64,
    pub length: u64,
}

impl Segment {
    /// Index of the last block in the segment.
    pub fn end(&self) -> u64 {
        self.start + self.length - 1
    }
}

/// Upper bounds on in-flight requests.
#[derive(Debug, Clone, Copy)]
pub struct FetchLimits {
    pub segments: usize,
    pub archives: usize,
}

/// Per-segment accounting: either it contributed blocks or it was skipped
/// with a reason. Skips degrade coverage, they never fail the scan.
#[derive(Debug)]
pub enum SegmentOutcome {
    Completed { segment: Segment, blocks: usize },
    Skipped { segment: Segment, reason: String },
}

/// Partitions the scan range into descending fixed-size segments.
///
/// The range is `[max(0, total_len - 1 - max_blocks), total_len - 1]`,
/// most recent segment first, each at most `page_size` long. The segments
/// cover the range exactly, without overlap.
pub fn plan_segments(total_len: u64, max_blocks: u64, page_size: u64) -> Vec<Segment> {
    if total_len == 0 || page_size == 0 {
        return Vec::new();
    }
    let end = total_len - 1;
    let start = end.saturating_sub(max_blocks);
    let mut segments = Vec::new();
    let mut hi = end;
    loop {
        let lo = hi.saturating_sub(page_size - 1).max(start);
        segments.push(Segment {
            start: lo,
            length: hi - lo + 1,
        });
        if lo == start {
            break;
        }
        hi = lo - 1;
    }
    segments
}

/// Fetches every segment, resolving archive pointers along the way.
///
/// Returns the blocks in completion order together with one outcome per
/// segment. A failed segment is logged and reported as skipped; the rest
/// of the scan proceeds.
pub async fn run_segments(
    client: &LedgerClient,
    symbol: &str,
    segments: Vec<Segment>,
    limits: FetchLimits,
) -> Result<(Vec<RawBlock>, Vec<SegmentOutcome>)> {
    let total = segments.len();
    let segment_sem = Arc::new(Semaphore::new(limits.segments.max(1)));
    let archive_sem = Arc::new(Semaphore::new(limits.archives.max(1)));

    let mut handles = Vec::with_capacity(total);
    for (i, segment) in segments.into_iter().enumerate() {
        let client = client.clone();
        let symbol = symbol.to_owned();
        let segment_sem = Arc::clone(&segment_sem);
        let archive_sem = Arc::clone(&archive_sem);
        handles.push(tokio::spawn(async move {
            match fetch_segment(&client, segment, &segment_sem, &archive_sem).await {
                Ok(blocks) => {
                    info!(
                        "{symbol}: segment {}/{total} [{}..={}] yielded {} blocks",
                        i + 1,
                        segment.start,
                        segment.end(),
                        blocks.len()
                    );
                    let count = blocks.len();
                    (
                        blocks,
                        SegmentOutcome::Completed {
                            segment,
                            blocks: count,
                        },
                    )
                }
                Err(e) => {
                    warn!(
                        "{symbol}: segment [{}..={}] skipped: {e:#}",
                        segment.start,
                        segment.end()
                    );
                    (
                        Vec::new(),
                        SegmentOutcome::Skipped {
                            segment,
                            reason: format!("{e:#}"),
                        },
                    )
                }
            }
        }));
    }

    let mut blocks = Vec::new();
    let mut outcomes = Vec::with_capacity(total);
    for handle in handles {
        let (fetched, outcome) = handle.await?;
        blocks.extend(fetched);
        outcomes.push(outcome);
    }
    Ok((blocks, outcomes))
}

async fn fetch_segment(
    client: &LedgerClient,
    segment: Segment,
    segment_sem: &Semaphore,
    archive_sem: &Semaphore,
) -> Result<Vec<RawBlock>> {
    let page = {
        let _permit = segment_sem.acquire().await?;
        client.fetch_page(segment.start, segment.length).await?
    };

    if let Some((a, b)) = first_gap(&page.blocks) {
        // Pages are contiguous by contract; a hole means the fetch itself
        // is wrong, not the chain.
        warn!(
            "segment [{}..={}] returned non-contiguous blocks ({a} then {b})",
            segment.start,
            segment.end()
        );
    }

    let inline: HashSet<u64> = page.blocks.iter().map(RawBlock::index).collect();
    let mut blocks = page.blocks;
    for pointer in &page.archived {
        let fetched = {
            let _permit = archive_sem.acquire().await?;
            client.fetch_archived(pointer).await
        };
        match fetched {
            Ok(archived) => blocks.extend(dedup_against_inline(&inline, archived)),
            Err(e) => warn!(
                "archive fetch for segment [{}..={}] skipped: {e:#}",
                segment.start,
                segment.end()
            ),
        }
    }
    Ok(blocks)
}

/// Drops archived blocks whose index was already delivered inline, so one
/// query never emits the same block twice.
fn dedup_against_inline(inline: &HashSet<u64>, fetched: Vec<RawBlock>) -> Vec<RawBlock> {
    fetched
        .into_iter()
        .filter(|b| !inline.contains(&b.index()))
        .collect()
}

/// First break in an otherwise strictly ascending, contiguous index run.
fn first_gap(blocks: &[RawBlock]) -> Option<(u64, u64)> {
    blocks.windows(2).find_map(|w| {
        let (a, b) = (w[0].index(), w[1].index());
        (b != a + 1).then_some((a, b))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn tagged(index: u64) -> RawBlock {
        RawBlock::Tagged {
            index,
            block: Value::Map(Vec::new()),
        }
    }

    #[test]
    fn segments_cover_the_range_exactly() {
        for (total, max_blocks, page_size) in [
            (0u64, 10u64, 5u64),
            (1, 0, 5),
            (10, 100, 3),
            (100, 10, 4),
            (5, 5, 1),
            (1_000, 999, 250),
            (7, 3, 10),
            (2_000_000, 200_000, 2_000),
        ] {
            let segments = plan_segments(total, max_blocks, page_size);
            if total == 0 {
                assert!(segments.is_empty());
                continue;
            }
            let end = total - 1;
            let start = end.saturating_sub(max_blocks);

            let mut covered = HashSet::new();
            for s in &segments {
                assert!(s.length >= 1 && s.length <= page_size);
                for i in s.start..=s.end() {
                    assert!(covered.insert(i), "index {i} covered twice");
                }
            }
            let expected: HashSet<u64> = (start..=end).collect();
            assert_eq!(covered, expected, "total={total} max={max_blocks} page={page_size}");

            // Most recent segment first, strictly descending.
            assert_eq!(segments[0].end(), end);
            assert!(segments.windows(2).all(|w| w[1].end() + 1 == w[0].start));
        }
    }

    #[test]
    fn zero_page_size_plans_nothing() {
        assert!(plan_segments(100, 10, 0).is_empty());
    }

    #[test]
    fn archived_blocks_never_duplicate_inline_indices() {
        let inline: HashSet<u64> = [5, 6, 7].into_iter().collect();
        let fetched = vec![tagged(3), tagged(4), tagged(5), tagged(7)];
        let kept = dedup_against_inline(&inline, fetched);
        let kept_indices: Vec<u64> = kept.iter().map(RawBlock::index).collect();
        assert_eq!(kept_indices, vec![3, 4]);
    }

    #[test]
    fn gap_detection_finds_the_first_hole() {
        let blocks = vec![tagged(1), tagged(2), tagged(4), tagged(9)];
        assert_eq!(first_gap(&blocks), Some((2, 4)));
        assert_eq!(first_gap(&blocks[..2]), None);
        assert_eq!(first_gap(&[]), None);
    }
}
