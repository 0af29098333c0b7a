//! Candid surface of the two block-log interfaces this tool reads: the
//! native ledger's `query_blocks` and the ICRC ledgers' `icrc3_get_blocks`.
//! Both return blocks inline plus pointers into archive canisters for the
//! older part of a requested range.

use anyhow::{bail, Result};
use candid::{CandidType, Decode, Deserialize, Encode, Nat, Principal};
use ic_agent::Agent;
use log::warn;

use crate::value::Value;

/// Which wire dialect a ledger speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerKind {
    /// Fixed-schema blocks with typed operation variants.
    Native,
    /// Self-describing tagged-value blocks.
    Icrc,
}

#[derive(CandidType, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tokens {
    pub e8s: u64,
}

#[derive(CandidType, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timestamp {
    pub timestamp_nanos: u64,
}

/// The content of a native-ledger transaction. Account identifiers travel
/// as raw bytes (32-byte canonical form or bare 28-byte hash).
#[derive(CandidType, Deserialize, Clone, Debug)]
pub enum Operation {
    Mint {
        to: Vec<u8>,
        amount: Tokens,
    },
    Burn {
        from: Vec<u8>,
        amount: Tokens,
    },
    Transfer {
        from: Vec<u8>,
        to: Vec<u8>,
        amount: Tokens,
        fee: Tokens,
    },
    Approve {
        from: Vec<u8>,
        spender: Vec<u8>,
        allowance: Tokens,
        expected_allowance: Option<Tokens>,
        expires_at: Option<Timestamp>,
        fee: Tokens,
    },
    TransferFrom {
        from: Vec<u8>,
        to: Vec<u8>,
        spender: Vec<u8>,
        amount: Tokens,
        fee: Tokens,
    },
}

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct NativeTransaction {
    pub memo: u64,
    pub operation: Option<Operation>,
    pub created_at_time: Timestamp,
    pub icrc1_memo: Option<Vec<u8>>,
}

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct NativeBlock {
    pub parent_hash: Option<Vec<u8>>,
    pub transaction: NativeTransaction,
    pub timestamp: Timestamp,
}

#[derive(CandidType, Deserialize, Clone, Copy, Debug)]
pub struct GetBlocksArgs {
    pub start: u64,
    pub length: u64,
}

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct BlockRange {
    pub blocks: Vec<NativeBlock>,
}

#[derive(CandidType, Deserialize, Clone, Debug)]
pub enum GetBlocksError {
    BadFirstBlockIndex {
        requested_index: u64,
        first_valid_index: u64,
    },
    Other {
        error_code: u64,
        error_message: String,
    },
}

pub type NativeArchiveResult = std::result::Result<BlockRange, GetBlocksError>;

candid::define_function!(pub QueryArchiveFn : (GetBlocksArgs) -> (NativeArchiveResult) query);

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct ArchivedBlockRange {
    pub start: u64,
    pub length: u64,
    pub callback: QueryArchiveFn,
}

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct QueryBlocksResponse {
    pub chain_length: u64,
    pub certificate: Option<Vec<u8>>,
    pub blocks: Vec<NativeBlock>,
    pub first_block_index: u64,
    pub archived_blocks: Vec<ArchivedBlockRange>,
}

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct GetBlocksRequest {
    pub start: Nat,
    pub length: Nat,
}

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct BlockWithId {
    pub id: Nat,
    pub block: Value,
}

candid::define_function!(pub IcrcArchiveFn : (Vec<GetBlocksRequest>) -> (IcrcBlocksPage) query);

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct ArchivedBlocks {
    pub args: Vec<GetBlocksRequest>,
    pub callback: IcrcArchiveFn,
}

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct IcrcBlocksPage {
    pub log_length: Nat,
    pub blocks: Vec<BlockWithId>,
    pub archived_blocks: Vec<ArchivedBlocks>,
}

/// One block as fetched, before normalization. The index is
/// ledger-relative and carried alongside because only the ICRC wire format
/// embeds it.
#[derive(Debug, Clone)]
pub enum RawBlock {
    Native { index: u64, block: NativeBlock },
    Tagged { index: u64, block: Value },
}

impl RawBlock {
    pub fn index(&self) -> u64 {
        match self {
            RawBlock::Native { index, .. } => *index,
            RawBlock::Tagged { index, .. } => *index,
        }
    }
}

/// An unresolved pointer to older blocks held by an archive canister.
#[derive(Debug, Clone)]
pub enum ArchivePointer {
    Native(ArchivedBlockRange),
    Icrc(ArchivedBlocks),
}

/// One page of a ledger's block log: whatever was available inline plus
/// pointers for the part of the range that has been archived.
#[derive(Debug)]
pub struct Page {
    pub blocks: Vec<RawBlock>,
    pub archived: Vec<ArchivePointer>,
}

/// Read-only client for one ledger canister.
#[derive(Clone)]
pub struct LedgerClient {
    agent: Agent,
    canister_id: Principal,
    kind: LedgerKind,
}

impl LedgerClient {
    pub fn new(agent: Agent, canister_id: Principal, kind: LedgerKind) -> Self {
        LedgerClient {
            agent,
            canister_id,
            kind,
        }
    }

    async fn query(&self, canister: &Principal, method: &str, arg: Vec<u8>) -> Result<Vec<u8>> {
        let bytes = self.agent.query(canister, method).with_arg(arg).call().await?;
        Ok(bytes)
    }

    /// Total number of blocks the ledger has recorded.
    pub async fn chain_length(&self) -> Result<u64> {
        match self.kind {
            LedgerKind::Native => {
                let arg = Encode!(&GetBlocksArgs { start: 0, length: 0 })?;
                let bytes = self.query(&self.canister_id, "query_blocks", arg).await?;
                let response = Decode!(&bytes, QueryBlocksResponse)?;
                Ok(response.chain_length)
            }
            LedgerKind::Icrc => {
                let requests = vec![GetBlocksRequest {
                    start: Nat::from(0u64),
                    length: Nat::from(0u64),
                }];
                let arg = Encode!(&requests)?;
                let bytes = self.query(&self.canister_id, "icrc3_get_blocks", arg).await?;
                let page = Decode!(&bytes, IcrcBlocksPage)?;
                Ok(u64::try_from(page.log_length.0.clone())?)
            }
        }
    }

    /// Fetches one `[start, start+length)` window of the block log.
    pub async fn fetch_page(&self, start: u64, length: u64) -> Result<Page> {
        match self.kind {
            LedgerKind::Native => {
                let arg = Encode!(&GetBlocksArgs { start, length })?;
                let bytes = self.query(&self.canister_id, "query_blocks", arg).await?;
                let response = Decode!(&bytes, QueryBlocksResponse)?;
                let first = response.first_block_index;
                let blocks = response
                    .blocks
                    .into_iter()
                    .enumerate()
                    .map(|(i, block)| RawBlock::Native {
                        index: first + i as u64,
                        block,
                    })
                    .collect();
                let archived = response
                    .archived_blocks
                    .into_iter()
                    .map(ArchivePointer::Native)
                    .collect();
                Ok(Page { blocks, archived })
            }
            LedgerKind::Icrc => {
                let requests = vec![GetBlocksRequest {
                    start: Nat::from(start),
                    length: Nat::from(length),
                }];
                let arg = Encode!(&requests)?;
                let bytes = self.query(&self.canister_id, "icrc3_get_blocks", arg).await?;
                let page = Decode!(&bytes, IcrcBlocksPage)?;
                Ok(Page {
                    blocks: tagged_blocks(page.blocks),
                    archived: page
                        .archived_blocks
                        .into_iter()
                        .map(ArchivePointer::Icrc)
                        .collect(),
                })
            }
        }
    }

    /// Resolves one archive pointer against its delegate canister.
    pub async fn fetch_archived(&self, pointer: &ArchivePointer) -> Result<Vec<RawBlock>> {
        match pointer {
            ArchivePointer::Native(range) => {
                let arg = Encode!(&GetBlocksArgs {
                    start: range.start,
                    length: range.length,
                })?;
                let func = &range.callback.0;
                let bytes = self.query(&func.principal, &func.method, arg).await?;
                match Decode!(&bytes, NativeArchiveResult)? {
                    Ok(range_result) => Ok(range_result
                        .blocks
                        .into_iter()
                        .enumerate()
                        .map(|(i, block)| RawBlock::Native {
                            index: range.start + i as u64,
                            block,
                        })
                        .collect()),
                    Err(e) => bail!("archive rejected range {}+{}: {:?}", range.start, range.length, e),
                }
            }
            ArchivePointer::Icrc(archived) => {
                let arg = Encode!(&archived.args)?;
                let func = &archived.callback.0;
                let bytes = self.query(&func.principal, &func.method, arg).await?;
                let page = Decode!(&bytes, IcrcBlocksPage)?;
                if !page.archived_blocks.is_empty() {
                    // Delegation is single-level; a delegate pointing onward
                    // would leave those blocks unscanned.
                    warn!(
                        "archive {} returned {} nested pointers, not following",
                        func.principal,
                        page.archived_blocks.len()
                    );
                }
                Ok(tagged_blocks(page.blocks))
            }
        }
    }
}

/// Pairs ICRC blocks with their embedded indices, dropping any block whose
/// id does not fit a block index.
fn tagged_blocks(blocks: Vec<BlockWithId>) -> Vec<RawBlock> {
    blocks
        .into_iter()
        .filter_map(|b| {
            let index = u64::try_from(b.id.0.clone()).ok()?;
            Some(RawBlock::Tagged {
                index,
                block: b.block,
            })
        })
        .collect()
}
