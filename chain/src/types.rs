//! Chain data mapped into plain domain types at the fetch boundary.

use {
    alloy::{
        consensus::{Transaction as TxConsensus, Typed2718},
        network::TransactionResponse,
        rpc::types::{Block, BlockTransactions, Log, TransactionReceipt},
    },
    quarry_shared::{
        LogJob,
        primitives::{U256, lower_hex_address, lower_hex_hash},
    },
};

#[derive(Debug, Clone, PartialEq)]
pub struct ChainBlock {
    pub number: u64,
    pub hash: String,
    pub timestamp: u64,
    pub base_fee_per_gas: Option<u64>,
    pub transactions: Vec<ChainTransaction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainTransaction {
    pub hash: String,
    pub from: String,
    pub to: Option<String>,
    pub value: U256,
    pub gas_limit: u64,
    /// The quoted `gasPrice`: effective price when the node reports one,
    /// otherwise the legacy price from the transaction envelope.
    pub gas_price: Option<u128>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    pub txn_type: u8,
    pub input: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainReceipt {
    pub contract_address: Option<String>,
    pub status: bool,
    pub gas_used: u64,
    pub effective_gas_price: u128,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainLog {
    pub address: String,
    pub block_number: u64,
    pub block_hash: String,
    pub block_timestamp: Option<u64>,
    pub data: String,
    pub log_index: u64,
    pub topics: Vec<String>,
    pub transaction_hash: String,
    pub transaction_index: Option<u64>,
}

impl ChainLog {
    /// The queue payload for this event.
    pub fn into_job(self) -> LogJob {
        LogJob {
            address: self.address,
            block_number: self.block_number,
            block_hash: self.block_hash,
            block_timestamp: self.block_timestamp,
            data: self.data,
            log_index: self.log_index,
            topics: self.topics,
            transaction_hash: self.transaction_hash,
            transaction_index: self.transaction_index,
            status: None,
        }
    }
}

pub(crate) fn block_from_rpc(block: Block) -> ChainBlock {
    let transactions = match &block.transactions {
        BlockTransactions::Full(txs) => txs.iter().map(tx_from_rpc).collect(),
        _ => Vec::new(),
    };
    ChainBlock {
        number: block.header.number,
        hash: lower_hex_hash(&block.header.hash),
        timestamp: block.header.timestamp,
        base_fee_per_gas: block.header.base_fee_per_gas,
        transactions,
    }
}

fn tx_from_rpc(tx: &alloy::rpc::types::Transaction) -> ChainTransaction {
    let txn_type = tx.ty();
    ChainTransaction {
        hash: lower_hex_hash(&tx.tx_hash()),
        from: lower_hex_address(&TransactionResponse::from(tx)),
        to: tx.to().map(|to| lower_hex_address(&to)),
        value: tx.value(),
        gas_limit: tx.gas_limit(),
        gas_price: tx.effective_gas_price.or_else(|| TxConsensus::gas_price(tx)),
        max_fee_per_gas: (txn_type >= 2).then(|| TxConsensus::max_fee_per_gas(tx)),
        max_priority_fee_per_gas: TxConsensus::max_priority_fee_per_gas(tx),
        txn_type,
        input: format!("0x{}", hex::encode(tx.input())),
    }
}

pub(crate) fn receipt_from_rpc(receipt: &TransactionReceipt) -> ChainReceipt {
    ChainReceipt {
        contract_address: receipt
            .contract_address
            .map(|address| lower_hex_address(&address)),
        status: receipt.status(),
        gas_used: receipt.gas_used,
        effective_gas_price: receipt.effective_gas_price,
    }
}

/// Maps a subscription or `eth_getLogs` log into the domain shape. Pending
/// logs without block context map to zeroed fields; consumers treat those
/// as malformed and skip them.
pub fn log_from_rpc(log: &Log) -> ChainLog {
    ChainLog {
        address: lower_hex_address(&log.address()),
        block_number: log.block_number.unwrap_or_default(),
        block_hash: log
            .block_hash
            .map(|hash| lower_hex_hash(&hash))
            .unwrap_or_default(),
        block_timestamp: log.block_timestamp,
        data: format!("0x{}", hex::encode(&log.data().data)),
        log_index: log.log_index.unwrap_or_default(),
        topics: log.topics().iter().map(lower_hex_hash).collect(),
        transaction_hash: log
            .transaction_hash
            .map(|hash| lower_hex_hash(&hash))
            .unwrap_or_default(),
        transaction_index: log.transaction_index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_log_maps_onto_the_job_payload() {
        let log = ChainLog {
            address: "0xtoken".to_owned(),
            block_number: 100,
            block_hash: "0xblock".to_owned(),
            block_timestamp: Some(1_700_000_000),
            data: "0x0a".to_owned(),
            log_index: 5,
            topics: vec!["0xsig".to_owned()],
            transaction_hash: "0xtx".to_owned(),
            transaction_index: Some(2),
        };
        let job = log.into_job();
        assert_eq!(job.block_number, 100);
        assert_eq!(job.log_index, 5);
        assert_eq!(job.status, None);
    }
}
