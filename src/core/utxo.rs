//! Unspent output resolution
//!
//! Unspent outputs are never stored. They are projected on demand from the
//! confirmed blocks plus the pending pool, so a wallet can spend the change
//! of a transaction that is still waiting to be mined.

use crate::core::block::Block;
use crate::core::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Unspent Transaction Output (UTXO)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UTXO {
    /// Id of the transaction that created the output
    pub transaction: String,
    /// Position of the output in that transaction
    pub index: u32,
    pub amount: u64,
    pub address: String,
}

/// Outputs across `blocks` and `pending` not consumed by any input in the
/// same set, optionally restricted to one address. Ordering of spends does
/// not matter: an output consumed by a pending transaction is spent even if
/// it was created later in the scan.
pub fn unspent_outputs(blocks: &[Block], pending: &[Transaction], address: Option<&str>) -> Vec<UTXO> {
    let transactions = || {
        blocks
            .iter()
            .flat_map(|block| block.transactions.iter())
            .chain(pending.iter())
    };

    let spent: HashSet<(&str, u32)> = transactions()
        .flat_map(|tx| tx.inputs().iter())
        .filter(|input| address.map_or(true, |a| input.address == a))
        .map(|input| (input.transaction.as_str(), input.index))
        .collect();

    transactions()
        .flat_map(|tx| {
            tx.outputs()
                .iter()
                .enumerate()
                .map(move |(index, output)| (tx, index as u32, output))
        })
        .filter(|(_, _, output)| address.map_or(true, |a| output.address == a))
        .filter(|(tx, index, _)| !spent.contains(&(tx.id.as_str(), *index)))
        .map(|(tx, index, output)| UTXO {
            transaction: tx.id.clone(),
            index,
            amount: output.amount,
            address: output.address.clone(),
        })
        .collect()
}

/// Sum of the given outputs
pub fn total_amount(utxos: &[UTXO]) -> u64 {
    utxos.iter().map(|u| u.amount).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::{
        TransactionBody, TransactionInput, TransactionOutput, TransferData,
    };

    fn output(address: &str, amount: u64) -> TransactionOutput {
        TransactionOutput {
            amount,
            address: address.to_string(),
        }
    }

    fn spend(tx: &Transaction, index: u32, address: &str) -> TransactionInput {
        TransactionInput {
            transaction: tx.id.clone(),
            index,
            address: address.to_string(),
            amount: tx.outputs()[index as usize].amount,
            signature: String::new(),
        }
    }

    fn regular(inputs: Vec<TransactionInput>, outputs: Vec<TransactionOutput>) -> Transaction {
        Transaction::new(TransactionBody::Regular(TransferData { inputs, outputs }))
    }

    #[test]
    fn test_confirmed_outputs_are_unspent() {
        let reward = Transaction::reward("alice", 50);
        let block = Block::new(1, "0".into(), 0, 1, vec![reward.clone()]);

        let utxos = unspent_outputs(&[block], &[], Some("alice"));
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].transaction, reward.id);
        assert_eq!(utxos[0].index, 0);
        assert_eq!(total_amount(&utxos), 50);
    }

    #[test]
    fn test_pending_spend_consumes_and_creates() {
        let reward = Transaction::reward("alice", 50);
        let block = Block::new(1, "0".into(), 0, 1, vec![reward.clone()]);
        let payment = regular(
            vec![spend(&reward, 0, "alice")],
            vec![output("bob", 20), output("alice", 29)],
        );
        let pending = vec![payment.clone()];

        let alice = unspent_outputs(std::slice::from_ref(&block), &pending, Some("alice"));
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].transaction, payment.id);
        assert_eq!(alice[0].index, 1);
        assert_eq!(alice[0].amount, 29);

        let bob = unspent_outputs(std::slice::from_ref(&block), &pending, Some("bob"));
        assert_eq!(total_amount(&bob), 20);
    }

    #[test]
    fn test_spend_order_does_not_matter() {
        let reward = Transaction::reward("alice", 50);
        let payment = regular(vec![spend(&reward, 0, "alice")], vec![output("bob", 49)]);

        // The spender appears before the output it consumes
        let block = Block::new(1, "0".into(), 0, 1, vec![payment]);
        let pending = vec![reward];

        assert!(unspent_outputs(&[block], &pending, Some("alice")).is_empty());
    }

    #[test]
    fn test_global_resolution() {
        let a = Transaction::reward("alice", 50);
        let b = Transaction::reward("bob", 70);
        let block = Block::new(1, "0".into(), 0, 1, vec![a, b]);

        let all = unspent_outputs(&[block], &[], None);
        assert_eq!(all.len(), 2);
        assert_eq!(total_amount(&all), 120);
    }
}
