//! Unspent-output discovery by walking the chain from tip to genesis.
//!
//! Nothing is indexed: every query rescans the whole chain, so cost grows
//! linearly with chain length. The reverse walk is what makes first-seen
//! spends shadow the older outputs they consume.

use std::collections::{BTreeMap, HashMap};

use super::chain::{Blockchain, ChainError};
use super::transaction::{Transaction, TxOutput};

/// Outputs chosen to cover a requested amount
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpendableOutputs {
    /// Sum of the selected outputs' values
    pub accumulated: u64,

    /// Selected output indices keyed by transaction id
    pub outputs: BTreeMap<Vec<u8>, Vec<usize>>,
}

/// A transaction with the indices of its outputs that are unspent and
/// locked to the queried key
#[derive(Debug, Clone, PartialEq, Eq)]
struct UnspentEntry {
    tx: Transaction,
    indices: Vec<usize>,
}

/// Read-only UTXO queries over a chain
pub struct UtxoSet<'a> {
    chain: &'a Blockchain,
}

impl<'a> UtxoSet<'a> {
    pub fn new(chain: &'a Blockchain) -> Self {
        UtxoSet { chain }
    }

    /// Single pass over the chain collecting unspent outputs locked to `locking_hash`.
    ///
    /// Order is tip to genesis, newest transaction first within a block,
    /// outputs by index.
    fn scan(&self, locking_hash: &[u8]) -> Result<Vec<UnspentEntry>, ChainError> {
        let mut spent: HashMap<Vec<u8>, Vec<i64>> = HashMap::new();
        let mut unspent = Vec::new();

        for block in self.chain.iter() {
            let block = block?;

            for tx in block.transactions.into_iter().rev() {
                let spent_here = spent.get(&tx.id);
                let indices: Vec<usize> = tx
                    .outputs
                    .iter()
                    .enumerate()
                    .filter(|(index, out)| {
                        let already_spent = spent_here
                            .map_or(false, |spent| spent.contains(&(*index as i64)));
                        !already_spent && out.is_locked_with_key(locking_hash)
                    })
                    .map(|(index, _)| index)
                    .collect();

                if !tx.is_coinbase() {
                    for input in tx.inputs.iter().filter(|input| input.uses_key(locking_hash)) {
                        spent
                            .entry(input.prev_tx_id.clone())
                            .or_default()
                            .push(input.output_index);
                    }
                }

                if !indices.is_empty() {
                    unspent.push(UnspentEntry { tx, indices });
                }
            }
        }

        Ok(unspent)
    }

    /// Transactions holding at least one unspent output locked to `locking_hash`.
    ///
    /// Whole transactions are returned; other outputs in them may belong to
    /// someone else.
    pub fn find_unspent_transactions(&self, locking_hash: &[u8]) -> Result<Vec<Transaction>, ChainError> {
        Ok(self
            .scan(locking_hash)?
            .into_iter()
            .map(|entry| entry.tx)
            .collect())
    }

    /// Unspent outputs locked to `locking_hash`
    pub fn find_utxo(&self, locking_hash: &[u8]) -> Result<Vec<TxOutput>, ChainError> {
        let mut utxos = Vec::new();

        for entry in self.scan(locking_hash)? {
            for index in entry.indices {
                utxos.push(entry.tx.outputs[index].clone());
            }
        }

        Ok(utxos)
    }

    /// Total value of the unspent outputs locked to `locking_hash`
    pub fn balance(&self, locking_hash: &[u8]) -> Result<u64, ChainError> {
        Ok(self.find_utxo(locking_hash)?.iter().map(|out| out.value).sum())
    }

    /// Greedily selects unspent outputs, in scan order, until their sum
    /// reaches `amount`.
    ///
    /// `accumulated < amount` in the result means the key cannot cover it.
    pub fn find_spendable_outputs(
        &self,
        locking_hash: &[u8],
        amount: u64,
    ) -> Result<SpendableOutputs, ChainError> {
        let mut spendable = SpendableOutputs::default();

        'work: for entry in self.scan(locking_hash)? {
            for index in entry.indices {
                if spendable.accumulated >= amount {
                    break 'work;
                }

                spendable.accumulated += entry.tx.outputs[index].value;
                spendable
                    .outputs
                    .entry(entry.tx.id.clone())
                    .or_default()
                    .push(index);
            }
        }

        Ok(spendable)
    }
}
