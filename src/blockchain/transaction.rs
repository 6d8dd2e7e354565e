use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::crypto::{public_key_hash, sha256, verify_signature, Address, CryptoError, Wallet};

/// Value minted by a coinbase transaction
pub const COINBASE_REWARD: u64 = 100;

/// Output index carried by the single input of a coinbase transaction
pub const COINBASE_OUTPUT_INDEX: i64 = -1;

/// Prior transactions keyed by id, as needed for signing and verification
pub type PriorTransactions = HashMap<Vec<u8>, Transaction>;

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Previous transaction does not exist: {0}")]
    MissingPriorTransaction(String),

    #[error("Output {index} does not exist in transaction {tx_id}")]
    InvalidOutputIndex { tx_id: String, index: i64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),
}

/// A reference to one prior output, plus the proof of ownership once signed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Id of the transaction holding the output being spent
    pub prev_tx_id: Vec<u8>,

    /// Index of the output within that transaction (-1 for coinbase)
    pub output_index: i64,

    /// `r ‖ s`, empty until signed
    pub signature: Vec<u8>,

    /// Raw `x ‖ y` public key of the spender (memo bytes for coinbase)
    pub public_key: Vec<u8>,
}

impl TxInput {
    /// Whether this input was made with the key whose hash is `locking_hash`
    pub fn uses_key(&self, locking_hash: &[u8]) -> bool {
        public_key_hash(&self.public_key) == locking_hash
    }
}

/// A value locked to a public key hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,

    pub locking_hash: Vec<u8>,
}

impl TxOutput {
    /// Creates an output paying `value` to `address`
    pub fn new(value: u64, address: &Address) -> Result<Self, CryptoError> {
        Ok(TxOutput {
            value,
            locking_hash: address.locking_hash()?,
        })
    }

    pub fn is_locked_with_key(&self, locking_hash: &[u8]) -> bool {
        self.locking_hash == locking_hash
    }
}

/// Represents a value transfer in the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Hash of the transaction with this field cleared
    pub id: Vec<u8>,

    pub inputs: Vec<TxInput>,

    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Creates a coinbase transaction minting the fixed reward to `to`
    ///
    /// # Arguments
    ///
    /// * `to` - The address receiving the reward
    /// * `memo` - Arbitrary data carried in the input; defaults to "Coins to {to}"
    ///
    /// # Returns
    ///
    /// A new Transaction instance with its id set
    pub fn new_coinbase(to: &Address, memo: &str) -> Result<Self, TransactionError> {
        let memo = if memo.is_empty() {
            format!("Coins to {}", to)
        } else {
            memo.to_string()
        };

        let input = TxInput {
            prev_tx_id: Vec::new(),
            output_index: COINBASE_OUTPUT_INDEX,
            signature: Vec::new(),
            public_key: memo.into_bytes(),
        };

        let mut tx = Transaction {
            id: Vec::new(),
            inputs: vec![input],
            outputs: vec![TxOutput::new(COINBASE_REWARD, to)?],
        };
        tx.set_id()?;

        Ok(tx)
    }

    /// Creates an unsigned transfer spending the `selected` outputs of `from`.
    ///
    /// Pays `amount` to `to_hash` and returns `accumulated - amount` to the
    /// sender as change when positive. Inputs follow the order of `selected`.
    pub fn new_transfer(
        from: &Wallet,
        to_hash: Vec<u8>,
        amount: u64,
        accumulated: u64,
        selected: &BTreeMap<Vec<u8>, Vec<usize>>,
    ) -> Result<Self, TransactionError> {
        let inputs = selected
            .iter()
            .flat_map(|(tx_id, indices)| {
                indices.iter().map(move |index| TxInput {
                    prev_tx_id: tx_id.clone(),
                    output_index: *index as i64,
                    signature: Vec::new(),
                    public_key: from.public_key().to_vec(),
                })
            })
            .collect();

        let mut outputs = vec![TxOutput {
            value: amount,
            locking_hash: to_hash,
        }];
        if accumulated > amount {
            outputs.push(TxOutput {
                value: accumulated - amount,
                locking_hash: from.public_key_hash(),
            });
        }

        let mut tx = Transaction {
            id: Vec::new(),
            inputs,
            outputs,
        };
        tx.set_id()?;

        Ok(tx)
    }

    /// Hash of the transaction's encoding with `id` cleared
    pub fn hash(&self) -> Result<Vec<u8>, TransactionError> {
        let copy = Transaction {
            id: Vec::new(),
            ..self.clone()
        };

        Ok(sha256(&bincode::serialize(&copy)?))
    }

    /// Sets `id` to the transaction's hash
    pub fn set_id(&mut self) -> Result<(), TransactionError> {
        self.id = self.hash()?;
        Ok(())
    }

    /// Checks if the transaction is a coinbase transaction
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && self.inputs[0].prev_tx_id.is_empty()
            && self.inputs[0].output_index == COINBASE_OUTPUT_INDEX
    }

    /// Sum of all output values
    pub fn total_output(&self) -> u64 {
        self.outputs.iter().map(|out| out.value).sum()
    }

    /// Copy with every input's signature and public key stripped
    fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .inputs
            .iter()
            .map(|input| TxInput {
                prev_tx_id: input.prev_tx_id.clone(),
                output_index: input.output_index,
                signature: Vec::new(),
                public_key: Vec::new(),
            })
            .collect();

        Transaction {
            id: self.id.clone(),
            inputs,
            outputs: self.outputs.clone(),
        }
    }

    /// The message input `index` is signed over: the id of the trimmed copy
    /// with that input's public key set to the locking hash of the output it spends
    fn input_message(
        trimmed: &Transaction,
        index: usize,
        priors: &PriorTransactions,
    ) -> Result<Vec<u8>, TransactionError> {
        let mut copy = trimmed.clone();
        let input = &copy.inputs[index];
        let spent = spent_output(input, priors)?;

        copy.inputs[index].public_key = spent.locking_hash.clone();
        copy.hash()
    }

    fn check_priors(&self, priors: &PriorTransactions) -> Result<(), TransactionError> {
        for input in &self.inputs {
            if !priors.contains_key(&input.prev_tx_id) {
                return Err(TransactionError::MissingPriorTransaction(hex::encode(
                    &input.prev_tx_id,
                )));
            }
        }
        Ok(())
    }

    /// Signs every input against the specific prior output it spends.
    ///
    /// No-op for coinbase transactions.
    pub fn sign(&mut self, wallet: &Wallet, priors: &PriorTransactions) -> Result<(), TransactionError> {
        if self.is_coinbase() {
            return Ok(());
        }

        self.check_priors(priors)?;

        let trimmed = self.trimmed_copy();
        for index in 0..self.inputs.len() {
            let message = Self::input_message(&trimmed, index, priors)?;
            self.inputs[index].signature = wallet.sign(&message)?;
        }

        Ok(())
    }

    /// Verifies every input's signature under the public key it carries.
    ///
    /// Returns `Ok(false)` on the first failing input, including one whose
    /// output index is out of range for its prior transaction. A prior
    /// transaction missing from `priors` is an error, not a failed verification.
    ///
    /// The input's public key is not checked against the spent output's
    /// locking hash.
    pub fn verify(&self, priors: &PriorTransactions) -> Result<bool, TransactionError> {
        if self.is_coinbase() {
            return Ok(true);
        }

        self.check_priors(priors)?;

        let trimmed = self.trimmed_copy();
        for (index, input) in self.inputs.iter().enumerate() {
            let message = match Self::input_message(&trimmed, index, priors) {
                Ok(message) => message,
                Err(TransactionError::InvalidOutputIndex { .. }) => return Ok(false),
                Err(err) => return Err(err),
            };
            if !verify_signature(&message, &input.signature, &input.public_key) {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

/// Looks up the output `input` spends
pub fn spent_output<'a>(
    input: &TxInput,
    priors: &'a PriorTransactions,
) -> Result<&'a TxOutput, TransactionError> {
    let prior = priors
        .get(&input.prev_tx_id)
        .ok_or_else(|| TransactionError::MissingPriorTransaction(hex::encode(&input.prev_tx_id)))?;

    usize::try_from(input.output_index)
        .ok()
        .and_then(|index| prior.outputs.get(index))
        .ok_or_else(|| TransactionError::InvalidOutputIndex {
            tx_id: hex::encode(&input.prev_tx_id),
            index: input.output_index,
        })
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Transaction {}:", hex::encode(&self.id))?;
        for (i, input) in self.inputs.iter().enumerate() {
            writeln!(f, "\tInput {}:", i)?;
            writeln!(f, "\t\tTxID: {}", hex::encode(&input.prev_tx_id))?;
            writeln!(f, "\t\tOut: {}", input.output_index)?;
            writeln!(f, "\t\tSignature: {}", hex::encode(&input.signature))?;
            writeln!(f, "\t\tPubKey: {}", hex::encode(&input.public_key))?;
        }
        for (i, output) in self.outputs.iter().enumerate() {
            writeln!(f, "\tOutput {}:", i)?;
            writeln!(f, "\t\tValue: {}", output.value)?;
            write!(f, "\t\tScript: {}", hex::encode(&output.locking_hash))?;
            if i + 1 < self.outputs.len() {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A coinbase paying `owner` and a signed transfer of `amount` out of it to `to`
    fn signed_transfer(owner: &Wallet, to: &Wallet, amount: u64) -> (Transaction, PriorTransactions) {
        let coinbase = Transaction::new_coinbase(owner.address(), "").unwrap();

        let mut selected = BTreeMap::new();
        selected.insert(coinbase.id.clone(), vec![0]);

        let mut tx = Transaction::new_transfer(
            owner,
            to.public_key_hash(),
            amount,
            COINBASE_REWARD,
            &selected,
        )
        .unwrap();

        let mut priors = PriorTransactions::new();
        priors.insert(coinbase.id.clone(), coinbase);
        tx.sign(owner, &priors).unwrap();

        (tx, priors)
    }

    #[test]
    fn test_coinbase_transaction() {
        let wallet = Wallet::new();
        let tx = Transaction::new_coinbase(wallet.address(), "").unwrap();

        assert!(tx.is_coinbase());
        assert_eq!(tx.outputs.len(), 1);
        assert_eq!(tx.outputs[0].value, COINBASE_REWARD);
        assert!(tx.outputs[0].is_locked_with_key(&wallet.public_key_hash()));
        assert_eq!(
            tx.inputs[0].public_key,
            format!("Coins to {}", wallet.address()).into_bytes()
        );
        assert_eq!(tx.id, tx.hash().unwrap());
        assert!(tx.verify(&PriorTransactions::new()).unwrap());
    }

    #[test]
    fn test_coinbase_rejects_invalid_address() {
        let result = Transaction::new_coinbase(&Address("bogus".to_string()), "");
        assert!(matches!(
            result,
            Err(TransactionError::CryptoError(CryptoError::InvalidAddress(_)))
        ));
    }

    #[test]
    fn test_hash_ignores_id() {
        let wallet = Wallet::new();
        let tx = Transaction::new_coinbase(wallet.address(), "memo").unwrap();

        let mut other = tx.clone();
        other.id = vec![1, 2, 3];
        assert_eq!(other.hash().unwrap(), tx.hash().unwrap());

        let decoded: Transaction = bincode::deserialize(&bincode::serialize(&tx).unwrap()).unwrap();
        assert_eq!(decoded.hash().unwrap(), tx.id);
    }

    #[test]
    fn test_transfer_outputs_and_change() {
        let owner = Wallet::new();
        let to = Wallet::new();
        let (tx, _) = signed_transfer(&owner, &to, 30);

        assert!(!tx.is_coinbase());
        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.inputs[0].public_key, owner.public_key());
        assert_eq!(tx.outputs[0].value, 30);
        assert_eq!(tx.outputs[0].locking_hash, to.public_key_hash());
        assert_eq!(tx.outputs[1].value, 70);
        assert_eq!(tx.outputs[1].locking_hash, owner.public_key_hash());
        assert_eq!(tx.total_output(), COINBASE_REWARD);
    }

    #[test]
    fn test_exact_amount_has_no_change() {
        let owner = Wallet::new();
        let to = Wallet::new();
        let (tx, _) = signed_transfer(&owner, &to, COINBASE_REWARD);

        assert_eq!(tx.outputs.len(), 1);
    }

    #[test]
    fn test_sign_and_verify() {
        let owner = Wallet::new();
        let to = Wallet::new();
        let (tx, priors) = signed_transfer(&owner, &to, 30);

        assert!(tx.inputs.iter().all(|input| input.signature.len() == 64));
        assert!(tx.verify(&priors).unwrap());
    }

    #[test]
    fn test_tampered_output_value_fails() {
        let owner = Wallet::new();
        let to = Wallet::new();
        let (mut tx, priors) = signed_transfer(&owner, &to, 30);

        tx.outputs[0].value = 31;
        assert!(!tx.verify(&priors).unwrap());
    }

    #[test]
    fn test_tampered_output_index_fails() {
        let owner = Wallet::new();
        let to = Wallet::new();
        let (first, mut priors) = signed_transfer(&owner, &to, 30);
        priors.insert(first.id.clone(), first.clone());

        // spend the 70 change output (index 1) of the first transfer
        let mut selected = BTreeMap::new();
        selected.insert(first.id.clone(), vec![1]);
        let mut tx =
            Transaction::new_transfer(&owner, to.public_key_hash(), 70, 70, &selected).unwrap();
        tx.sign(&owner, &priors).unwrap();
        assert!(tx.verify(&priors).unwrap());

        tx.inputs[0].output_index = 0;
        assert!(!tx.verify(&priors).unwrap());
    }

    #[test]
    fn test_tampered_signature_fails() {
        let owner = Wallet::new();
        let to = Wallet::new();
        let (mut tx, priors) = signed_transfer(&owner, &to, 30);

        tx.inputs[0].signature[5] ^= 0x01;
        assert!(!tx.verify(&priors).unwrap());
    }

    #[test]
    fn test_missing_prior_is_an_error() {
        let owner = Wallet::new();
        let to = Wallet::new();
        let (mut tx, _) = signed_transfer(&owner, &to, 30);

        let empty = PriorTransactions::new();
        assert!(matches!(
            tx.verify(&empty),
            Err(TransactionError::MissingPriorTransaction(_))
        ));
        assert!(matches!(
            tx.sign(&owner, &empty),
            Err(TransactionError::MissingPriorTransaction(_))
        ));
    }

    #[test]
    fn test_out_of_range_index_fails_verification() {
        let owner = Wallet::new();
        let to = Wallet::new();
        let (mut tx, priors) = signed_transfer(&owner, &to, 30);

        // the coinbase prior has a single output, so any other index is out of range
        tx.inputs[0].output_index ^= 0x01;
        assert!(matches!(tx.verify(&priors), Ok(false)));

        tx.inputs[0].output_index = 5;
        assert!(matches!(tx.verify(&priors), Ok(false)));

        tx.inputs[0].output_index = -7;
        assert!(matches!(tx.verify(&priors), Ok(false)));
    }

    #[test]
    fn test_out_of_range_index_cannot_be_signed() {
        let owner = Wallet::new();
        let to = Wallet::new();
        let (mut tx, priors) = signed_transfer(&owner, &to, 30);

        tx.inputs[0].output_index = 5;
        assert!(matches!(
            tx.sign(&owner, &priors),
            Err(TransactionError::InvalidOutputIndex { index: 5, .. })
        ));
    }

    #[test]
    fn test_verify_does_not_bind_key_to_locking_hash() {
        // Known gap: an input signed by a key other than the one the spent
        // output is locked to still verifies.
        let owner = Wallet::new();
        let thief = Wallet::new();
        let coinbase = Transaction::new_coinbase(owner.address(), "").unwrap();

        let mut selected = BTreeMap::new();
        selected.insert(coinbase.id.clone(), vec![0]);
        let mut tx = Transaction::new_transfer(
            &thief,
            thief.public_key_hash(),
            COINBASE_REWARD,
            COINBASE_REWARD,
            &selected,
        )
        .unwrap();

        let mut priors = PriorTransactions::new();
        priors.insert(coinbase.id.clone(), coinbase);
        tx.sign(&thief, &priors).unwrap();

        assert!(tx.verify(&priors).unwrap());
        assert!(!tx.inputs[0].uses_key(&owner.public_key_hash()));
    }

    #[test]
    fn test_display_lists_inputs_and_outputs() {
        let wallet = Wallet::new();
        let tx = Transaction::new_coinbase(wallet.address(), "memo").unwrap();
        let text = tx.to_string();

        assert!(text.contains(&hex::encode(&tx.id)));
        assert!(text.contains("Out: -1"));
        assert!(text.contains("Value: 100"));
    }
}
