use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use k256::{EncodedPoint, FieldBytes};
use rand::rngs::OsRng;
use ripemd::Ripemd160;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;
use std::str::FromStr;

/// Version byte prepended to the public key hash before Base58Check encoding
pub const ADDRESS_VERSION: u8 = 0x00;

/// Length in bytes of a single curve coordinate or signature scalar
const SCALAR_LENGTH: usize = 32;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Failed to sign message: {0}")]
    SigningError(String),
}

/// SHA-256 of `data`
pub fn sha256(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

/// RIPEMD-160 over SHA-256 of a raw public key, the value outputs are locked to
pub fn public_key_hash(public_key: &[u8]) -> Vec<u8> {
    let sha = Sha256::digest(public_key);
    Ripemd160::digest(sha).to_vec()
}

/// Represents a wallet address (Base58Check of the version byte and public key hash)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct Address(pub String);

impl Address {
    /// Encodes a public key hash as an address
    pub fn from_public_key_hash(public_key_hash: &[u8]) -> Self {
        let encoded = bs58::encode(public_key_hash)
            .with_check_version(ADDRESS_VERSION)
            .into_string();
        Address(encoded)
    }

    /// Creates an address from a raw `x ‖ y` public key
    pub fn from_public_key(public_key: &[u8]) -> Self {
        Self::from_public_key_hash(&public_key_hash(public_key))
    }

    /// Decodes the address, validates its checksum and returns the embedded public key hash
    pub fn locking_hash(&self) -> Result<Vec<u8>, CryptoError> {
        let decoded = bs58::decode(&self.0)
            .with_check(Some(ADDRESS_VERSION))
            .into_vec()
            .map_err(|e| CryptoError::InvalidAddress(format!("{}: {}", self.0, e)))?;

        // the version byte is kept by the decoder, the checksum is not
        match decoded.split_first() {
            Some((_, hash)) if !hash.is_empty() => Ok(hash.to_vec()),
            _ => Err(CryptoError::InvalidAddress(format!("{}: empty payload", self.0))),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address = Address(s.to_string());
        address.locking_hash()?;
        Ok(address)
    }
}

/// Represents a wallet with a single flat secp256k1 keypair
#[derive(Debug, Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    public_key: Vec<u8>,
    address: Address,
}

impl Wallet {
    /// Creates a new wallet with a random keypair
    pub fn new() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    /// Creates a wallet from an existing secret key
    pub fn from_secret_key(secret_key_bytes: &[u8]) -> Result<Self, CryptoError> {
        let signing_key = SigningKey::from_slice(secret_key_bytes)
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;

        Ok(Self::from_signing_key(signing_key))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let point = signing_key.verifying_key().to_encoded_point(false);
        // drop the SEC1 0x04 tag, leaving x ‖ y
        let public_key = point.as_bytes()[1..].to_vec();
        let address = Address::from_public_key(&public_key);

        Wallet {
            signing_key,
            public_key,
            address,
        }
    }

    /// Gets the wallet's address
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Gets the raw public key as `x ‖ y`
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Gets the hash outputs paid to this wallet are locked with
    pub fn public_key_hash(&self) -> Vec<u8> {
        public_key_hash(&self.public_key)
    }

    /// Signs a message, returning `r ‖ s`
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let signature: Signature = self
            .signing_key
            .try_sign(message)
            .map_err(|e| CryptoError::SigningError(e.to_string()))?;

        Ok(signature.to_bytes().to_vec())
    }

    /// Exports the wallet's secret key as bytes
    pub fn export_secret_key(&self) -> Vec<u8> {
        self.signing_key.to_bytes().to_vec()
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

/// Rebuilds a verifying key from a raw `x ‖ y` public key
pub fn verifying_key_from_raw(public_key: &[u8]) -> Result<VerifyingKey, CryptoError> {
    let (x, y) = public_key.split_at(public_key.len() / 2);
    let x: [u8; SCALAR_LENGTH] = x
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey(format!("bad key length {}", public_key.len())))?;
    let y: [u8; SCALAR_LENGTH] = y
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey(format!("bad key length {}", public_key.len())))?;

    let x = FieldBytes::from(x);
    let y = FieldBytes::from(y);
    let point = EncodedPoint::from_affine_coordinates(&x, &y, false);

    VerifyingKey::from_encoded_point(&point)
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

/// Verifies an `r ‖ s` signature over `message` under a raw `x ‖ y` public key.
///
/// Malformed signatures or keys verify as false.
pub fn verify_signature(message: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
    let verifying_key = match verifying_key_from_raw(public_key) {
        Ok(key) => key,
        Err(_) => return false,
    };

    let (r, s) = signature.split_at(signature.len() / 2);
    let (r, s): ([u8; SCALAR_LENGTH], [u8; SCALAR_LENGTH]) = match (r.try_into(), s.try_into()) {
        (Ok(r), Ok(s)) => (r, s),
        _ => return false,
    };

    let signature = match Signature::from_scalars(r, s) {
        Ok(signature) => signature,
        Err(_) => return false,
    };

    verifying_key.verify(message, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_creation() {
        let wallet = Wallet::new();
        assert!(!wallet.address.0.is_empty());
        assert_eq!(wallet.public_key().len(), 64);
        assert_eq!(wallet.public_key_hash().len(), 20);
    }

    #[test]
    fn test_signing_and_verification() {
        let wallet = Wallet::new();
        let message = b"Hello, world!";

        let signature = wallet.sign(message).unwrap();
        assert_eq!(signature.len(), 64);
        assert!(verify_signature(message, &signature, wallet.public_key()));

        // Verify with wrong message
        assert!(!verify_signature(b"Wrong message", &signature, wallet.public_key()));

        // Verify with another key
        let other = Wallet::new();
        assert!(!verify_signature(message, &signature, other.public_key()));
    }

    #[test]
    fn test_malformed_signature_is_rejected() {
        let wallet = Wallet::new();
        let signature = wallet.sign(b"msg").unwrap();

        assert!(!verify_signature(b"msg", &signature[..63], wallet.public_key()));
        assert!(!verify_signature(b"msg", &[], wallet.public_key()));
        assert!(!verify_signature(b"msg", &signature, &wallet.public_key()[..10]));
    }

    #[test]
    fn test_address_to_locking_hash() {
        let wallet = Wallet::new();
        let address = wallet.address();

        let locking_hash = address.locking_hash().unwrap();
        assert_eq!(locking_hash, wallet.public_key_hash());
        assert_eq!(address.0.parse::<Address>().unwrap(), *address);
    }

    #[test]
    fn test_address_checksum_mismatch() {
        let wallet = Wallet::new();
        let mut chars: Vec<char> = wallet.address().0.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == '2' { '3' } else { '2' };
        let tampered = Address(chars.into_iter().collect());

        assert!(matches!(
            tampered.locking_hash(),
            Err(CryptoError::InvalidAddress(_))
        ));
        assert!("not-base58-0OIl".parse::<Address>().is_err());
    }

    #[test]
    fn test_secret_key_roundtrip() {
        let wallet = Wallet::new();
        let restored = Wallet::from_secret_key(&wallet.export_secret_key()).unwrap();

        assert_eq!(restored.public_key(), wallet.public_key());
        assert_eq!(restored.address(), wallet.address());
        assert!(Wallet::from_secret_key(&[1u8; 5]).is_err());
    }

    #[test]
    fn test_verifying_key_from_raw() {
        let wallet = Wallet::new();
        assert!(verifying_key_from_raw(wallet.public_key()).is_ok());

        let mut off_curve = wallet.public_key().to_vec();
        off_curve[63] ^= 0x01;
        assert!(verifying_key_from_raw(&off_curve).is_err());
    }
}
