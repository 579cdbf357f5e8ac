//! Signing keys for devices and accounts.
//!
//! A [`DeviceKey`] signs changes. An [`AccountKey`] owns documents. Both wrap
//! an ed25519 [`SigningKey`]; their public halves are [`PublicKey`]s.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};

use super::base32;
use crate::error::{Error, Result};
use crate::model::Origin;

/// Device key used to sign changes.
#[derive(Clone, Serialize, Deserialize)]
pub struct DeviceKey {
    signing_key: SigningKey,
}

impl DeviceKey {
    /// Create a new device key from `rng`.
    pub fn new<R: CryptoRngCore + ?Sized>(rng: &mut R) -> Self {
        Self {
            signing_key: SigningKey::generate(rng),
        }
    }

    /// Create from the 32 secret bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    /// Secret bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Public half.
    #[must_use]
    pub fn public(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key())
    }

    /// Sign a message.
    #[must_use]
    pub fn sign(&self, msg: &[u8]) -> Signature {
        self.signing_key.sign(msg)
    }
}

/// Account key owning documents.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccountKey {
    signing_key: SigningKey,
}

impl AccountKey {
    /// Create a new account key from `rng`.
    pub fn new<R: CryptoRngCore + ?Sized>(rng: &mut R) -> Self {
        Self {
            signing_key: SigningKey::generate(rng),
        }
    }

    /// Create from the 32 secret bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    /// Public half.
    #[must_use]
    pub fn public(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key())
    }

    /// Sign a message.
    #[must_use]
    pub fn sign(&self, msg: &[u8]) -> Signature {
        self.signing_key.sign(msg)
    }
}

/// Public key of a device or account.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    /// Strictly verify `signature` over `msg`.
    ///
    /// # Errors
    ///
    /// [`Error::SignatureInvalid`] if the signature does not verify.
    pub fn verify(&self, msg: &[u8], signature: &Signature) -> Result<()> {
        self.0
            .verify_strict(msg, signature)
            .map_err(|_| Error::SignatureInvalid {
                signer: self.to_string(),
            })
    }

    /// Raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Create from raw bytes.
    ///
    /// # Errors
    ///
    /// [`Error::Malformed`] if the bytes are not a valid curve point.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        VerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|e| Error::malformed("public key", e))
    }

    /// Abbreviated identifier stamped on ops.
    #[must_use]
    pub fn origin(&self) -> Origin {
        Origin::from_key_bytes(self.as_bytes())
    }
}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&base32::fmt(self.as_bytes()))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({self})")
    }
}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceKey({})", self.public())
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountKey({})", self.public())
    }
}

impl FromStr for PublicKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes: [u8; 32] = base32::parse(s)?
            .try_into()
            .map_err(|_| Error::malformed("public key", "expected 32 bytes"))?;
        Self::from_bytes(&bytes)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn sign_and_verify() {
        let mut rng = StdRng::seed_from_u64(1);
        let key = DeviceKey::new(&mut rng);
        let sig = key.sign(b"msg");
        key.public().verify(b"msg", &sig).expect("verifies");

        let err = key.public().verify(b"other", &sig).expect_err("tampered");
        assert!(matches!(err, Error::SignatureInvalid { .. }));
    }

    #[test]
    fn public_key_text_round_trip() {
        let mut rng = StdRng::seed_from_u64(2);
        let key = AccountKey::new(&mut rng).public();
        let s = key.to_string();
        assert_eq!(s.parse::<PublicKey>().expect("parses"), key);
        assert!("not-base32".parse::<PublicKey>().is_err());
    }

    #[test]
    fn origin_is_key_prefix() {
        let key = DeviceKey::from_bytes(&[7; 32]).public();
        let mut head = [0u8; 8];
        head.copy_from_slice(&key.as_bytes()[..8]);
        assert_eq!(key.origin(), Origin(u64::from_be_bytes(head)));
    }

    #[test]
    fn secret_bytes_round_trip() {
        let mut rng = StdRng::seed_from_u64(3);
        let key = DeviceKey::new(&mut rng);
        let again = DeviceKey::from_bytes(&key.to_bytes());
        assert_eq!(key.public(), again.public());
    }
}
