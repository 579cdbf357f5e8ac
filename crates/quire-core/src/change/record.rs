//! Changes: signed, content-addressed batches of datoms.
//!
//! # Signing
//!
//! The signing bytes are the canonical CBOR encoding of the change with
//! `signature` set to `None`. The published blob is the same encoding with
//! the signature filled in, and the change id is the hash of that blob.

use ed25519_dalek::Signature;
use serde::{Deserialize, Serialize};

use super::body;
use super::cid::{Cid, Codec};
use super::keys::{DeviceKey, PublicKey};
use crate::error::{Error, Result};
use crate::model::{ChangeKey, Datom};

/// Kind tag of every change this crate produces.
pub const CHANGE_KIND: &str = "quire/change/v1";

/// Mutation record of one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Object (permanode id) the change belongs to.
    pub object: Cid,
    /// Account the change is attributed to.
    pub author: PublicKey,
    /// Causal parents, sorted.
    pub parents: Vec<Cid>,
    /// Lamport time, greater than every parent's.
    pub lamport_time: u64,
    /// Kind tag, [`CHANGE_KIND`].
    pub kind: String,
    /// Encoded datom batch.
    #[serde(with = "serde_bytes")]
    pub body: Vec<u8>,
    /// Creation time in unix microseconds.
    pub create_time: i64,
    /// Device that signs the change.
    pub signer: PublicKey,
    /// Ed25519 signature over the signing bytes.
    #[serde(with = "serde_bytes")]
    pub signature: Option<Vec<u8>>,
}

impl Change {
    /// Unsigned change. Parents are sorted and deduplicated.
    #[must_use]
    pub fn new(
        object: Cid,
        author: PublicKey,
        mut parents: Vec<Cid>,
        lamport_time: u64,
        body: Vec<u8>,
        create_time: i64,
        signer: PublicKey,
    ) -> Self {
        parents.sort_unstable();
        parents.dedup();
        Self {
            object,
            author,
            parents,
            lamport_time,
            kind: CHANGE_KIND.to_string(),
            body,
            create_time,
            signer,
            signature: None,
        }
    }

    /// Canonical encoding, signature included if present.
    ///
    /// # Errors
    ///
    /// [`Error::Malformed`] if encoding fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::ser::into_writer(self, &mut out).map_err(|e| Error::malformed("change", e))?;
        Ok(out)
    }

    /// Bytes covered by the signature.
    ///
    /// # Errors
    ///
    /// [`Error::Malformed`] if encoding fails.
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        if self.signature.is_none() {
            return self.encode();
        }
        let unsigned = Self {
            signature: None,
            ..self.clone()
        };
        unsigned.encode()
    }

    /// Pure, non-verifying parse.
    ///
    /// # Errors
    ///
    /// [`Error::Malformed`] if the bytes are not a change of a known kind.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let change: Self =
            ciborium::de::from_reader(bytes).map_err(|e| Error::malformed("change", e))?;
        if change.kind != CHANGE_KIND {
            return Err(Error::malformed(
                "change",
                format!("unsupported kind {:?}", change.kind),
            ));
        }
        Ok(change)
    }

    /// Sign with the declared signer's device key.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadySigned`] if a signature is present.
    /// - [`Error::SignerMismatch`] if `key` is not the declared signer.
    pub fn sign(mut self, key: &DeviceKey) -> Result<SignedChange> {
        if self.signature.is_some() {
            return Err(Error::AlreadySigned);
        }
        let actual = key.public();
        if actual != self.signer {
            return Err(Error::SignerMismatch {
                declared: self.signer.to_string(),
                actual: actual.to_string(),
            });
        }

        let sig = key.sign(&self.signing_bytes()?);
        self.signature = Some(sig.to_bytes().to_vec());
        let bytes = self.encode()?;

        Ok(SignedChange {
            id: Cid::of(Codec::DagCbor, &bytes),
            change: self,
            bytes,
        })
    }

    /// Check the signature against the declared signer.
    ///
    /// # Errors
    ///
    /// - [`Error::Unsigned`] if no signature is present.
    /// - [`Error::SignatureInvalid`] if it does not verify.
    pub fn verify(&self) -> Result<()> {
        let raw = self.signature.as_deref().ok_or(Error::Unsigned)?;
        let sig = Signature::from_slice(raw).map_err(|_| Error::SignatureInvalid {
            signer: self.signer.to_string(),
        })?;
        self.signer.verify(&self.signing_bytes()?, &sig)
    }
}

/// A signed change together with its id and published bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedChange {
    id: Cid,
    change: Change,
    bytes: Vec<u8>,
}

impl SignedChange {
    /// Decode, verify, and hash a published blob.
    ///
    /// # Errors
    ///
    /// Decoding errors, then verification errors.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let change = Change::decode(&bytes)?;
        change.verify()?;
        Ok(Self {
            id: Cid::of(Codec::DagCbor, &bytes),
            change,
            bytes,
        })
    }

    /// Decode and hash without checking the signature.
    ///
    /// # Errors
    ///
    /// [`Error::Malformed`] if the bytes are not a change.
    pub fn from_bytes_unverified(bytes: Vec<u8>) -> Result<Self> {
        let change = Change::decode(&bytes)?;
        Ok(Self {
            id: Cid::of(Codec::DagCbor, &bytes),
            change,
            bytes,
        })
    }

    /// Change id.
    #[must_use]
    pub const fn id(&self) -> Cid {
        self.id
    }

    /// The change record.
    #[must_use]
    pub const fn change(&self) -> &Change {
        &self.change
    }

    /// Published bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Datoms of the body, stamped with this change's lamport time, the
    /// signer's origin, and the key derived from the change id.
    ///
    /// # Errors
    ///
    /// Body decoding errors.
    pub fn datoms(&self) -> Result<Vec<Datom>> {
        body::decode(
            &self.change.body,
            self.change.lamport_time,
            self.change.signer.origin(),
            ChangeKey::from(self.id),
        )
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
    use crate::change::AccountKey;

    fn fixture() -> (DeviceKey, Change) {
        let mut rng = StdRng::seed_from_u64(5);
        let device = DeviceKey::new(&mut rng);
        let account = AccountKey::new(&mut rng);
        let object = Cid::of(Codec::DagCbor, b"object");
        let p1 = Cid::of(Codec::DagCbor, b"p1");
        let p2 = Cid::of(Codec::DagCbor, b"p2");
        let change = Change::new(
            object,
            account.public(),
            vec![p2, p1, p2],
            3,
            vec![1, 2, 3],
            1_000,
            device.public(),
        );
        (device, change)
    }

    #[test]
    fn parents_are_sorted_and_unique() {
        let (_, change) = fixture();
        assert_eq!(change.parents.len(), 2);
        assert!(change.parents[0] < change.parents[1]);
    }

    #[test]
    fn sign_then_verify() {
        let (key, change) = fixture();
        let signed = change.sign(&key).expect("sign");
        signed.change().verify().expect("verify");

        let again = SignedChange::from_bytes(signed.bytes().to_vec()).expect("parse");
        assert_eq!(again.id(), signed.id());
        assert_eq!(again.change(), signed.change());
    }

    #[test]
    fn wrong_key_is_signer_mismatch() {
        let (_, change) = fixture();
        let other = DeviceKey::from_bytes(&[9; 32]);
        let err = change.sign(&other).expect_err("mismatch");
        assert!(matches!(err, Error::SignerMismatch { .. }));
    }

    #[test]
    fn signing_twice_is_rejected() {
        let (key, change) = fixture();
        let signed = change.sign(&key).expect("sign");
        let err = signed.change().clone().sign(&key).expect_err("twice");
        assert!(matches!(err, Error::AlreadySigned));
    }

    #[test]
    fn tampering_breaks_the_signature() {
        let (key, change) = fixture();
        let signed = change.sign(&key).expect("sign");
        let mut tampered = signed.change().clone();
        tampered.lamport_time += 1;
        let err = tampered.verify().expect_err("tampered");
        assert!(matches!(err, Error::SignatureInvalid { .. }));

        let bytes = tampered.encode().expect("encode");
        assert!(SignedChange::from_bytes(bytes.clone()).is_err());
        assert!(SignedChange::from_bytes_unverified(bytes).is_ok());
    }

    #[test]
    fn unsigned_change_does_not_verify() {
        let (_, change) = fixture();
        assert!(matches!(change.verify(), Err(Error::Unsigned)));
    }

    #[test]
    fn decode_rejects_garbage_and_unknown_kinds() {
        assert!(matches!(Change::decode(b"nope"), Err(Error::Malformed { .. })));

        let (_, mut change) = fixture();
        change.kind = "other/v9".to_string();
        let bytes = change.encode().expect("encode");
        assert!(matches!(Change::decode(&bytes), Err(Error::Malformed { .. })));
    }

    #[test]
    fn id_hashes_the_signed_blob() {
        let (key, change) = fixture();
        let signed = change.sign(&key).expect("sign");
        assert_eq!(signed.id(), Cid::of(Codec::DagCbor, signed.bytes()));
    }
}
