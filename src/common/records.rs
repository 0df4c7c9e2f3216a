//! Values and peer announcements carried in lookup responses.

use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::common::{Id, ID_SIZE};

/// The size of the nonce distinguishing signed values under one key.
pub const NONCE_SIZE: usize = 24;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// A stored value, either content addressed or signed.
pub enum Value {
    /// Content addressed: valid under the target equal to the hash of its
    /// bytes.
    Immutable(Bytes),
    /// Signed by its author, addressed by key and nonce.
    Signed(SignedValue),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// A value signed with its author's ed25519 key.
pub struct SignedValue {
    /// ed25519 public key of the author
    public_key: [u8; 32],
    /// distinguishes values stored under one key
    #[serde(with = "serde_bytes")]
    nonce: [u8; NONCE_SIZE],
    /// sequence number, newer supersedes older
    pub(crate) seq: i64,
    /// the signed payload
    data: Bytes,
    /// ed25519 signature over nonce, seq and data
    #[serde(with = "serde_bytes")]
    signature: [u8; 64],
}

impl Value {
    /// Create a content addressed value.
    pub fn immutable(data: Bytes) -> Self {
        Value::Immutable(data)
    }

    /// Create and sign a value from a signing key, nonce, sequence number
    /// and payload.
    pub fn signed(signer: SigningKey, nonce: [u8; NONCE_SIZE], seq: i64, data: Bytes) -> Self {
        let signable = encode_value_signable(&nonce, seq, &data);
        let signature = signer.sign(&signable);

        Value::Signed(SignedValue {
            public_key: signer.verifying_key().to_bytes(),
            nonce,
            seq,
            data,
            signature: signature.into(),
        })
    }

    /// The target this value lives under.
    pub fn target(&self) -> Id {
        match self {
            Value::Immutable(data) => hash_immutable(data),
            Value::Signed(signed) => target_from_key(&signed.public_key, &signed.nonce),
        }
    }

    /// Check this value against the target it was returned for.
    ///
    /// Immutable values must hash to the target. Signed values must be
    /// addressed by their key and nonce and carry a valid signature.
    pub fn validate(&self, target: &Id) -> Result<(), ValueError> {
        match self {
            Value::Immutable(_) => {
                if self.target() != *target {
                    return Err(ValueError::TargetMismatch);
                }
            }
            Value::Signed(signed) => {
                if self.target() != *target {
                    return Err(ValueError::TargetMismatch);
                }
                signed.verify()?;
            }
        }

        Ok(())
    }

    // === Getters ===

    pub fn data(&self) -> &Bytes {
        match self {
            Value::Immutable(data) => data,
            Value::Signed(signed) => &signed.data,
        }
    }

    /// Sequence number for signed values, `None` for immutable ones.
    pub fn seq(&self) -> Option<i64> {
        match self {
            Value::Immutable(_) => None,
            Value::Signed(signed) => Some(signed.seq),
        }
    }
}

impl SignedValue {
    fn verify(&self) -> Result<(), ValueError> {
        let key = VerifyingKey::from_bytes(&self.public_key)
            .map_err(|_| ValueError::InvalidPublicKey)?;

        let signature = Signature::from_bytes(&self.signature);

        key.verify(
            &encode_value_signable(&self.nonce, self.seq, &self.data),
            &signature,
        )
        .map_err(|_| ValueError::InvalidSignature)?;

        Ok(())
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    pub fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }

    pub fn signature(&self) -> &[u8; 64] {
        &self.signature
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// A peer announcement, signed with the peer's own key.
///
/// The announced peer is addressed by its public key, so the lookup target
/// for a peer is [PeerRecord::peer_id]. The announcing node's id is covered
/// by the signature, which stops other nodes from replaying the record as
/// their own.
pub struct PeerRecord {
    /// ed25519 public key of the peer, also its id
    public_key: [u8; 32],
    /// id of the node that stores this announcement
    node_id: Id,
    /// Address the announcement came from, observed by the storing node.
    /// Not covered by the signature.
    ip: IpAddr,
    /// port the peer listens on
    port: u16,
    /// ed25519 signature over node id and port
    #[serde(with = "serde_bytes")]
    signature: [u8; 64],
}

impl PeerRecord {
    /// Create and sign an announcement of `signer`'s peer at `ip:port`,
    /// stored on `node_id`.
    pub fn new(signer: SigningKey, node_id: Id, ip: IpAddr, port: u16) -> Self {
        let signable = encode_peer_signable(&node_id, port);
        let signature = signer.sign(&signable);

        Self {
            public_key: signer.verifying_key().to_bytes(),
            node_id,
            ip,
            port,
            signature: signature.into(),
        }
    }

    /// Verify a record received in a lookup response.
    pub fn verify(&self) -> Result<(), PeerRecordError> {
        let key = VerifyingKey::from_bytes(&self.public_key)
            .map_err(|_| PeerRecordError::InvalidPublicKey)?;

        let signature = Signature::from_bytes(&self.signature);

        key.verify(&encode_peer_signable(&self.node_id, self.port), &signature)
            .map_err(|_| PeerRecordError::InvalidSignature)?;

        Ok(())
    }

    // === Getters ===

    /// The peer's id, equal to its public key.
    pub fn peer_id(&self) -> Id {
        Id(self.public_key)
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    pub fn node_id(&self) -> &Id {
        &self.node_id
    }

    /// Where the peer can be reached.
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

/// The target of an immutable value is the hash of its bytes.
pub fn hash_immutable(data: &[u8]) -> Id {
    let digest: [u8; ID_SIZE] = Sha256::digest(data).into();

    Id(digest)
}

/// The target of a signed value is the hash of its key and nonce.
pub fn target_from_key(public_key: &[u8; 32], nonce: &[u8; NONCE_SIZE]) -> Id {
    let mut hasher = Sha256::new();
    hasher.update(public_key);
    hasher.update(nonce);
    let digest: [u8; ID_SIZE] = hasher.finalize().into();

    Id(digest)
}

pub fn encode_value_signable(nonce: &[u8; NONCE_SIZE], seq: i64, data: &[u8]) -> Box<[u8]> {
    let mut signable = Vec::with_capacity(NONCE_SIZE + data.len() + 24);

    signable.extend(format!("5:nonce{}:", NONCE_SIZE).into_bytes());
    signable.extend(nonce);
    signable.extend(format!("3:seqi{}e1:v{}:", seq, data.len()).into_bytes());
    signable.extend(data);

    signable.into()
}

pub fn encode_peer_signable(node_id: &Id, port: u16) -> Box<[u8]> {
    let mut signable = Vec::with_capacity(ID_SIZE + 16);

    signable.extend(format!("4:node{}:", ID_SIZE).into_bytes());
    signable.extend(node_id.as_bytes());
    signable.extend(format!("4:porti{}e", port).into_bytes());

    signable.into()
}

#[derive(thiserror::Error, Debug)]
/// Errors validating a [Value] against a lookup target.
pub enum ValueError {
    #[error("Value does not hash to the requested target")]
    TargetMismatch,

    #[error("Invalid value signature")]
    InvalidSignature,

    #[error("Invalid value public key")]
    InvalidPublicKey,
}

#[derive(thiserror::Error, Debug)]
/// Errors validating a [PeerRecord].
pub enum PeerRecordError {
    #[error("Invalid peer record signature")]
    InvalidSignature,

    #[error("Invalid peer record public key")]
    InvalidPublicKey,
}
