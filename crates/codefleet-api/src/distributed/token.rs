//! Signed liveness tokens.
//!
//! A token is `<nonce>.<hex hmac-sha256(nonce)>`, keyed with the cluster's
//! shared secret. Each process signs its own random nonce at startup; a node
//! that receives its own nonce back knows the probe reached itself.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessToken {
    nonce: String,
    signature: String,
}

fn mac(secret: &str) -> HmacSha256 {
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take any size key")
}

impl LivenessToken {
    /// A token for a fresh random nonce.
    pub fn generate(secret: &str) -> Self {
        Self::for_nonce(Uuid::new_v4().simple().to_string(), secret)
    }

    pub fn for_nonce(nonce: impl Into<String>, secret: &str) -> Self {
        let nonce = nonce.into();
        let mut mac = mac(secret);
        mac.update(nonce.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        Self { nonce, signature }
    }

    /// Parse `<nonce>.<signature>`. The signature is not checked.
    pub fn parse(raw: &str) -> Option<Self> {
        let (nonce, signature) = raw.split_once('.')?;
        if nonce.is_empty() || signature.is_empty() {
            return None;
        }
        Some(Self {
            nonce: nonce.to_string(),
            signature: signature.to_string(),
        })
    }

    pub fn encode(&self) -> String {
        format!("{}.{}", self.nonce, self.signature)
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// Whether the signature matches the nonce under `secret`.
    pub fn verify(&self, secret: &str) -> bool {
        let Ok(signature) = hex::decode(&self.signature) else {
            return false;
        };
        let mut mac = mac(secret);
        mac.update(self.nonce.as_bytes());
        mac.verify_slice(&signature).is_ok()
    }
}
