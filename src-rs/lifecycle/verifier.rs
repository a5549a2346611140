//! Independent check of a signing task's output.
//!
//! Decrypted output layout:
//!
//! ```text
//! [0, 64)     header, two 32-byte words (ignored)
//! [64, 128)   public key, 64 bytes, uncompressed secp256k1 without 0x04
//! [128, 193)  signature r ‖ s ‖ v
//! [193, ..)   zero padding
//! ```

use tracing::{info, warn};

use crate::crypto::{keccak256, recover_public_key, PUBLIC_KEY_LEN, SIGNATURE_LEN};
use crate::error::TaskError;

const HEADER_LEN: usize = 64;
const PUBLIC_KEY_OFFSET: usize = HEADER_LEN;
const SIGNATURE_OFFSET: usize = PUBLIC_KEY_OFFSET + PUBLIC_KEY_LEN;
pub const MIN_RECORD_LEN: usize = SIGNATURE_OFFSET + SIGNATURE_LEN;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputRecord {
    pub public_key: [u8; PUBLIC_KEY_LEN],
    pub signature: [u8; SIGNATURE_LEN],
}

impl OutputRecord {
    pub fn new(public_key: [u8; PUBLIC_KEY_LEN], signature: [u8; SIGNATURE_LEN]) -> Self {
        Self {
            public_key,
            signature,
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self, TaskError> {
        if buf.len() < MIN_RECORD_LEN {
            return Err(TaskError::OutputLayout(format!(
                "expected at least {} bytes, got {}",
                MIN_RECORD_LEN,
                buf.len()
            )));
        }
        let padding = &buf[MIN_RECORD_LEN..];
        if let Some(pos) = padding.iter().position(|b| *b != 0) {
            return Err(TaskError::OutputLayout(format!(
                "non-zero byte in signature padding at offset {}",
                MIN_RECORD_LEN + pos
            )));
        }

        let mut public_key = [0u8; PUBLIC_KEY_LEN];
        public_key.copy_from_slice(&buf[PUBLIC_KEY_OFFSET..SIGNATURE_OFFSET]);
        let mut signature = [0u8; SIGNATURE_LEN];
        signature.copy_from_slice(&buf[SIGNATURE_OFFSET..MIN_RECORD_LEN]);
        Ok(Self {
            public_key,
            signature,
        })
    }

    /// Parses the hex form handed out by the decryption layer.
    pub fn parse_hex(raw: &str) -> Result<Self, TaskError> {
        let bytes = hex::decode(raw.trim().trim_start_matches("0x"))
            .map_err(|err| TaskError::OutputLayout(format!("output is not hex: {}", err)))?;
        Self::parse(&bytes)
    }

    /// Worker-side encoding: header words hold the field offsets, signature
    /// padded to a 32-byte boundary.
    pub fn encode(&self) -> Vec<u8> {
        let padded_sig = SIGNATURE_LEN.div_ceil(32) * 32;
        let mut out = vec![0u8; SIGNATURE_OFFSET + padded_sig];
        out[31] = PUBLIC_KEY_OFFSET as u8;
        out[63] = SIGNATURE_OFFSET as u8;
        out[PUBLIC_KEY_OFFSET..SIGNATURE_OFFSET].copy_from_slice(&self.public_key);
        out[SIGNATURE_OFFSET..MIN_RECORD_LEN].copy_from_slice(&self.signature);
        out
    }
}

/// Result of a successful check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedSignature {
    pub public_key: [u8; PUBLIC_KEY_LEN],
    pub signature: [u8; SIGNATURE_LEN],
}

impl VerifiedSignature {
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key)
    }

    pub fn signature_hex(&self) -> String {
        format!("0x{}", hex::encode(self.signature))
    }
}

pub struct ResultVerifier;

impl ResultVerifier {
    /// Recovers the signer of `plaintext` from the signature field and
    /// requires it to equal the public key field.
    pub fn verify(decrypted: &[u8], plaintext: &[u8]) -> Result<VerifiedSignature, TaskError> {
        Self::verify_record(&OutputRecord::parse(decrypted)?, plaintext)
    }

    pub fn verify_record(record: &OutputRecord, plaintext: &[u8]) -> Result<VerifiedSignature, TaskError> {
        let digest = keccak256(plaintext);
        let recovered = recover_public_key(&record.signature, &digest)?;
        if recovered != record.public_key {
            warn!(
                expected = %hex::encode(record.public_key),
                recovered = %hex::encode(recovered),
                "signature does not match published key"
            );
            return Err(TaskError::VerificationMismatch {
                expected: hex::encode(record.public_key),
                recovered: hex::encode(recovered),
            });
        }
        info!(public_key = %hex::encode(recovered), "signature verified");
        Ok(VerifiedSignature {
            public_key: record.public_key,
            signature: record.signature,
        })
    }
}
