//! Hashing, secp256k1 public-key recovery and the AES-GCM envelope used for
//! task outputs.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use sha3::{Digest, Keccak256};

use crate::error::TaskError;

pub const PUBLIC_KEY_LEN: usize = 64;
pub const SIGNATURE_LEN: usize = 65;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Recovers the signer's public key (64 bytes, no `0x04` prefix) from an
/// `r ‖ s ‖ v` signature over `digest`.
pub fn recover_public_key(
    signature: &[u8; SIGNATURE_LEN],
    digest: &[u8; 32],
) -> Result<[u8; PUBLIC_KEY_LEN], TaskError> {
    let v = signature[64];
    let rec_id = match v {
        0 | 1 => v as i32,
        27 | 28 => (v - 27) as i32,
        other => return Err(TaskError::Crypto(format!("invalid recovery id {}", other))),
    };
    let rec_id = RecoveryId::from_i32(rec_id).map_err(|err| TaskError::Crypto(err.to_string()))?;
    let sig = RecoverableSignature::from_compact(&signature[..64], rec_id)
        .map_err(|err| TaskError::Crypto(format!("invalid signature: {}", err)))?;

    let secp = Secp256k1::verification_only();
    let msg = Message::from_digest(*digest);
    let public_key = secp
        .recover_ecdsa(&msg, &sig)
        .map_err(|err| TaskError::Crypto(format!("recovery failed: {}", err)))?;
    Ok(strip_prefix(&public_key))
}

/// Signs `keccak256(message)`, returning `r ‖ s ‖ v` with `v` in {27, 28}.
pub fn sign_message(private_key: &[u8], message: &[u8]) -> Result<[u8; SIGNATURE_LEN], TaskError> {
    let secret = SecretKey::from_slice(private_key)
        .map_err(|_| TaskError::Crypto("invalid private key".to_string()))?;
    let secp = Secp256k1::signing_only();
    let msg = Message::from_digest(keccak256(message));
    let (rec_id, compact) = secp.sign_ecdsa_recoverable(&msg, &secret).serialize_compact();

    let mut out = [0u8; SIGNATURE_LEN];
    out[..64].copy_from_slice(&compact);
    out[64] = 27 + rec_id.to_i32() as u8;
    Ok(out)
}

pub fn derive_public_key(private_key: &[u8]) -> Result<[u8; PUBLIC_KEY_LEN], TaskError> {
    let secret = SecretKey::from_slice(private_key)
        .map_err(|_| TaskError::Crypto("invalid private key".to_string()))?;
    let secp = Secp256k1::signing_only();
    Ok(strip_prefix(&PublicKey::from_secret_key(&secp, &secret)))
}

fn strip_prefix(public_key: &PublicKey) -> [u8; PUBLIC_KEY_LEN] {
    let full = public_key.serialize_uncompressed();
    let mut out = [0u8; PUBLIC_KEY_LEN];
    out.copy_from_slice(&full[1..]);
    out
}

/// Symmetric key shared between the caller and the worker for one session.
#[derive(Clone)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(raw: &str) -> Result<Self, TaskError> {
        let bytes = hex::decode(raw.trim().trim_start_matches("0x"))
            .map_err(|err| TaskError::Configuration(format!("session key is not hex: {}", err)))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TaskError::Configuration("session key must be 32 bytes".to_string()))?;
        Ok(Self(bytes))
    }

    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Encrypts into `ciphertext ‖ tag ‖ iv`.
pub fn encrypt_output(key: &SessionKey, plaintext: &[u8]) -> Result<Vec<u8>, TaskError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|err| TaskError::Crypto(format!("key init failed: {}", err)))?;
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let mut out = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|err| TaskError::Crypto(format!("encrypt failed: {}", err)))?;
    out.extend_from_slice(&iv);
    Ok(out)
}

pub fn decrypt_output(key: &SessionKey, blob: &[u8]) -> Result<Vec<u8>, TaskError> {
    if blob.len() < IV_LEN + TAG_LEN {
        return Err(TaskError::Decryption(format!(
            "encrypted output too short: {} bytes",
            blob.len()
        )));
    }
    let (sealed, iv) = blob.split_at(blob.len() - IV_LEN);
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|err| TaskError::Decryption(format!("key init failed: {}", err)))?;
    cipher
        .decrypt(Nonce::from_slice(iv), sealed)
        .map_err(|_| TaskError::Decryption("authentication failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIVATE_KEY: &str = "4f3edf983ac636a65a842ce7c78d9aa706d3b113bce9c46f30d7d21715b23b1d";

    #[test]
    fn keccak_of_empty_input() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn recovers_signer_key() {
        let private_key = hex::decode(PRIVATE_KEY).unwrap();
        let expected = derive_public_key(&private_key).unwrap();
        let signature = sign_message(&private_key, b"Hello world!").unwrap();

        let recovered = recover_public_key(&signature, &keccak256(b"Hello world!")).unwrap();
        assert_eq!(recovered, expected);

        let other = derive_public_key(&[7u8; 32]).unwrap();
        assert_ne!(recovered, other);
    }

    fn address_of(public_key: &[u8; PUBLIC_KEY_LEN]) -> String {
        hex::encode(&keccak256(public_key)[12..])
    }

    #[test]
    fn recovers_personal_sign_vector() {
        // web3 accounts.recover example: "Some data" under the personal_sign prefix
        let digest = keccak256(b"\x19Ethereum Signed Message:\n9Some data");
        assert_eq!(
            hex::encode(digest),
            "1da44b586eb0729ff70a73c326926f6ed5a25f5b056e7f47fbc6e58d86871655"
        );
        let signature: [u8; SIGNATURE_LEN] = hex::decode(
            "b91467e570a6466aa9e9876cbcd013baba02900b8979d43fe208a4a4f339f5fd\
             6007e74cd82e037b800186422fc2da167c747ef045e5d18a5f5d4300f8e1a0291c",
        )
        .unwrap()
        .try_into()
        .unwrap();

        let recovered = recover_public_key(&signature, &digest).unwrap();
        assert_eq!(address_of(&recovered), "2c7536e3605d9c16a7a3d7b1898e529396a65c23");
        assert_eq!(
            hex::encode(recovered),
            "4e3b81af9c2234cad09d679ce6035ed1392347ce64ce405f5dcd36228a25de6e\
             47fd35c4215d1edf53e6f83de344615ce719bdb0fd878f6ed76f06dd277956de"
        );
    }

    #[test]
    fn scenario_key_has_known_public_key() {
        let public_key = derive_public_key(&hex::decode(PRIVATE_KEY).unwrap()).unwrap();
        assert_eq!(
            hex::encode(public_key),
            "e68acfc0253a10620dff706b0a1b1f1f5833ea3beb3bde2250d5f271f3563606\
             672ebc45e0b7ea2e816ecb70ca03137b1c9476eec63d4632e990020b7b6fba39"
        );
        assert_eq!(address_of(&public_key), "90f8bf6a479f320ead074411a4b0e7944ea8c9c1");
        assert_eq!(
            hex::encode(keccak256(b"Hello world!")),
            "ecd0e108a98e192af1d2c25055f4e3bed784b5c877204e73219a5203251feaab"
        );
    }

    #[test]
    fn accepts_raw_recovery_ids() {
        let private_key = hex::decode(PRIVATE_KEY).unwrap();
        let mut signature = sign_message(&private_key, b"msg").unwrap();
        signature[64] -= 27;
        let recovered = recover_public_key(&signature, &keccak256(b"msg")).unwrap();
        assert_eq!(recovered, derive_public_key(&private_key).unwrap());

        signature[64] = 9;
        assert!(matches!(
            recover_public_key(&signature, &keccak256(b"msg")),
            Err(TaskError::Crypto(_))
        ));
    }

    #[test]
    fn output_envelope_round_trip_and_tamper() {
        let key = SessionKey::generate();
        let blob = encrypt_output(&key, b"payload").unwrap();
        assert_eq!(blob.len(), 7 + TAG_LEN + IV_LEN);
        assert_eq!(decrypt_output(&key, &blob).unwrap(), b"payload");

        let mut tampered = blob.clone();
        tampered[0] ^= 0xff;
        assert!(matches!(decrypt_output(&key, &tampered), Err(TaskError::Decryption(_))));
        assert!(decrypt_output(&SessionKey::generate(), &blob).is_err());
        assert!(decrypt_output(&key, &blob[..10]).is_err());
    }

    #[test]
    fn session_key_from_hex() {
        assert!(SessionKey::from_hex(&format!("0x{}", PRIVATE_KEY)).is_ok());
        assert!(SessionKey::from_hex("abcd").is_err());
        assert!(SessionKey::from_hex("zz").is_err());
    }
}
