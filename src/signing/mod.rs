use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::errors::CryptoError;

const DOMAIN_TAG: &[u8] = b"mental-poker/action/v1";

/// Builder for canonical action transcripts.
pub struct TranscriptBuilder {
    buffer: Vec<u8>,
}

impl TranscriptBuilder {
    pub fn new(kind: &'static str) -> Self {
        let mut buffer = Vec::with_capacity(128);
        buffer.extend_from_slice(DOMAIN_TAG);
        buffer.extend_from_slice(&(kind.len() as u16).to_be_bytes());
        buffer.extend_from_slice(kind.as_bytes());
        Self { buffer }
    }

    pub fn append_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn append_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) {
        self.buffer
            .extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        self.buffer.extend_from_slice(bytes);
    }

    pub fn append_str(&mut self, value: &str) {
        self.append_bytes(value.as_bytes());
    }

    pub fn append_biguint(&mut self, value: &BigUint) {
        self.append_bytes(&value.to_bytes_be());
    }

    pub fn append_biguints(&mut self, values: &[BigUint]) {
        self.append_u64(values.len() as u64);
        for value in values {
            self.append_biguint(value);
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.buffer
    }
}

/// Values that can be signed into a canonical transcript.
pub trait Signable {
    /// Logical kind string used for domain separation.
    fn domain_kind(&self) -> &'static str;

    /// Append this value's canonical representation into the transcript builder.
    fn write_transcript(&self, builder: &mut TranscriptBuilder);

    /// Obtain canonical signing bytes.
    fn to_signing_bytes(&self) -> Vec<u8> {
        let mut builder = TranscriptBuilder::new(self.domain_kind());
        self.write_transcript(&mut builder);
        builder.finish()
    }
}

/// Base64 encoding of a 32-byte ed25519 verifying key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicKey(String);

impl PublicKey {
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn to_verifying_key(&self) -> Result<VerifyingKey, CryptoError> {
        let bytes = decode_fixed::<32>(&self.0)
            .map_err(|err| CryptoError::InvalidKey(format!("public key: {err}")))?;
        VerifyingKey::from_bytes(&bytes)
            .map_err(|err| CryptoError::InvalidKey(format!("public key: {err}")))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Base64 encoding of a 32-byte ed25519 secret seed. Never leaves the owning process.
#[derive(Clone)]
pub struct PrivateKey(Zeroizing<String>);

impl PrivateKey {
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(Zeroizing::new(encoded.into()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    fn to_signing_key(&self) -> Result<SigningKey, CryptoError> {
        let seed = Zeroizing::new(
            decode_fixed::<32>(&self.0)
                .map_err(|err| CryptoError::Signing(format!("private key: {err}")))?,
        );
        Ok(SigningKey::from_bytes(&seed))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

#[derive(Debug, Clone)]
pub struct SigningKeyPair {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

impl SigningKeyPair {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let signing_key = SigningKey::generate(rng);
        Self {
            public_key: PublicKey(STANDARD.encode(signing_key.verifying_key().to_bytes())),
            private_key: PrivateKey(Zeroizing::new(STANDARD.encode(signing_key.to_bytes()))),
        }
    }
}

/// Generate a signing key pair from the operating system's entropy source.
pub fn generate_signing_key_pair() -> SigningKeyPair {
    SigningKeyPair::generate(&mut rand::rngs::OsRng)
}

/// Sign `payload` with an encoded private key.
pub fn sign(payload: &[u8], private_key: &PrivateKey) -> Result<Vec<u8>, CryptoError> {
    let signing_key = private_key.to_signing_key()?;
    Ok(signing_key.sign(payload).to_bytes().to_vec())
}

/// Check `signature` over exactly `payload`.
///
/// A well-formed signature that does not match is `Ok(false)`; malformed keys
/// or signatures are errors.
pub fn verify(payload: &[u8], signature: &[u8], public_key: &PublicKey) -> Result<bool, CryptoError> {
    let verifying_key = public_key.to_verifying_key()?;
    let signature = Signature::from_slice(signature)
        .map_err(|err| CryptoError::InvalidSignatureFormat(err.to_string()))?;
    Ok(verifying_key.verify(payload, &signature).is_ok())
}

fn decode_fixed<const N: usize>(encoded: &str) -> Result<[u8; N], String> {
    let bytes = STANDARD.decode(encoded).map_err(|err| err.to_string())?;
    <[u8; N]>::try_from(bytes.as_slice())
        .map_err(|_| format!("expected {N} bytes, got {}", bytes.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn keypair(seed: u64) -> SigningKeyPair {
        SigningKeyPair::generate(&mut StdRng::seed_from_u64(seed))
    }

    #[test]
    fn signature_verifies_for_matching_payload_and_key() {
        let keys = keypair(1);
        let signature = sign(b"hello", &keys.private_key).unwrap();
        assert!(verify(b"hello", &signature, &keys.public_key).unwrap());
    }

    #[test]
    fn other_payload_or_key_is_a_plain_mismatch() {
        let alice = keypair(1);
        let bob = keypair(2);
        let signature = sign(b"hello", &alice.private_key).unwrap();
        assert!(!verify(b"hellp", &signature, &alice.public_key).unwrap());
        assert!(!verify(b"hello", &signature, &bob.public_key).unwrap());
    }

    #[test]
    fn malformed_inputs_are_errors() {
        let keys = keypair(3);
        let signature = sign(b"x", &keys.private_key).unwrap();
        assert!(matches!(
            verify(b"x", &signature[..10], &keys.public_key),
            Err(CryptoError::InvalidSignatureFormat(_))
        ));
        assert!(matches!(
            verify(b"x", &signature, &PublicKey::from_encoded("not base64!")),
            Err(CryptoError::InvalidKey(_))
        ));
        assert!(matches!(
            sign(b"x", &PrivateKey::from_encoded("AAAA")),
            Err(CryptoError::Signing(_))
        ));
    }

    #[test]
    fn generated_keys_are_base64_strings() {
        let keys = generate_signing_key_pair();
        assert_eq!(STANDARD.decode(keys.public_key.as_str()).unwrap().len(), 32);
        assert_eq!(STANDARD.decode(keys.private_key.expose()).unwrap().len(), 32);
        assert_eq!(format!("{:?}", keys.private_key), "PrivateKey(<redacted>)");
    }

    #[test]
    fn transcripts_are_domain_separated() {
        use crate::protocol::PokerAction;

        let pass = PokerAction::Pass.to_signing_bytes();
        let discard = PokerAction::Discard { position: 0 }.to_signing_bytes();
        assert_ne!(pass, discard);
        assert!(pass.starts_with(DOMAIN_TAG));
        assert!(discard.starts_with(DOMAIN_TAG));
    }
}
