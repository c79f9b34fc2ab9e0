//! SRA commutative cipher over a shared prime modulus.
//!
//! Every participant works modulo the same prime `p`. A key pair is an
//! exponent `e` with `gcd(e, p - 1) = 1` and its inverse `d = e^-1 mod (p - 1)`.
//! Encryption is `m^e mod p`, decryption `c^d mod p`. Because exponentiation
//! under one modulus commutes, layers added by different players can be
//! removed in any order.

use std::fmt;

use num_bigint::{BigUint, RandBigInt};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::bignum::{gcd, is_probable_prime, mod_inverse, mod_pow, random_prime};
use crate::errors::CryptoError;

/// Default retry budget when searching for an exponent coprime to `p - 1`.
pub const DEFAULT_KEYGEN_ATTEMPTS: usize = 1_000;

/// Prime modulus agreed by all players before any card is encrypted.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SharedModulus(#[serde(with = "crate::crypto_serde::biguint")] BigUint);

impl SharedModulus {
    pub fn generate<R: Rng + ?Sized>(bits: u64, rng: &mut R) -> Result<Self, CryptoError> {
        random_prime(bits, rng).map(Self)
    }

    /// Accept an externally supplied modulus after checking it is a probable prime.
    pub fn from_prime(prime: BigUint) -> Result<Self, CryptoError> {
        if prime <= BigUint::from(3u8) || !is_probable_prime(&prime) {
            return Err(CryptoError::InvalidKey(
                "shared modulus must be a prime larger than 3".into(),
            ));
        }
        Ok(Self(prime))
    }

    pub fn value(&self) -> &BigUint {
        &self.0
    }

    /// Order of the multiplicative group, `p - 1`.
    pub fn group_order(&self) -> BigUint {
        &self.0 - BigUint::from(1u8)
    }

    pub fn bits(&self) -> u64 {
        self.0.bits()
    }
}

impl fmt::Debug for SharedModulus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedModulus({} bits)", self.0.bits())
    }
}

/// One player's exponent pair over the shared modulus.
#[derive(Clone, PartialEq, Eq)]
pub struct SraKeyPair {
    encryption: BigUint,
    decryption: BigUint,
    modulus: BigUint,
}

impl SraKeyPair {
    /// Pick a random `e` coprime to `p - 1` and derive `d`.
    pub fn generate<R: Rng + ?Sized>(
        modulus: &SharedModulus,
        rng: &mut R,
        max_attempts: usize,
    ) -> Result<Self, CryptoError> {
        let order = modulus.group_order();
        let low = BigUint::from(3u8);
        if order <= low {
            return Err(CryptoError::KeyGeneration(
                "modulus too small to pick an exponent".into(),
            ));
        }
        let one = BigUint::from(1u8);
        for _ in 0..max_attempts {
            let e = rng.gen_biguint_range(&low, &order);
            if gcd(&e, &order) != one {
                continue;
            }
            if let Some(d) = mod_inverse(&e, &order) {
                return Ok(Self {
                    encryption: e,
                    decryption: d,
                    modulus: modulus.value().clone(),
                });
            }
        }
        Err(CryptoError::KeyGeneration(format!(
            "no exponent coprime to p - 1 after {max_attempts} attempts"
        )))
    }

    pub fn encryption_exponent(&self) -> &BigUint {
        &self.encryption
    }

    pub fn decryption_exponent(&self) -> &BigUint {
        &self.decryption
    }

    pub fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    pub fn encrypt(&self, plaintext: &BigUint) -> Result<BigUint, CryptoError> {
        encrypt(plaintext, &self.encryption, &self.modulus)
    }

    pub fn decrypt(&self, ciphertext: &BigUint) -> Result<BigUint, CryptoError> {
        decrypt(ciphertext, &self.decryption, &self.modulus)
    }
}

impl fmt::Debug for SraKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SraKeyPair")
            .field("modulus_bits", &self.modulus.bits())
            .finish_non_exhaustive()
    }
}

/// Generate a fresh prime of `prime_bits` bits and a key pair over it.
pub fn generate_key_pair<R: Rng + ?Sized>(
    prime_bits: u64,
    rng: &mut R,
) -> Result<SraKeyPair, CryptoError> {
    let modulus = SharedModulus::generate(prime_bits, rng)?;
    SraKeyPair::generate(&modulus, rng, DEFAULT_KEYGEN_ATTEMPTS)
}

/// `m^e mod n`, rejecting plaintexts outside `[0, n)`.
pub fn encrypt(m: &BigUint, e: &BigUint, n: &BigUint) -> Result<BigUint, CryptoError> {
    if *n == BigUint::ZERO || m >= n {
        return Err(CryptoError::InvalidPlaintext);
    }
    Ok(mod_pow(m, e, n))
}

/// `c^d mod n`, rejecting ciphertexts outside `[0, n)`.
pub fn decrypt(c: &BigUint, d: &BigUint, n: &BigUint) -> Result<BigUint, CryptoError> {
    if *n == BigUint::ZERO || c >= n {
        return Err(CryptoError::InvalidPlaintext);
    }
    Ok(mod_pow(c, d, n))
}
