//! Arbitrary-precision helpers underneath the SRA cipher: modular
//! exponentiation, modular inverse and primality testing.

use num_bigint::{BigInt, BigUint, RandBigInt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

use crate::errors::CryptoError;

/// Primes used for trial division and as fixed Miller-Rabin witnesses.
const SMALL_PRIMES: [u32; 46] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89,
    97, 101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191,
    193, 197, 199,
];
const FIXED_WITNESSES: usize = 12;
const DERIVED_WITNESSES: usize = 20;
const MIN_PRIME_BITS: u64 = 16;

/// `base^exponent mod modulus` by square-and-multiply over exact bignums.
///
/// `modulus` must be non-zero.
pub fn mod_pow(base: &BigUint, exponent: &BigUint, modulus: &BigUint) -> BigUint {
    debug_assert!(*modulus != BigUint::ZERO, "modulus must be non-zero");
    base.modpow(exponent, modulus)
}

pub fn gcd(a: &BigUint, b: &BigUint) -> BigUint {
    let mut a = a.clone();
    let mut b = b.clone();
    while b != BigUint::ZERO {
        let r = &a % &b;
        a = std::mem::replace(&mut b, r);
    }
    a
}

/// Inverse of `a` modulo `modulus` via the extended Euclidean algorithm, or
/// `None` when `a` and `modulus` share a factor.
pub fn mod_inverse(a: &BigUint, modulus: &BigUint) -> Option<BigUint> {
    if *modulus == BigUint::ZERO {
        return None;
    }
    let zero = BigInt::from(0u8);
    let m = BigInt::from(modulus.clone());

    let mut old_r = BigInt::from(a % modulus);
    let mut r = m.clone();
    let mut old_s = BigInt::from(1u8);
    let mut s = BigInt::from(0u8);

    while r != zero {
        let q = &old_r / &r;
        let next_r = &old_r - &q * &r;
        old_r = std::mem::replace(&mut r, next_r);
        let next_s = &old_s - &q * &s;
        old_s = std::mem::replace(&mut s, next_s);
    }

    if old_r != BigInt::from(1u8) {
        return None;
    }
    let inverse = ((old_s % &m) + &m) % &m;
    inverse.to_biguint()
}

/// Miller-Rabin with fixed small-prime witnesses plus witnesses derived from a
/// hash of `n`.
///
/// The verdict depends only on `n`, so every peer validating a published
/// modulus reaches the same answer.
pub fn is_probable_prime(n: &BigUint) -> bool {
    let two = BigUint::from(2u8);
    if *n < two {
        return false;
    }
    for p in SMALL_PRIMES {
        let p = BigUint::from(p);
        if *n == p {
            return true;
        }
        if n % &p == BigUint::ZERO {
            return false;
        }
    }

    let one = BigUint::from(1u8);
    let n_minus_one = n - &one;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    let fixed = SMALL_PRIMES[..FIXED_WITNESSES]
        .iter()
        .map(|&p| BigUint::from(p));
    if fixed
        .into_iter()
        .any(|a| !passes_round(n, &n_minus_one, &d, s, &a))
    {
        return false;
    }

    let mut rng = StdRng::from_seed(Sha256::digest(n.to_bytes_be()).into());
    (0..DERIVED_WITNESSES).all(|_| {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        passes_round(n, &n_minus_one, &d, s, &a)
    })
}

fn passes_round(n: &BigUint, n_minus_one: &BigUint, d: &BigUint, s: u64, a: &BigUint) -> bool {
    let one = BigUint::from(1u8);
    let mut x = mod_pow(a, d, n);
    if x == one || x == *n_minus_one {
        return true;
    }
    for _ in 1..s {
        x = (&x * &x) % n;
        if x == *n_minus_one {
            return true;
        }
        if x == one {
            return false;
        }
    }
    false
}

/// Sample a probable prime of exactly `bits` bits.
pub fn random_prime<R: Rng + ?Sized>(bits: u64, rng: &mut R) -> Result<BigUint, CryptoError> {
    if bits < MIN_PRIME_BITS {
        return Err(CryptoError::KeyGeneration(format!(
            "prime size {bits} is below the {MIN_PRIME_BITS}-bit minimum"
        )));
    }
    let top = BigUint::from(1u8) << (bits - 1);
    let one = BigUint::from(1u8);
    // Prime density is ~1/ln(2^bits); this bound is never reached in practice.
    let max_attempts = bits.saturating_mul(bits).max(10_000);
    for _ in 0..max_attempts {
        let mut candidate = rng.gen_biguint(bits);
        candidate |= &top;
        candidate |= &one;
        if is_probable_prime(&candidate) {
            return Ok(candidate);
        }
    }
    Err(CryptoError::KeyGeneration(format!(
        "no {bits}-bit prime found after {max_attempts} candidates"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big(v: u64) -> BigUint {
        BigUint::from(v)
    }

    #[test]
    fn small_primes_and_composites() {
        for p in [2u64, 3, 5, 197, 199, 211, 7919, 104_729, 2_147_483_647] {
            assert!(is_probable_prime(&big(p)), "{p} is prime");
        }
        for c in [0u64, 1, 4, 9, 221, 7917, 1_000_000, 2_147_483_649] {
            assert!(!is_probable_prime(&big(c)), "{c} is composite");
        }
    }

    #[test]
    fn carmichael_numbers_are_rejected() {
        // 561 and 41041 fool the Fermat test for every coprime base.
        for c in [561u64, 41_041, 825_265, 321_197_185] {
            assert!(!is_probable_prime(&big(c)), "{c} is a Carmichael number");
        }
    }

    #[test]
    fn mersenne_prime_127_is_detected() {
        let m127 = (BigUint::from(1u8) << 127u32) - BigUint::from(1u8);
        assert!(is_probable_prime(&m127));
        let m128 = (BigUint::from(1u8) << 128u32) - BigUint::from(1u8);
        assert!(!is_probable_prime(&m128));
    }

    #[test]
    fn mod_pow_matches_repeated_multiplication() {
        let modulus = big(1_000_003);
        let base = big(12_345);
        let mut expected = big(1);
        for e in 0u64..40 {
            assert_eq!(mod_pow(&base, &big(e), &modulus), expected);
            expected = (expected * &base) % &modulus;
        }
    }

    #[test]
    fn mod_inverse_round_trips() {
        let m = big(1_000_002);
        for a in [1u64, 5, 7, 11, 999_999] {
            let inv = mod_inverse(&big(a), &m).unwrap();
            assert_eq!((big(a) * inv) % &m, big(1));
        }
        assert_eq!(mod_inverse(&big(4), &m), None);
        assert_eq!(mod_inverse(&big(3), &BigUint::ZERO), None);
    }

    #[test]
    fn gcd_of_known_pairs() {
        assert_eq!(gcd(&big(48), &big(18)), big(6));
        assert_eq!(gcd(&big(17), &big(5)), big(1));
        assert_eq!(gcd(&big(0), &big(9)), big(9));
    }

    #[test]
    fn random_prime_has_requested_size() {
        let mut rng = StdRng::seed_from_u64(7);
        for bits in [16u64, 64, 128] {
            let p = random_prime(bits, &mut rng).unwrap();
            assert_eq!(p.bits(), bits);
            assert!(is_probable_prime(&p));
        }
    }

    #[test]
    fn tiny_prime_request_fails() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(matches!(
            random_prime(8, &mut rng),
            Err(CryptoError::KeyGeneration(_))
        ));
    }
}
