/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Defines common data structures to be used inside this library, or from outside application.
//!
//! Fixed-width identifiers ([Address], [Hash], [Signature], [PublicKey]) are thin wrappers over byte arrays.
//! [Amount] is an arbitrary-precision non-negative integer interpreted with 18 decimals.

use std::fmt;
use std::ops::{Add, AddAssign};

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use tiny_keccak::{Hasher, Keccak};

pub const ADDRESS_LENGTH: usize = 20;
pub const HASH_LENGTH: usize = 32;
pub const SIGNATURE_LENGTH: usize = 65;
pub const PUBLIC_KEY_LENGTH: usize = 33;

/// Number of decimals of an [Amount].
pub const AMOUNT_DECIMALS: u32 = 18;

macro_rules! fixed_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LENGTH: usize = $len;

            /// Builds the value from a slice of exactly the right length.
            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                let arr: [u8; $len] = bytes.try_into().ok()?;
                Some(Self(arr))
            }

            /// Parses a hex string, with or without the `0x` prefix.
            pub fn from_hex(s: &str) -> Option<Self> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(s).ok()?;
                Self::from_slice(&bytes)
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self([0u8; $len])
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(self, f)
            }
        }
    };
}

fixed_bytes!(
    /// 20-byte account or contract identifier.
    Address,
    ADDRESS_LENGTH
);

fixed_bytes!(
    /// 32-byte Keccak-256 digest.
    Hash,
    HASH_LENGTH
);

fixed_bytes!(
    /// Recoverable signature, 65 bytes.
    Signature,
    SIGNATURE_LENGTH
);

fixed_bytes!(
    /// Compressed public key, 33 bytes.
    PublicKey,
    PUBLIC_KEY_LENGTH
);

/// Hash of a generator's public key. Verification of the key itself happens outside this crate.
pub type PublicHash = Hash;

impl Address {
    pub const ZERO: Address = Address([0u8; ADDRESS_LENGTH]);
}

impl Hash {
    pub const ZERO: Hash = Hash([0u8; HASH_LENGTH]);
}

/// Keccak-256 of the input bytes.
pub fn keccak256(data: &[u8]) -> Hash {
    keccak256_concat(&[data])
}

/// Keccak-256 over the concatenation of `parts`, without allocating the concatenation.
pub fn keccak256_concat(parts: &[&[u8]]) -> Hash {
    let mut hasher = Keccak::v256();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; HASH_LENGTH];
    hasher.finalize(&mut out);
    Hash(out)
}

/// Address of a deployed contract: the first 20 bytes of
/// `Keccak(deployer || class_id || seq || height)`, integers little-endian.
pub fn contract_address(deployer: &Address, class_id: u64, seq: u64, height: u32) -> Address {
    let h = keccak256_concat(&[
        deployer.as_bytes(),
        &class_id.to_le_bytes(),
        &seq.to_le_bytes(),
        &height.to_le_bytes(),
    ]);
    let mut addr = [0u8; ADDRESS_LENGTH];
    addr.copy_from_slice(&h.0[..ADDRESS_LENGTH]);
    Address(addr)
}

/// Token id of a formulator: the last 20 bytes of `Keccak(0xff || height || owner || seq)`.
pub fn formulator_token_id(height: u32, owner: &Address, seq: u64) -> Address {
    let h = keccak256_concat(&[
        &[0xff],
        &height.to_le_bytes(),
        owner.as_bytes(),
        &seq.to_le_bytes(),
    ]);
    let mut addr = [0u8; ADDRESS_LENGTH];
    addr.copy_from_slice(&h.0[HASH_LENGTH - ADDRESS_LENGTH..]);
    Address(addr)
}

/// Arbitrary-precision non-negative integer with a fixed 18-decimal interpretation.
///
/// `mul_c`/`div_c` scale by a plain integer. `mul`/`div` treat the operand as 18-decimal
/// fixed point, i.e. `a.mul(b) = a * b / 10^18` and `a.div(b) = a * 10^18 / b`.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(BigUint);

impl Amount {
    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    /// `whole` units, i.e. `whole * 10^18` base units.
    pub fn coin(whole: u64) -> Self {
        Self(BigUint::from(whole) * unit())
    }

    /// Raw base units.
    pub fn from_raw(raw: u64) -> Self {
        Self(BigUint::from(raw))
    }

    pub fn from_big(value: BigUint) -> Self {
        Self(value)
    }

    pub fn as_big(&self) -> &BigUint {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Big-endian magnitude bytes. Zero is the empty byte string.
    pub fn to_bytes(&self) -> Vec<u8> {
        if self.0.is_zero() {
            Vec::new()
        } else {
            self.0.to_bytes_be()
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(BigUint::from_bytes_be(bytes))
    }

    pub fn mul_c(&self, k: u64) -> Self {
        Self(&self.0 * BigUint::from(k))
    }

    /// Integer division by `k`. Division by zero yields zero.
    pub fn div_c(&self, k: u64) -> Self {
        if k == 0 {
            return Self::zero();
        }
        Self(&self.0 / BigUint::from(k))
    }

    pub fn mul(&self, other: &Amount) -> Self {
        Self(&self.0 * &other.0 / unit())
    }

    /// Fixed-point division. Division by zero yields zero.
    pub fn div(&self, other: &Amount) -> Self {
        if other.0.is_zero() {
            return Self::zero();
        }
        Self(&self.0 * unit() / &other.0)
    }

    pub fn checked_sub(&self, other: &Amount) -> Option<Self> {
        if self.0 < other.0 {
            None
        } else {
            Some(Self(&self.0 - &other.0))
        }
    }

    /// `self - other`, clamped at zero.
    pub fn saturating_sub(&self, other: &Amount) -> Self {
        self.checked_sub(other).unwrap_or_default()
    }

    pub fn to_u64(&self) -> Option<u64> {
        self.0.to_u64()
    }
}

fn unit() -> BigUint {
    BigUint::from(10u64).pow(AMOUNT_DECIMALS)
}

impl Add for Amount {
    type Output = Amount;
    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

impl<'a> Add<&'a Amount> for &'a Amount {
    type Output = Amount;
    fn add(self, rhs: &'a Amount) -> Amount {
        Amount(&self.0 + &rhs.0)
    }
}

impl AddAssign<&Amount> for Amount {
    fn add_assign(&mut self, rhs: &Amount) {
        self.0 += &rhs.0;
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        iter.fold(Amount::zero(), |acc, a| acc + a)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let u = unit();
        let whole = &self.0 / &u;
        let frac = &self.0 % &u;
        if frac.is_zero() {
            write!(f, "{}", whole)
        } else {
            let frac = format!("{:0>18}", frac.to_string());
            write!(f, "{}.{}", whole, frac.trim_end_matches('0'))
        }
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({})", self)
    }
}

impl From<BigUint> for Amount {
    fn from(value: BigUint) -> Self {
        Self(value)
    }
}

/// One whole unit, `10^18` base units.
pub fn one_coin() -> Amount {
    Amount(unit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_point_mul_div() {
        let a = Amount::coin(300);
        let b = Amount::coin(3);
        assert_eq!(a.div(&b), Amount::coin(100));
        assert_eq!(Amount::coin(2).mul(&Amount::coin(5)), Amount::coin(10));
        assert_eq!(Amount::coin(7).mul_c(3).div_c(1000), Amount::from_raw(21_000_000_000_000_000));
        assert_eq!(a.div(&Amount::zero()), Amount::zero());
        assert_eq!(a.div_c(0), Amount::zero());
    }

    #[test]
    fn amount_zero_bytes_are_empty() {
        assert!(Amount::zero().to_bytes().is_empty());
        assert_eq!(Amount::from_bytes(&Amount::coin(5).to_bytes()), Amount::coin(5));
        assert_eq!(Amount::from_bytes(&[]), Amount::zero());
    }

    #[test]
    fn amount_display() {
        assert_eq!(Amount::coin(12).to_string(), "12");
        assert_eq!(Amount::from_raw(1_500_000_000_000_000_000).to_string(), "1.5");
    }

    #[test]
    fn address_hex() {
        let a = Address::from_hex("0x477C578843cBe53C3568736347f640c2cdA4616F").unwrap();
        assert_eq!(a.to_string(), "0x477c578843cbe53c3568736347f640c2cda4616f");
        assert!(Address::from_hex("0x1234").is_none());
    }

    #[test]
    fn derived_addresses_are_deterministic() {
        let deployer = Address([7u8; 20]);
        assert_eq!(contract_address(&deployer, 1, 2, 3), contract_address(&deployer, 1, 2, 3));
        assert_ne!(contract_address(&deployer, 1, 2, 3), contract_address(&deployer, 1, 3, 3));
        let h = keccak256_concat(&[&[0xff], &5u32.to_le_bytes(), deployer.as_bytes(), &9u64.to_le_bytes()]);
        assert_eq!(formulator_token_id(5, &deployer, 9).0, h.0[12..]);
    }

    #[test]
    fn keccak_of_empty() {
        assert_eq!(
            keccak256(&[]).to_string(),
            "0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }
}
