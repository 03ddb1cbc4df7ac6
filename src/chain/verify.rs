/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Signer verification at transaction admission.
//!
//! The runtime does not recover signers itself. Whoever builds the chain plugs in a [SignerVerifier]
//! that checks `signature` against `signer`; the runtime only guarantees that the zero address, which
//! stands for the chain itself, can never sign.

use crate::error::TransitionError;
use crate::types::{Address, Hash};

use super::block::SignedTx;

pub trait SignerVerifier: Send + Sync {
    /// Accepts or rejects the signer of `stx`. `tx_hash` is [SignedTx::hash].
    fn verify(&self, stx: &SignedTx, tx_hash: &Hash) -> Result<(), TransitionError>;
}

/// Trusts the signer carried by the transaction. For chains whose transactions are verified before
/// they reach the runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustedSigner;

impl SignerVerifier for TrustedSigner {
    fn verify(&self, _stx: &SignedTx, _tx_hash: &Hash) -> Result<(), TransitionError> {
        Ok(())
    }
}

/// Rejects the zero signer, then defers to `verifier`.
pub(crate) fn check_signer(
    verifier: &dyn SignerVerifier,
    stx: &SignedTx,
    tx_hash: &Hash,
) -> Result<(), TransitionError> {
    if stx.signer == Address::ZERO {
        return Err(TransitionError::InvalidSigner(stx.signer));
    }
    verifier.verify(stx, tx_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Transaction;

    struct OnlyFrom(Address);

    impl SignerVerifier for OnlyFrom {
        fn verify(&self, stx: &SignedTx, _tx_hash: &Hash) -> Result<(), TransitionError> {
            if stx.signer == self.0 {
                Ok(())
            } else {
                Err(TransitionError::InvalidSigner(stx.signer))
            }
        }
    }

    #[test]
    fn zero_signer_is_rejected_by_any_verifier() {
        let stx = SignedTx::new(Transaction::default(), Address::ZERO);
        let hash = stx.hash().unwrap();
        assert!(matches!(
            check_signer(&TrustedSigner, &stx, &hash),
            Err(TransitionError::InvalidSigner(signer)) if signer == Address::ZERO
        ));
        assert!(check_signer(&OnlyFrom(Address::ZERO), &stx, &hash).is_err());
    }

    #[test]
    fn verifier_decides_other_signers() {
        let alice = Address([1; 20]);
        let stx = SignedTx::new(Transaction::default(), alice);
        let hash = stx.hash().unwrap();
        assert!(check_signer(&TrustedSigner, &stx, &hash).is_ok());
        assert!(check_signer(&OnlyFrom(alice), &stx, &hash).is_ok());
        assert!(check_signer(&OnlyFrom(Address([2; 20])), &stx, &hash).is_err());
    }
}
