//! Argon2id password hashing.
//!
//! The configured cost is the Argon2 iteration count (`t_cost`).

use anyhow::{Result, anyhow};
use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher as _, PasswordVerifier,
    Version, password_hash::SaltString,
};
use rand::rngs::OsRng;

/// Salt and all-zero output of the decoy hash, B64 without padding.
const DECOY_SALT: &str = "dGVzc2VyYWRlY295c2FsdA";
const DECOY_OUTPUT: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

#[derive(Clone, Debug)]
pub struct PasswordHasher {
    params: Params,
}

impl PasswordHasher {
    /// # Errors
    /// Returns an error if `cost` is outside the range Argon2 accepts.
    pub fn new(cost: u32) -> Result<Self> {
        Self::with_memory_kib(Params::DEFAULT_M_COST, cost)
    }

    /// # Errors
    /// Returns an error if the parameters are rejected by Argon2.
    pub fn with_memory_kib(memory_kib: u32, cost: u32) -> Result<Self> {
        let params = Params::new(memory_kib, cost, Params::DEFAULT_P_COST, None)
            .map_err(|err| anyhow!("invalid Argon2 parameters: {err}"))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'_> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a password into a PHC string.
    ///
    /// # Errors
    /// Returns an error if hashing fails.
    pub fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|_| anyhow!("failed to hash password"))?
            .to_string();
        Ok(hash)
    }

    /// A PHC string with this hasher's parameters that no password matches.
    /// Verifying against it costs the same as verifying a real hash.
    #[must_use]
    pub fn decoy_hash(&self) -> String {
        format!(
            "$argon2id$v=19$m={},t={},p={}${DECOY_SALT}${DECOY_OUTPUT}",
            self.params.m_cost(),
            self.params.t_cost(),
            self.params.p_cost()
        )
    }

    /// Check `password` against a stored PHC string. Malformed hashes never match.
    #[must_use]
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        self.argon2()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }
}

#[cfg(test)]
pub(crate) fn fast_hasher() -> PasswordHasher {
    match PasswordHasher::with_memory_kib(Params::MIN_M_COST, 1) {
        Ok(hasher) => hasher,
        Err(err) => panic!("test hasher params rejected: {err}"),
    }
}
