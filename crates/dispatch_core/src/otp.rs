//! Pickup codes: issued once per ride, verified once at pickup.
//!
//! Only a salted SHA-256 digest of a code is kept, with a fresh random salt
//! per ride. The plaintext leaves the engine exactly once, as a
//! [`PickupCode`], for delivery to the rider.

use std::fmt;

use rand::rngs::OsRng;
use rand::{CryptoRng, Rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::DispatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtpConfig {
    /// Number of decimal digits in a code.
    pub length: usize,
    /// Wrong submissions tolerated before verification locks.
    pub max_attempts: u32,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            length: 6,
            max_attempts: 5,
        }
    }
}

impl OtpConfig {
    pub fn validate(&self) -> Result<(), DispatchError> {
        if !(4..=12).contains(&self.length) {
            return Err(DispatchError::Config(format!(
                "otp length must be between 4 and 12 digits, got {}",
                self.length
            )));
        }
        if self.max_attempts == 0 {
            return Err(DispatchError::Config("otp max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// Plaintext code handed to the delivery channel. `Debug` is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct PickupCode(String);

impl PickupCode {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PickupCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PickupCode(<redacted>)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpVerdict {
    Accepted,
    Rejected { remaining: u32 },
    /// The code was consumed or invalidated earlier.
    Spent,
    /// Too many wrong submissions.
    Locked,
}

/// Server-side half of a pickup code.
pub struct OtpSecret {
    salt: [u8; SALT_LEN],
    digest: Option<[u8; 32]>,
    failed_attempts: u32,
}

impl fmt::Debug for OtpSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtpSecret")
            .field("active", &self.is_active())
            .field("failed_attempts", &self.failed_attempts)
            .finish()
    }
}

impl OtpSecret {
    pub fn is_active(&self) -> bool {
        self.digest.is_some()
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// Check a submitted code. Success clears the stored digest so the same
    /// code can never verify again. A wrong code only bumps the counter.
    pub fn verify(&mut self, submitted: &str, max_attempts: u32) -> OtpVerdict {
        let Some(stored) = self.digest else {
            return OtpVerdict::Spent;
        };
        if self.failed_attempts >= max_attempts {
            return OtpVerdict::Locked;
        }
        if constant_time_eq(&stored, &digest(&self.salt, submitted.trim())) {
            self.digest = None;
            return OtpVerdict::Accepted;
        }
        self.failed_attempts += 1;
        if self.failed_attempts >= max_attempts {
            OtpVerdict::Locked
        } else {
            OtpVerdict::Rejected {
                remaining: max_attempts - self.failed_attempts,
            }
        }
    }

    pub fn invalidate(&mut self) {
        self.digest = None;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OtpIssuer {
    length: usize,
}

impl OtpIssuer {
    pub fn new(config: &OtpConfig) -> Self {
        Self {
            length: config.length,
        }
    }

    /// Issue a code from the operating system's CSPRNG.
    pub fn issue(&self) -> (OtpSecret, PickupCode) {
        self.issue_with(&mut OsRng)
    }

    pub fn issue_with<R: RngCore + CryptoRng>(&self, rng: &mut R) -> (OtpSecret, PickupCode) {
        let code: String = (0..self.length)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect();
        let mut salt = [0u8; SALT_LEN];
        rng.fill_bytes(&mut salt);
        let secret = OtpSecret {
            digest: Some(digest(&salt, &code)),
            salt,
            failed_attempts: 0,
        };
        (secret, PickupCode(code))
    }
}

const SALT_LEN: usize = 16;

fn digest(salt: &[u8; SALT_LEN], code: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(code.as_bytes());
    let hashed = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hashed);
    bytes
}

fn constant_time_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
