//! Key-derivation parameters.

use crate::error::{CryptoError, CryptoResult};
use crate::primitives::random_hex;
use crate::version::ProtocolVersion;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

/// Public parameters needed to re-derive a root key from a password.
///
/// Which fields are present depends on the version: 001 and 002 use
/// `pw_salt`, 003 uses `pw_nonce`, 004 uses `seed` and `kdfIterations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyParams {
    /// Nonce mixed into the 003 salt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pw_nonce: Option<String>,
    /// PBKDF2 rounds for 001 through 003.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pw_cost: Option<u32>,
    /// Explicit salt for 001 and 002.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pw_salt: Option<String>,
    /// Seed mixed into the 004 salt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    /// PBKDF2 rounds for 004.
    #[serde(rename = "kdfIterations", default, skip_serializing_if = "Option::is_none")]
    pub kdf_iterations: Option<u32>,
    /// Account identifier, usually an email address.
    #[serde(alias = "email")]
    pub identifier: String,
    /// Protocol version these parameters belong to.
    pub version: ProtocolVersion,
}

impl KeyParams {
    /// Generates fresh parameters for `identifier` at the version's minimum cost.
    pub fn generate(identifier: impl Into<String>, version: ProtocolVersion) -> Self {
        let cost = version.cost_minimum();
        let mut params = Self {
            pw_nonce: None,
            pw_cost: None,
            pw_salt: None,
            seed: None,
            kdf_iterations: None,
            identifier: identifier.into(),
            version,
        };
        match version {
            ProtocolVersion::V001 | ProtocolVersion::V002 => {
                params.pw_salt = Some(random_hex(16));
                params.pw_nonce = Some(random_hex(32));
                params.pw_cost = Some(cost);
            }
            ProtocolVersion::V003 => {
                params.pw_nonce = Some(random_hex(32));
                params.pw_cost = Some(cost);
            }
            ProtocolVersion::V004 => {
                params.seed = Some(random_hex(32));
                params.kdf_iterations = Some(cost);
            }
        }
        params
    }

    /// Returns a copy with a different derivation cost.
    #[must_use]
    pub fn with_cost(mut self, cost: u32) -> Self {
        if self.version.is_legacy() {
            self.pw_cost = Some(cost);
        } else {
            self.kdf_iterations = Some(cost);
        }
        self
    }

    /// The derivation cost for this version.
    pub fn cost(&self) -> Option<u32> {
        if self.version.is_legacy() {
            self.pw_cost
        } else {
            self.kdf_iterations
        }
    }

    /// Checks that the fields required by the version are present and the
    /// cost is at least the version's minimum.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyParams`] for missing fields and
    /// [`CryptoError::CostTooLow`] for a cost below the minimum.
    pub fn validate(&self) -> CryptoResult<()> {
        let cost = self.derivation_cost()?;
        let minimum = self.version.cost_minimum();
        if cost < minimum {
            return Err(CryptoError::CostTooLow {
                version: self.version.to_string(),
                cost,
                minimum,
            });
        }
        Ok(())
    }

    /// Checks only that the fields needed for derivation are present and
    /// returns the cost. Legacy accounts below today's minimum still pass.
    pub(crate) fn derivation_cost(&self) -> CryptoResult<u32> {
        if self.identifier.is_empty() {
            return Err(CryptoError::InvalidKeyParams("identifier is empty".into()));
        }

        let missing = match self.version {
            ProtocolVersion::V001 | ProtocolVersion::V002 => {
                self.pw_salt.is_none().then_some("pw_salt")
            }
            ProtocolVersion::V003 => self.pw_nonce.is_none().then_some("pw_nonce"),
            ProtocolVersion::V004 => self.seed.is_none().then_some("seed"),
        };
        if let Some(field) = missing {
            return Err(CryptoError::InvalidKeyParams(format!(
                "{field} is required for version {}",
                self.version
            )));
        }

        match self.cost() {
            Some(0) | None => Err(CryptoError::InvalidKeyParams(format!(
                "cost is required for version {}",
                self.version
            ))),
            Some(cost) => Ok(cost),
        }
    }

    /// Base64 of the JSON encoding, as appended to 003 ciphertexts.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_base64_json(&self) -> CryptoResult<String> {
        let json = serde_json::to_string(self)
            .map_err(|e| CryptoError::Encryption(format!("key params: {e}")))?;
        Ok(BASE64.encode(json))
    }
}
