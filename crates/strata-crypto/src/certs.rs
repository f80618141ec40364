//! Certificate set fetched from the control node: signer keys by role and
//! a signed revocation list that every node checks callers against.

use std::collections::HashSet;

use ed25519_dalek::{SigningKey, VerifyingKey};
use serde_json::Value;
use strata_types::models::{CertificateArchive, CertificateRecord};

use crate::CryptoError;
use crate::keys::verifying_key_from_base64;
use crate::signing::{sign_values, verify_values};

/// Common name the control node's certificate carries.
pub const CONTROL_NODE_CN: &str = "Control Node";

#[derive(Debug, Clone)]
pub struct Certificate {
    pub serial_number: u64,
    pub common_name: String,
    pub public_key: VerifyingKey,
}

impl Certificate {
    pub fn from_record(record: &CertificateRecord) -> Result<Self, CryptoError> {
        Ok(Self {
            serial_number: record.serial_number,
            common_name: record.common_name.clone(),
            public_key: verifying_key_from_base64(&record.public_key)?,
        })
    }
}

/// Verified set of certificates a node checks relay commands against.
#[derive(Debug, Clone)]
pub struct CertificateCache {
    software_signer: Certificate,
    relay_command_signer: Certificate,
    revoked: HashSet<u64>,
}

fn crl_values(revoked: &[u64]) -> Vec<Value> {
    let mut sorted = revoked.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    vec![Value::from("crl"), Value::from(sorted)]
}

/// Sign a revocation list with the software signer's key.
pub fn sign_crl(software_signer: &SigningKey, revoked: &[u64]) -> String {
    sign_values(software_signer, &crl_values(revoked))
}

impl CertificateCache {
    /// Load the archive fetched from the control node. The CRL must carry a
    /// valid signature by the software signer.
    pub fn from_archive(archive: &CertificateArchive) -> Result<Self, CryptoError> {
        let software_signer = Certificate::from_record(&archive.software_signer)?;
        let relay_command_signer = Certificate::from_record(&archive.relay_command_signer)?;

        verify_values(
            &software_signer.public_key,
            &crl_values(&archive.revoked_serials),
            &archive.crl_signature,
        )?;

        Ok(Self {
            software_signer,
            relay_command_signer,
            revoked: archive.revoked_serials.iter().copied().collect(),
        })
    }

    pub fn relay_command_signer(&self) -> &Certificate {
        &self.relay_command_signer
    }

    pub fn software_signer(&self) -> &Certificate {
        &self.software_signer
    }

    pub fn is_revoked(&self, serial_number: u64) -> bool {
        self.revoked.contains(&serial_number)
    }
}
