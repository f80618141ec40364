//! Ed25519 signatures over relayed commands.
//!
//! The signed payload is the canonical JSON array of the signature time,
//! caller serial, receiving node serial, expiry and the command arguments,
//! minus the positions a policy excludes.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, SecondsFormat, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde_json::Value;

use crate::CryptoError;

/// Timestamp form used inside signed payloads. Signer and verifier must agree.
pub fn timestamp_value(ts: &DateTime<Utc>) -> Value {
    Value::String(ts.to_rfc3339_opts(SecondsFormat::Micros, true))
}

/// Build the argument list a relay command signature covers:
/// `[signature_ts, sender_serial, receiver_serial, expire_time, ...args]`
/// where `args` skips the 1-based positions listed in `exclude`.
pub fn relay_values(
    signature_ts: &DateTime<Utc>,
    sender_serial: u64,
    receiver_serial: u64,
    expire_time: &DateTime<Utc>,
    method_args: &[Value],
    exclude: &[usize],
) -> Vec<Value> {
    let mut values = vec![
        timestamp_value(signature_ts),
        Value::from(sender_serial),
        Value::from(receiver_serial),
        timestamp_value(expire_time),
    ];
    values.extend(
        method_args
            .iter()
            .enumerate()
            .filter(|(i, _)| !exclude.contains(&(i + 1)))
            .map(|(_, v)| v.clone()),
    );
    values
}

/// Canonical byte form: the compact JSON array of the values.
pub fn canonical_payload(values: &[Value]) -> Vec<u8> {
    // Serializing a slice of Values cannot fail.
    serde_json::to_vec(values).unwrap_or_default()
}

pub fn sign_values(key: &SigningKey, values: &[Value]) -> String {
    let sig = key.sign(&canonical_payload(values));
    BASE64.encode(sig.to_bytes())
}

pub fn verify_values(key: &VerifyingKey, values: &[Value], signature: &str) -> Result<(), CryptoError> {
    let raw = BASE64
        .decode(signature.trim())
        .map_err(|e| CryptoError::Signature(format!("bad base64: {}", e)))?;
    let sig = Signature::from_slice(&raw).map_err(|e| CryptoError::Signature(e.to_string()))?;
    key.verify(&canonical_payload(values), &sig)
        .map_err(|e| CryptoError::Signature(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_signing_key;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn excluded_positions_are_one_based() {
        let ts = Utc::now();
        let exp = ts + Duration::minutes(5);
        let args = [json!("T-1"), json!("C-X"), json!("salt"), json!("stream")];
        let values = relay_values(&ts, 11, 22, &exp, &args, &[4]);
        assert_eq!(values.len(), 7);
        assert_eq!(values[1], json!(11));
        assert_eq!(values[2], json!(22));
        assert_eq!(&values[4..], &[json!("T-1"), json!("C-X"), json!("salt")]);

        let values = relay_values(&ts, 11, 22, &exp, &[json!("C-X"), json!(0), json!(10)], &[2, 3]);
        assert_eq!(&values[4..], &[json!("C-X")]);
    }

    #[test]
    fn sign_then_verify() {
        let key = generate_signing_key();
        let values = vec![json!("a"), json!(1)];
        let sig = sign_values(&key, &values);
        verify_values(&key.verifying_key(), &values, &sig).unwrap();
    }

    #[test]
    fn tampered_values_fail() {
        let key = generate_signing_key();
        let sig = sign_values(&key, &[json!("a"), json!(1)]);
        let err = verify_values(&key.verifying_key(), &[json!("a"), json!(2)], &sig).unwrap_err();
        assert!(matches!(err, CryptoError::Signature(_)));
    }

    #[test]
    fn garbage_signature_fails() {
        let key = generate_signing_key();
        assert!(verify_values(&key.verifying_key(), &[json!("a")], "not base64!").is_err());
        assert!(verify_values(&key.verifying_key(), &[json!("a")], "AAAA").is_err());
    }
}
