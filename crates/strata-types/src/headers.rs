//! Header names shared by storage nodes and their callers.

// -- Relay authorization --

pub const SIGNATURE: &str = "x-strata-signature";
pub const SIGNATURE_TS: &str = "x-strata-signature-ts";
pub const EXPIRE_TIME: &str = "x-strata-expire-time";
pub const TRANSFER_NAME: &str = "x-strata-transfer-name";
pub const HASH_SALT: &str = "x-strata-hash-salt";

// -- Caller identity, set by the TLS terminator --

pub const CLIENT_CERT_SERIAL: &str = "x-client-cert-serial";
pub const CLIENT_CERT_CN: &str = "x-client-cert-cn";
