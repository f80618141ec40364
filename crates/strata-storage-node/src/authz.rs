use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde_json::Value;
use strata_crypto::certs::CONTROL_NODE_CN;
use strata_crypto::signing::{relay_values, verify_values};
use strata_types::headers;
use tracing::{error, warn};

use crate::context::NodeContext;
use crate::error::NodeError;

/// How an operation is guarded.
///
/// `relay` operations carry a command signed by the control node on behalf of
/// the caller. `restricted` operations may only be called by the control node
/// itself. `exclude_sigchecks` lists 1-based method argument positions that
/// are not covered by the signature.
#[derive(Debug, Clone, Copy)]
pub struct PublishPolicy {
    pub restricted: bool,
    pub relay: bool,
    pub exclude_sigchecks: &'static [usize],
}

pub const STORE_CHUNK: PublishPolicy = PublishPolicy { restricted: false, relay: true, exclude_sigchecks: &[4] };
pub const RETRIEVE_CHUNK: PublishPolicy = PublishPolicy { restricted: false, relay: true, exclude_sigchecks: &[2, 3] };
pub const DELETE_CHUNK: PublishPolicy = PublishPolicy { restricted: true, relay: false, exclude_sigchecks: &[] };
pub const CHECK_HASH: PublishPolicy = PublishPolicy { restricted: true, relay: false, exclude_sigchecks: &[] };
pub const SEND_CHUNK: PublishPolicy = PublishPolicy { restricted: true, relay: false, exclude_sigchecks: &[] };
pub const HELLO: PublishPolicy = PublishPolicy { restricted: false, relay: false, exclude_sigchecks: &[] };

/// Identity of the TLS peer, as forwarded by the terminating proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub serial_number: u64,
    pub common_name: String,
}

impl CallerIdentity {
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let serial_number = header_str(headers, headers::CLIENT_CERT_SERIAL)?.parse().ok()?;
        let common_name = header_str(headers, headers::CLIENT_CERT_CN)?.to_string();
        Some(Self { serial_number, common_name })
    }
}

/// Signature fields of a relayed command.
#[derive(Debug, Clone)]
pub struct RelayCommand {
    pub signature: String,
    pub signature_ts: DateTime<Utc>,
    pub expire_time: DateTime<Utc>,
}

impl RelayCommand {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, NodeError> {
        let signature = header_str(headers, headers::SIGNATURE).ok_or(NodeError::Authentication)?;
        let signature_ts = header_time(headers, headers::SIGNATURE_TS).ok_or(NodeError::Authentication)?;
        let expire_time = header_time(headers, headers::EXPIRE_TIME).ok_or(NodeError::Authentication)?;
        Ok(Self {
            signature: signature.to_string(),
            signature_ts,
            expire_time,
        })
    }
}

pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

fn header_time(headers: &HeaderMap, name: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(header_str(headers, name)?)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Check a call against its policy. Runs before any handler work.
///
/// For relay commands the expiry is checked first, against the control node's
/// clock, so an expired command never costs a signature check or disk I/O.
pub fn authorize(
    ctx: &NodeContext,
    policy: &PublishPolicy,
    caller: Option<&CallerIdentity>,
    relay: Option<&RelayCommand>,
    method_args: &[Value],
) -> Result<(), NodeError> {
    if !policy.relay && !policy.restricted {
        return Ok(());
    }
    let Some(caller) = caller else {
        warn!("Rejected call without a client certificate");
        return Err(NodeError::Authentication);
    };

    let Some(certs) = ctx.certificates() else {
        error!("Certificates not loaded; rejecting call from {}", caller.serial_number);
        return Err(NodeError::Authentication);
    };
    if certs.is_revoked(caller.serial_number) {
        error!("Rejected call from revoked certificate {}", caller.serial_number);
        return Err(NodeError::Authentication);
    }

    if policy.relay {
        let Some(relay) = relay else {
            return Err(NodeError::Authentication);
        };
        if relay.expire_time < ctx.control_now() {
            return Err(NodeError::RequestExpired);
        }
        let values = relay_values(
            &relay.signature_ts,
            caller.serial_number,
            ctx.serial_number(),
            &relay.expire_time,
            method_args,
            policy.exclude_sigchecks,
        );
        if let Err(e) = verify_values(&certs.relay_command_signer().public_key, &values, &relay.signature) {
            error!("Relay signature from {} failed: {}", caller.serial_number, e);
            return Err(NodeError::Authentication);
        }
        return Ok(());
    }

    if caller.common_name != CONTROL_NODE_CN {
        error!(
            "Restricted call from {} ({}) rejected",
            caller.common_name, caller.serial_number
        );
        return Err(NodeError::Authentication);
    }
    Ok(())
}
