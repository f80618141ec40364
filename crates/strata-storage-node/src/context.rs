use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use strata_crypto::certs::CertificateCache;

/// Process-wide state shared by handlers and background loops: this node's
/// certificate serial, the cached certificates and the control node's clock.
pub struct NodeContext {
    serial_number: u64,
    certs: RwLock<Option<CertificateCache>>,
    clock_offset: RwLock<Duration>,
}

impl NodeContext {
    pub fn new(serial_number: u64) -> Self {
        Self {
            serial_number,
            certs: RwLock::new(None),
            clock_offset: RwLock::new(Duration::zero()),
        }
    }

    pub fn serial_number(&self) -> u64 {
        self.serial_number
    }

    pub fn set_certificates(&self, cache: CertificateCache) {
        *self.certs.write().unwrap_or_else(PoisonError::into_inner) = Some(cache);
    }

    pub fn certificates(&self) -> Option<CertificateCache> {
        self.certs.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Record the control node's clock as observed now.
    pub fn set_control_time(&self, control_time: DateTime<Utc>) {
        *self.clock_offset.write().unwrap_or_else(PoisonError::into_inner) = control_time - Utc::now();
    }

    /// Local time corrected to the control node's clock.
    pub fn control_now(&self) -> DateTime<Utc> {
        Utc::now() + *self.clock_offset.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_clock_follows_offset() {
        let ctx = NodeContext::new(5);
        ctx.set_control_time(Utc::now() + Duration::hours(1));
        let drift = ctx.control_now() - Utc::now();
        assert!(drift > Duration::minutes(59) && drift <= Duration::hours(1));
    }

    #[test]
    fn no_certificates_until_loaded() {
        assert!(NodeContext::new(1).certificates().is_none());
    }
}
