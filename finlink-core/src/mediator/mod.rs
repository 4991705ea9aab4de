//! Format mediators: wire framing and message authentication
//!
//! Each mediator is a pure, stateless buffer→buffer transform with two
//! directions: `fetch_preparation` strips framing and verifies the message
//! signature on the way in; `publish_preparation` adds framing and computes
//! the signature on the way out. Authentication failures are never retried:
//! they surface as [`Error::Authentication`](crate::Error::Authentication)
//! and route the owning transaction to Abort, because the message content
//! itself is untrustworthy rather than transiently unavailable.
//!
//! Every format shares one key-presence policy:
//!
//! | key configured | message signed | outcome                          |
//! |----------------|----------------|----------------------------------|
//! | no             | no             | pass through unsigned            |
//! | no             | yes            | authentication error             |
//! | yes            | no             | authentication error             |
//! | yes            | yes            | verify; mismatch → authentication error |

mod fin;
mod ip;
mod mx;
mod pcc;
mod strict;

pub use fin::FinMediator;
pub use ip::IpMediator;
pub use mx::MxMediator;
pub use pcc::PccMediator;
pub use strict::StrictFormatMediator;

use crate::buffer::ManagedBuffer;
use crate::keys::KeyHandle;
use crate::Result;
use tracing::warn;

/// Service id: FIN messaging via the alliance interface
pub const SERVICE_FIN: &str = "SAA_FIN";
/// Service id: FIN over the PCC print-control envelope
pub const SERVICE_FIN_PCC: &str = "SAA_FIN_PCC";
/// Service id: FileAct strict-format PDUs
pub const SERVICE_FILEACT: &str = "SAA_FILEACT";
/// Service id: FileAct carrying MX (ISO 20022) documents
pub const SERVICE_FILEACT_MX: &str = "SAA_FILEACT_MX";
/// Service id: FileAct carrying IP/IPS instant-payment documents
pub const SERVICE_FILEACT_IP: &str = "SAA_FILEACT_IP";

/// A format mediator selected for one connector
#[derive(Debug, Clone)]
pub enum Mediator {
    Strict(StrictFormatMediator),
    Fin(FinMediator),
    Pcc(PccMediator),
    Mx(MxMediator),
    Ip(IpMediator),
}

impl Mediator {
    /// Map a service identifier to its mediator.
    ///
    /// Unknown ids fall back to the FIN mediator with a warning, never an
    /// error. Older configurations rely on this; the log line makes a
    /// misconfigured service id observable without breaking them.
    pub fn select(service_id: &str) -> Mediator {
        match service_id {
            SERVICE_FIN => Mediator::Fin(FinMediator),
            SERVICE_FIN_PCC => Mediator::Pcc(PccMediator),
            SERVICE_FILEACT => Mediator::Strict(StrictFormatMediator),
            SERVICE_FILEACT_MX => Mediator::Mx(MxMediator),
            SERVICE_FILEACT_IP => Mediator::Ip(IpMediator),
            other => {
                warn!(
                    service_id = other,
                    "unknown service id, falling back to the FIN mediator"
                );
                Mediator::Fin(FinMediator)
            }
        }
    }

    /// Inbound transform: strip framing, verify the signature, return the
    /// payload
    pub fn fetch_preparation(
        &self,
        input: &[u8],
        key: &KeyHandle,
        digest_hint: Option<&str>,
    ) -> Result<ManagedBuffer> {
        match self {
            Mediator::Strict(mediator) => mediator.fetch(input, key),
            Mediator::Fin(mediator) => mediator.fetch(input, key),
            Mediator::Pcc(mediator) => mediator.fetch(input, key),
            Mediator::Mx(mediator) => mediator.fetch(input, key, digest_hint),
            Mediator::Ip(mediator) => mediator.fetch(input, key),
        }
    }

    /// Outbound transform: add framing, compute the signature, return the
    /// framed buffer
    pub fn publish_preparation(
        &self,
        input: &[u8],
        key: &KeyHandle,
        _digest_hint: Option<&str>,
    ) -> Result<ManagedBuffer> {
        match self {
            Mediator::Strict(mediator) => mediator.publish(input, key),
            Mediator::Fin(mediator) => mediator.publish(input, key),
            Mediator::Pcc(mediator) => mediator.publish(input, key),
            Mediator::Mx(mediator) => mediator.publish(input, key),
            Mediator::Ip(mediator) => mediator.publish(input, key),
        }
    }

    /// Short format name for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            Mediator::Strict(_) => "strict",
            Mediator::Fin(_) => "fin",
            Mediator::Pcc(_) => "pcc",
            Mediator::Mx(_) => "mx",
            Mediator::Ip(_) => "ip",
        }
    }
}
