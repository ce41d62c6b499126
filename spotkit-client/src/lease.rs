//! Lease-aware response handling.
//!
//! Services that accept a lease report what they did with it in a
//! `LeaseUseResult`. The result is handed to the application's
//! [`LeaseWallet`] (which owns lease sequencing) and any status other than
//! `STATUS_OK` fails the call.

use spotkit_proto::lease_use_result::Status as LeaseStatus;
use spotkit_proto::LeaseUseResult;
use tracing::{debug, warn};

use crate::error::{ErrorDomain, Result, Status};
use crate::message::LeaseResponse;

/// Receives every lease use result seen by a client.
pub trait LeaseWallet: Send + Sync {
    fn on_lease_use_result(&self, result: &LeaseUseResult);
}

/// Forward the lease result of `response` to `wallet` and check its status.
///
/// A response without a lease result passes.
pub fn process_lease_response<R: LeaseResponse>(
    response: &R,
    wallet: Option<&dyn LeaseWallet>,
) -> Result<()> {
    match response.lease_use_result() {
        Some(result) => process_lease_use_result(result, wallet),
        None => Ok(()),
    }
}

pub fn process_lease_use_result(
    result: &LeaseUseResult,
    wallet: Option<&dyn LeaseWallet>,
) -> Result<()> {
    if let Some(wallet) = wallet {
        wallet.on_lease_use_result(result);
    }

    let status = result.status();
    if status == LeaseStatus::Ok {
        return Ok(());
    }

    let resource = result
        .attempted_lease
        .as_ref()
        .map(|lease| lease.resource.as_str())
        .unwrap_or("<none>");
    let mut message = format!("{} for resource {}", status.as_str_name(), resource);
    if let Some(owner) = result.owner.as_ref().filter(|o| !o.client_name.is_empty()) {
        message.push_str(&format!(", owned by {}", owner.client_name));
    }

    if status == LeaseStatus::Unknown {
        debug!(resource, "Server did not report a lease status");
    } else {
        warn!(resource, status = status.as_str_name(), "Lease rejected");
    }
    Err(Status::new(ErrorDomain::Lease, status as i32, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use spotkit_proto::{Lease, LeaseOwner};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingWallet {
        seen: Mutex<Vec<i32>>,
    }

    impl LeaseWallet for RecordingWallet {
        fn on_lease_use_result(&self, result: &LeaseUseResult) {
            self.seen.lock().unwrap().push(result.status);
        }
    }

    fn result(status: LeaseStatus) -> LeaseUseResult {
        LeaseUseResult {
            status: status as i32,
            owner: Some(LeaseOwner {
                client_name: "tablet".to_string(),
                user_name: String::new(),
            }),
            attempted_lease: Some(Lease {
                resource: "body".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_ok_lease_passes_and_reaches_wallet() {
        let wallet = RecordingWallet::default();
        assert!(process_lease_use_result(&result(LeaseStatus::Ok), Some(&wallet)).is_ok());
        assert_eq!(*wallet.seen.lock().unwrap(), vec![LeaseStatus::Ok as i32]);
    }

    #[test]
    fn test_stale_lease_fails() {
        let wallet = RecordingWallet::default();
        let err = process_lease_use_result(&result(LeaseStatus::Older), Some(&wallet)).unwrap_err();
        assert!(err.is(ErrorDomain::Lease, LeaseStatus::Older as i32));
        assert_eq!(
            err.message(),
            "STATUS_OLDER for resource body, owned by tablet"
        );
        assert_eq!(wallet.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_without_wallet() {
        let err = process_lease_use_result(&LeaseUseResult::default(), None).unwrap_err();
        assert!(err.is(ErrorDomain::Lease, LeaseStatus::Unknown as i32));
        assert!(err.message().contains("<none>"));
    }
}
