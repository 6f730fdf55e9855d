//! Teacher notification seam for payout decisions.
//!
//! Notifications go out after the decision is committed. A failed delivery is
//! logged and never undoes or fails the approval or rejection.

use crate::{entities::payout, errors::Result};
use std::future::Future;
use tracing::warn;

/// Delivers payout decisions to the teacher.
pub trait PayoutNotifier {
    /// The payout was approved.
    fn payout_approved(&self, payout: &payout::Model) -> impl Future<Output = Result<()>> + Send;

    /// The payout was rejected; `rejection_reason` is set on the model.
    fn payout_rejected(&self, payout: &payout::Model) -> impl Future<Output = Result<()>> + Send;
}

/// Which decision a notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Approved,
    Rejected,
}

/// Sends the notification for `decision`, logging instead of returning failures.
pub(crate) async fn notify_teacher<N>(notifier: &N, payout: &payout::Model, decision: Decision)
where
    N: PayoutNotifier,
{
    let sent = match decision {
        Decision::Approved => notifier.payout_approved(payout).await,
        Decision::Rejected => notifier.payout_rejected(payout).await,
    };
    if let Err(e) = sent {
        warn!(
            payout_id = payout.id,
            teacher = %payout.teacher(),
            ?decision,
            error = %e,
            "payout notification failed"
        );
    }
}
