//! Background task that purges expired messages

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::service::QueueService;

/// Purge expired messages from every queue of `service` once per `every`.
///
/// Expiry is also enforced lazily on each access, so the task only bounds
/// memory held by queues nobody reads. Abort the handle to stop it.
pub fn spawn_reclaimer(service: QueueService, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let purged = service.purge_expired();
            if purged > 0 {
                debug!(
                    purged,
                    resident = service.resident_messages(),
                    "Purged expired messages"
                );
            }
        }
    })
}
