//! Update check against the remote catalog.

#[cfg(feature = "metrics")]
use alder_metrics::{counter, skills as skills_metrics};
use {
    futures::future::join_all,
    tracing::{info, warn},
};

use crate::{
    error::{Error, Result},
    registry::SkillRegistry,
    store::SkillStore,
    ticket::TicketQueue,
};

/// Compare every known skill with the catalog.
///
/// Newer versions are queued for install when `auto_update` is on and only
/// flagged as `update_available` otherwise. Returns the number of updates found.
pub async fn check_for_updates(
    registry: &SkillRegistry,
    store: &dyn SkillStore,
    queue: &TicketQueue,
    auto_update: bool,
) -> Result<usize> {
    let installed = registry.list().await;
    let lookups = join_all(installed.iter().map(|info| store.fetch_ticket(&info.name))).await;

    let mut found = 0;
    for (info, lookup) in installed.iter().zip(lookups) {
        let ticket = match lookup {
            Ok(ticket) => ticket,
            Err(Error::FetchNotFound { .. }) => {
                info!(skill = %info.name, "not available (deprecated or dev skill?)");
                continue;
            },
            Err(e) => {
                warn!(skill = %info.name, error = %e, "update check failed");
                continue;
            },
        };
        if ticket.version <= info.version {
            continue;
        }

        found += 1;
        info!(
            skill = %info.name,
            installed = %info.version,
            available = %ticket.version,
            "update available"
        );
        if !auto_update {
            registry.set_update_available(&info.name, true).await;
            continue;
        }
        if let Err(e) = queue.enqueue(&ticket).await {
            warn!(skill = %info.name, error = %e, "failed to queue update, flagging it instead");
            registry.set_update_available(&info.name, true).await;
        }
    }

    #[cfg(feature = "metrics")]
    counter!(skills_metrics::UPDATES_FOUND_TOTAL).increment(found as u64);
    if found > 0 {
        info!(found, "skill updates found");
    }
    Ok(found)
}
