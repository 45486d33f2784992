pub mod run;
pub mod show;
pub mod sync;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use picocal_core::clock::ZonedClock;
use picocal_core::peer::LinkState;
use picocal_core::store::{FileBackend, SharedStore};
use picocal_core::{PicoCalConfig, RefreshCoordinator};
use tracing::{debug, warn};

/// How long to wait for the peer session before refreshing anyway
const ACTIVATION_WAIT: Duration = Duration::from_secs(2);

/// Wire the configured sources, store and peer link into a coordinator.
pub async fn coordinator(config: &PicoCalConfig) -> Result<RefreshCoordinator> {
    let store = SharedStore::open(FileBackend::in_dir(&config.store_dir()));
    let peer = config.peer_link()?;

    match tokio::time::timeout(ACTIVATION_WAIT, peer.settled()).await {
        Ok(LinkState::Active { reachable }) => debug!(reachable, "peer session ready"),
        Ok(state) => warn!(?state, "peer session not active"),
        Err(_) => warn!("peer session still activating"),
    }

    Ok(RefreshCoordinator::new(config.role, store, peer)
        .with_clock(Arc::new(ZonedClock(config.timezone()?)))
        .with_goal_source(config.goal_source()?)
        .with_calendar_source(config.calendar_source()?))
}
