//! The refresh cycle that keeps the merged timeline current.
//!
//! One cycle: clear on month rollover, fetch goal and calendar signals
//! concurrently, fold the persisted snapshot, the goal flags and whatever the
//! peer delivered, persist, publish, then push the result to the peer.
//! A cycle always completes; sub-step failures are logged and reported in the
//! returned [`RefreshReport`], never propagated.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::busy::BusyPeriod;
use crate::calendar::{CalendarSignalSource, HolidaySet, NoCalendarSource, fetch_busy_periods};
use crate::clock::{Clock, SystemClock};
use crate::day_flags::DayFlags;
use crate::error::{PicoCalError, PicoCalResult};
use crate::goal::{GoalSignalSource, NoGoalSource};
use crate::month::CalendarMonth;
use crate::peer::PeerLink;
use crate::store::{SHARED_FLAGS_KEY, SharedStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRole {
    Phone,
    Watch,
}

impl DeviceRole {
    /// The phone always pushes after persisting; the watch only when asked to.
    pub fn pushes_on(self, trigger: RefreshTrigger) -> bool {
        match self {
            DeviceRole::Phone => true,
            DeviceRole::Watch => trigger == RefreshTrigger::UserSync,
        }
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRole::Phone => write!(f, "phone"),
            DeviceRole::Watch => write!(f, "watch"),
        }
    }
}

impl FromStr for DeviceRole {
    type Err = PicoCalError;

    fn from_str(s: &str) -> PicoCalResult<Self> {
        match s {
            "phone" => Ok(DeviceRole::Phone),
            "watch" => Ok(DeviceRole::Watch),
            other => Err(PicoCalError::Config(format!(
                "unknown role '{other}' (expected phone or watch)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    /// The user pressed sync.
    UserSync,
    /// The app came to the foreground.
    SceneActive,
    /// Periodic background wake.
    Background,
}

impl fmt::Display for RefreshTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshTrigger::UserSync => write!(f, "user"),
            RefreshTrigger::SceneActive => write!(f, "scene"),
            RefreshTrigger::Background => write!(f, "background"),
        }
    }
}

impl FromStr for RefreshTrigger {
    type Err = PicoCalError;

    fn from_str(s: &str) -> PicoCalResult<Self> {
        match s {
            "user" => Ok(RefreshTrigger::UserSync),
            "scene" => Ok(RefreshTrigger::SceneActive),
            "background" => Ok(RefreshTrigger::Background),
            other => Err(PicoCalError::Config(format!(
                "unknown trigger '{other}' (expected user, scene or background)"
            ))),
        }
    }
}

/// Presentation-facing state of one signal.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadState<T> {
    Loading,
    Loaded(T),
    Failed(String),
}

impl<T> LoadState<T> {
    pub fn loaded(&self) -> Option<&T> {
        match self {
            LoadState::Loaded(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, LoadState::Loading)
    }

    /// Keep the previous value if there is one; otherwise record the failure.
    fn fail(&mut self, reason: String) {
        if !matches!(self, LoadState::Loaded(_)) {
            *self = LoadState::Failed(reason);
        }
    }
}

/// Everything the month grid needs.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarState {
    pub month: CalendarMonth,
    pub flags: LoadState<DayFlags>,
    pub busy: LoadState<Vec<BusyPeriod>>,
    pub holidays: LoadState<HolidaySet>,
}

impl CalendarState {
    pub fn loading(month: CalendarMonth) -> Self {
        CalendarState {
            month,
            flags: LoadState::Loading,
            busy: LoadState::Loading,
            holidays: LoadState::Loading,
        }
    }

    /// State built from a persisted snapshot alone, without calendar data.
    pub fn from_snapshot(month: CalendarMonth, flags: DayFlags) -> Self {
        CalendarState {
            flags: LoadState::Loaded(flags),
            ..CalendarState::loading(month)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PeerOutcome {
    Acknowledged(String),
    /// This role does not push on this trigger.
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshReport {
    pub trigger: RefreshTrigger,
    pub month: CalendarMonth,
    /// The snapshot was reset because the month rolled over.
    pub cleared: bool,
    pub merged: DayFlags,
    pub goal_error: Option<String>,
    pub busy_error: Option<String>,
    pub holidays_error: Option<String>,
    pub persist_error: Option<String>,
    pub peer: PeerOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Completed(RefreshReport),
    /// Another refresh was in flight; nothing was fetched.
    AlreadyRunning,
}

impl RefreshOutcome {
    pub fn report(&self) -> Option<&RefreshReport> {
        match self {
            RefreshOutcome::Completed(report) => Some(report),
            RefreshOutcome::AlreadyRunning => None,
        }
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct RefreshCoordinator {
    role: DeviceRole,
    store: SharedStore,
    peer: PeerLink,
    goal: Box<dyn GoalSignalSource>,
    calendar: Box<dyn CalendarSignalSource>,
    clock: Arc<dyn Clock>,
    running: AtomicBool,
    state: Arc<watch::Sender<CalendarState>>,
    follow_peer: JoinHandle<()>,
}

impl RefreshCoordinator {
    /// Coordinator with no goal or calendar source and the system clock.
    pub fn new(role: DeviceRole, store: SharedStore, peer: PeerLink) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let month = CalendarMonth::of(clock.now());
        let state = Arc::new(watch::Sender::new(CalendarState::loading(month)));
        let follow_peer = tokio::spawn(follow_peer(peer.subscribe_received(), state.clone()));

        RefreshCoordinator {
            role,
            store,
            peer,
            goal: Box::new(NoGoalSource),
            calendar: Box::new(NoCalendarSource),
            clock,
            running: AtomicBool::new(false),
            state,
            follow_peer,
        }
    }

    pub fn with_goal_source(mut self, goal: Box<dyn GoalSignalSource>) -> Self {
        self.goal = goal;
        self
    }

    pub fn with_calendar_source(mut self, calendar: Box<dyn CalendarSignalSource>) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.state
            .send_replace(CalendarState::loading(CalendarMonth::of(clock.now())));
        self.clock = clock;
        self
    }

    pub fn role(&self) -> DeviceRole {
        self.role
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn peer(&self) -> &PeerLink {
        &self.peer
    }

    pub fn state(&self) -> CalendarState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CalendarState> {
        self.state.subscribe()
    }

    /// Run one refresh cycle. Never fails.
    pub async fn refresh(&self, trigger: RefreshTrigger) -> RefreshOutcome {
        let Some(_running) = RunningGuard::acquire(&self.running) else {
            debug!(%trigger, "refresh already in progress");
            return RefreshOutcome::AlreadyRunning;
        };

        let now = self.clock.now();
        let today = now.date();
        let month = CalendarMonth::of(now);
        info!(%trigger, role = %self.role, %month, "refresh started");

        let cleared = self.store.begin_month(month);
        if cleared {
            self.peer.reset_received();
        }
        self.state.send_if_modified(|state| {
            if state.month == month {
                return false;
            }
            *state = CalendarState::loading(month);
            true
        });

        let (goal, busy, holidays) = tokio::join!(
            self.goal.fetch_month_flags(month, today),
            fetch_busy_periods(self.calendar.as_ref(), month),
            self.calendar.holidays(month),
        );

        let (goal_flags, goal_error) = match goal {
            Ok(flags) => {
                debug!(days = flags.len(), met = flags.count_set(), "goal flags fetched");
                (flags, None)
            }
            Err(e) => {
                warn!(error = %e, "goal fetch failed, continuing without it");
                (DayFlags::new(), Some(e.to_string()))
            }
        };

        // the store folds in its freshly read snapshot under its own lock
        let incoming = goal_flags.union(&self.peer.received());
        let (merged, persisted) = self.store.merge(&incoming, SHARED_FLAGS_KEY);

        let persist_error = match persisted {
            Ok(()) => None,
            Err(e) => {
                error!(error = %e, "failed to persist merged snapshot");
                Some(e.to_string())
            }
        };
        self.state.send_modify(|state| state.flags = LoadState::Loaded(merged.clone()));

        let peer = self.push_to_peer(trigger, &merged).await;

        let busy_error = busy.as_ref().err().map(|e| e.to_string());
        let holidays_error = holidays.as_ref().err().map(|e| e.to_string());
        self.state.send_modify(|state| {
            match busy {
                Ok(periods) => state.busy = LoadState::Loaded(periods),
                Err(e) => {
                    warn!(error = %e, "busy periods unavailable");
                    state.busy.fail(e.to_string());
                }
            }
            match holidays {
                Ok(days) => state.holidays = LoadState::Loaded(days),
                Err(e) => {
                    warn!(error = %e, "holidays unavailable");
                    state.holidays.fail(e.to_string());
                }
            }
        });

        info!(days = merged.len(), met = merged.count_set(), "refresh completed");
        RefreshOutcome::Completed(RefreshReport {
            trigger,
            month,
            cleared,
            merged,
            goal_error,
            busy_error,
            holidays_error,
            persist_error,
            peer,
        })
    }

    async fn push_to_peer(&self, trigger: RefreshTrigger, merged: &DayFlags) -> PeerOutcome {
        if !self.role.pushes_on(trigger) {
            debug!(%trigger, "not pushing to peer on this trigger");
            return PeerOutcome::Skipped;
        }

        match self.peer.send_with_reply(merged).await {
            Ok(reply) => {
                info!(%reply, "peer acknowledged");
                PeerOutcome::Acknowledged(reply)
            }
            Err(PicoCalError::PeerNotReachable) => {
                debug!("peer not reachable, skipping push");
                PeerOutcome::Failed(PicoCalError::PeerNotReachable.to_string())
            }
            Err(e) => {
                warn!(error = %e, "peer push failed");
                PeerOutcome::Failed(e.to_string())
            }
        }
    }

    /// Refresh every `period` (first one immediately) until `shutdown` resolves.
    pub async fn run_periodic(&self, period: Duration, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("periodic refresh stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.refresh(RefreshTrigger::Background).await;
                }
            }
        }
    }
}

impl Drop for RefreshCoordinator {
    fn drop(&mut self) {
        self.follow_peer.abort();
    }
}

/// Show days the peer pushes as soon as they arrive, not at the next refresh.
async fn follow_peer(
    mut received: watch::Receiver<DayFlags>,
    state: Arc<watch::Sender<CalendarState>>,
) {
    while received.changed().await.is_ok() {
        let incoming = received.borrow_and_update().clone();
        if incoming.is_empty() {
            continue;
        }
        state.send_if_modified(|state| {
            let next = match state.flags.loaded() {
                Some(flags) => flags.union(&incoming),
                None => incoming.clone(),
            };
            if state.flags.loaded() == Some(&next) {
                return false;
            }
            debug!(met = next.count_set(), "peer days shown before next refresh");
            state.flags = LoadState::Loaded(next);
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveDateTime};
    use tokio::sync::Notify;

    use super::*;
    use crate::clock::FixedClock;
    use crate::peer::{DEFAULT_REPLY_TIMEOUT, UnpairedTransport};
    use crate::store::MemoryBackend;

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn unpaired() -> PeerLink {
        let (transport, events) = UnpairedTransport::new();
        PeerLink::start(Arc::new(transport), events, DEFAULT_REPLY_TIMEOUT)
    }

    struct FixedGoal(Vec<bool>);

    #[async_trait]
    impl GoalSignalSource for FixedGoal {
        async fn fetch_month_flags(
            &self,
            _month: CalendarMonth,
            _today: NaiveDate,
        ) -> PicoCalResult<DayFlags> {
            Ok(DayFlags::from(self.0.clone()))
        }
    }

    struct GatedGoal {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl GoalSignalSource for GatedGoal {
        async fn fetch_month_flags(
            &self,
            _month: CalendarMonth,
            _today: NaiveDate,
        ) -> PicoCalResult<DayFlags> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(DayFlags::from(vec![true]))
        }
    }

    #[test]
    fn test_role_push_policy() {
        assert!(DeviceRole::Phone.pushes_on(RefreshTrigger::Background));
        assert!(DeviceRole::Phone.pushes_on(RefreshTrigger::SceneActive));
        assert!(DeviceRole::Watch.pushes_on(RefreshTrigger::UserSync));
        assert!(!DeviceRole::Watch.pushes_on(RefreshTrigger::SceneActive));
        assert!(!DeviceRole::Watch.pushes_on(RefreshTrigger::Background));
    }

    #[test]
    fn test_parse_role_and_trigger() {
        assert_eq!("watch".parse::<DeviceRole>().unwrap(), DeviceRole::Watch);
        assert!("tablet".parse::<DeviceRole>().is_err());
        assert_eq!(
            "scene".parse::<RefreshTrigger>().unwrap(),
            RefreshTrigger::SceneActive
        );
    }

    #[tokio::test]
    async fn test_state_starts_loading_then_loads() {
        let coordinator =
            RefreshCoordinator::new(DeviceRole::Phone, SharedStore::open(MemoryBackend::default()), unpaired())
                .with_goal_source(Box::new(FixedGoal(vec![true, false, true])))
                .with_clock(Arc::new(FixedClock::new(at(2024, 5, 3))));

        let before = coordinator.state();
        assert!(before.flags.is_loading());
        assert!(before.busy.is_loading());

        let outcome = coordinator.refresh(RefreshTrigger::SceneActive).await;
        let report = outcome.report().unwrap();
        assert_eq!(report.merged, DayFlags::from(vec![true, false, true]));
        assert!(report.busy_error.is_some());

        let after = coordinator.state();
        assert_eq!(after.flags.loaded(), Some(&DayFlags::from(vec![true, false, true])));
        // no calendar source: failures, not stale data
        assert!(matches!(after.busy, LoadState::Failed(_)));
        assert!(matches!(after.holidays, LoadState::Failed(_)));
    }

    #[tokio::test]
    async fn test_overlapping_refresh_is_rejected() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let coordinator = Arc::new(
            RefreshCoordinator::new(DeviceRole::Phone, SharedStore::open(MemoryBackend::default()), unpaired())
                .with_goal_source(Box::new(GatedGoal {
                    entered: entered.clone(),
                    release: release.clone(),
                }))
                .with_clock(Arc::new(FixedClock::new(at(2024, 5, 3)))),
        );

        let first = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.refresh(RefreshTrigger::Background).await }
        });
        entered.notified().await;

        let second = coordinator.refresh(RefreshTrigger::UserSync).await;
        assert_eq!(second, RefreshOutcome::AlreadyRunning);

        release.notify_one();
        let first = first.await.unwrap();
        assert!(first.report().is_some());

        // the guard is released afterwards
        release.notify_one();
        let third = coordinator.refresh(RefreshTrigger::UserSync).await;
        assert!(third.report().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_periodic_stops_on_shutdown() {
        let backend = MemoryBackend::default();
        let coordinator = RefreshCoordinator::new(DeviceRole::Phone, SharedStore::open(backend.clone()), unpaired())
            .with_goal_source(Box::new(FixedGoal(vec![true])))
            .with_clock(Arc::new(FixedClock::new(at(2024, 5, 3))));

        coordinator
            .run_periodic(
                Duration::from_secs(60),
                tokio::time::sleep(Duration::from_secs(150)),
            )
            .await;

        assert_eq!(
            backend.saved().flags.get(SHARED_FLAGS_KEY),
            Some(&DayFlags::from(vec![true]))
        );
    }
}
