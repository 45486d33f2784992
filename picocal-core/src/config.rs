//! Configuration at ~/.config/picocal/config.toml
//!
//! Every key can be overridden from the environment with a `PICOCAL_` prefix,
//! nested keys separated by `__` (e.g. `PICOCAL_GOAL__SOURCE=github`).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Weekday;
use chrono_tz::Tz;
use config::{Config, Environment, File};
use serde::Deserialize;
use tracing::warn;

use crate::calendar::{CalendarSignalSource, IcsDirectory, NoCalendarSource};
use crate::error::{PicoCalError, PicoCalResult};
use crate::goal::{DailyTotalsFile, GitHubContributions, GoalSignalSource, GoalThreshold, NoGoalSource};
use crate::peer::{PeerLink, PeerTransport, TcpTransport, TransportEvents, UnpairedTransport};
use crate::refresh::DeviceRole;

static DEFAULT_STORE_DIR: &str = "~/.local/share/picocal";
static DEFAULT_REFRESH_INTERVAL: &str = "15m";
static DEFAULT_PEER_REPLY_TIMEOUT: &str = "5s";
static DEFAULT_TOKEN_ENV: &str = "GITHUB_TOKEN";

fn default_role() -> DeviceRole {
    DeviceRole::Phone
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STORE_DIR)
}

fn default_refresh_interval() -> String {
    DEFAULT_REFRESH_INTERVAL.to_string()
}

fn default_peer_reply_timeout() -> String {
    DEFAULT_PEER_REPLY_TIMEOUT.to_string()
}

fn default_first_weekday() -> Weekday {
    Weekday::Sun
}

fn default_token_env() -> String {
    DEFAULT_TOKEN_ENV.to_string()
}

fn default_min_contributions() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalSourceKind {
    #[default]
    None,
    Github,
    DailyTotals,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoalConfig {
    #[serde(default)]
    pub source: GoalSourceKind,

    /// Environment variable holding the GitHub token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    #[serde(default = "default_min_contributions")]
    pub min_contributions: u32,

    /// JSON export of per-day totals for `daily_totals`.
    pub export_path: Option<PathBuf>,

    /// Required for `daily_totals`; there is no built-in default.
    pub threshold: Option<GoalThreshold>,
}

impl Default for GoalConfig {
    fn default() -> Self {
        GoalConfig {
            source: GoalSourceKind::None,
            token_env: default_token_env(),
            min_contributions: default_min_contributions(),
            export_path: None,
            threshold: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CalendarConfig {
    pub events_dir: Option<PathBuf>,
    pub holidays_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PeerConfig {
    /// Where to accept messages from the peer.
    pub listen: Option<SocketAddr>,
    /// `host:port` of the peer.
    pub address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PicoCalConfig {
    #[serde(default = "default_role")]
    pub role: DeviceRole,

    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// IANA zone name; the system zone when unset.
    pub timezone: Option<String>,

    #[serde(default = "default_first_weekday")]
    pub first_weekday: Weekday,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: String,

    #[serde(default = "default_peer_reply_timeout")]
    pub peer_reply_timeout: String,

    #[serde(default)]
    pub goal: GoalConfig,

    #[serde(default)]
    pub calendar: CalendarConfig,

    #[serde(default)]
    pub peer: PeerConfig,
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}

fn parse_duration(key: &str, value: &str) -> PicoCalResult<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| PicoCalError::Config(format!("{key} = \"{value}\": {e}")))
}

impl PicoCalConfig {
    pub fn config_path() -> PicoCalResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| PicoCalError::Config("Could not determine config directory".into()))?
            .join("picocal");

        Ok(config_dir.join("config.toml"))
    }

    /// Load from the default location, creating a commented file there first if needed.
    pub fn load() -> PicoCalResult<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> PicoCalResult<Self> {
        Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix("PICOCAL")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| PicoCalError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| PicoCalError::Config(e.to_string()))
    }

    /// Create a default config file with all options commented out.
    pub fn create_default_config(path: &Path) -> PicoCalResult<()> {
        let contents = format!(
            "\
# picocal configuration

# Which device this process plays (phone pushes every refresh, watch only on user sync):
# role = \"phone\"

# Where the merged snapshot is stored:
# store_dir = \"{DEFAULT_STORE_DIR}\"

# Time zone for calendar events (defaults to the system zone):
# timezone = \"Europe/Berlin\"

# First column of the month grid:
# first_weekday = \"Sun\"

# How often `picocal run` refreshes, and how long to wait for the peer's reply:
# refresh_interval = \"{DEFAULT_REFRESH_INTERVAL}\"
# peer_reply_timeout = \"{DEFAULT_PEER_REPLY_TIMEOUT}\"

# [goal]
# source = \"github\"            # none | github | daily_totals
# token_env = \"{DEFAULT_TOKEN_ENV}\"
# min_contributions = 1
# export_path = \"~/health/active-energy.json\"
# threshold = {{ minimum = 500, inclusive = false }}

# [calendar]
# events_dir = \"~/calendar/personal\"
# holidays_dir = \"~/calendar/holidays\"

# [peer]
# listen = \"0.0.0.0:7341\"
# address = \"watch.local:7341\"
"
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PicoCalError::Config(format!("Could not create config directory: {e}"))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| PicoCalError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }

    pub fn store_dir(&self) -> PathBuf {
        expand(&self.store_dir)
    }

    pub fn refresh_interval(&self) -> PicoCalResult<Duration> {
        parse_duration("refresh_interval", &self.refresh_interval)
    }

    pub fn peer_reply_timeout(&self) -> PicoCalResult<Duration> {
        parse_duration("peer_reply_timeout", &self.peer_reply_timeout)
    }

    /// Configured zone, else the system zone, else UTC.
    pub fn timezone(&self) -> PicoCalResult<Tz> {
        if let Some(name) = &self.timezone {
            return name
                .parse()
                .map_err(|_| PicoCalError::Config(format!("unknown timezone '{name}'")));
        }

        match iana_time_zone::get_timezone().map(|name| name.parse::<Tz>()) {
            Ok(Ok(zone)) => Ok(zone),
            _ => {
                warn!("could not determine system timezone, using UTC");
                Ok(Tz::UTC)
            }
        }
    }

    pub fn goal_source(&self) -> PicoCalResult<Box<dyn GoalSignalSource>> {
        let goal = &self.goal;
        match goal.source {
            GoalSourceKind::None => Ok(Box::new(NoGoalSource)),
            GoalSourceKind::Github => Ok(Box::new(
                GitHubContributions::new(&goal.token_env, goal.min_contributions)
                    .with_zone(self.timezone()?),
            )),
            GoalSourceKind::DailyTotals => {
                let path = goal.export_path.as_deref().ok_or_else(|| {
                    PicoCalError::Config("goal.export_path is required for daily_totals".into())
                })?;
                let threshold = goal.threshold.ok_or_else(|| {
                    PicoCalError::Config("goal.threshold is required for daily_totals".into())
                })?;
                Ok(Box::new(DailyTotalsFile::new(expand(path), threshold)))
            }
        }
    }

    pub fn calendar_source(&self) -> PicoCalResult<Box<dyn CalendarSignalSource>> {
        let Some(events_dir) = &self.calendar.events_dir else {
            return Ok(Box::new(NoCalendarSource));
        };

        let mut source = IcsDirectory::new(expand(events_dir), self.timezone()?);
        if let Some(holidays_dir) = &self.calendar.holidays_dir {
            source = source.with_holidays(expand(holidays_dir));
        }
        Ok(Box::new(source))
    }

    /// TCP when a listen or peer address is configured, otherwise unpaired.
    pub fn peer_transport(&self) -> (Arc<dyn PeerTransport>, TransportEvents) {
        if self.peer.listen.is_none() && self.peer.address.is_none() {
            let (transport, events) = UnpairedTransport::new();
            return (Arc::new(transport), events);
        }

        let (transport, events) = TcpTransport::new(self.peer.listen, self.peer.address.clone());
        (Arc::new(transport), events)
    }

    /// Start the peer link. Must be called from within a tokio runtime.
    pub fn peer_link(&self) -> PicoCalResult<PeerLink> {
        let (transport, events) = self.peer_transport();
        Ok(PeerLink::start(transport, events, self.peer_reply_timeout()?))
    }
}
