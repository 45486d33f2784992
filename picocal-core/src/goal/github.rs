//! GitHub contribution calendar as a goal source.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone};
use chrono_tz::Tz;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{GoalSignalSource, GoalThreshold, flags_from_daily_totals};
use crate::day_flags::DayFlags;
use crate::error::{PicoCalError, PicoCalResult};
use crate::month::CalendarMonth;

const GITHUB_GRAPHQL_URL: &str = "https://api.github.com/graphql";

const CONTRIBUTIONS_QUERY: &str = "\
query UserContributions($from: DateTime!, $to: DateTime!) {
  viewer {
    contributionsCollection(from: $from, to: $to) {
      contributionCalendar {
        totalContributions
        weeks { contributionDays { date contributionCount } }
      }
    }
  }
}";

pub struct GitHubContributions {
    http: reqwest::Client,
    endpoint: String,
    token_env: String,
    min_contributions: u32,
    zone: Tz,
}

impl GitHubContributions {
    pub fn new(token_env: &str, min_contributions: u32) -> Self {
        GitHubContributions {
            http: reqwest::Client::new(),
            endpoint: GITHUB_GRAPHQL_URL.to_string(),
            token_env: token_env.to_string(),
            min_contributions,
            zone: Tz::UTC,
        }
    }

    /// Zone the month and `today` are computed in.
    pub fn with_zone(mut self, zone: Tz) -> Self {
        self.zone = zone;
        self
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    fn token(&self) -> PicoCalResult<String> {
        std::env::var(&self.token_env).map_err(|_| {
            PicoCalError::PermissionDenied(format!(
                "GitHub token not found in ${}",
                self.token_env
            ))
        })
    }
}

#[async_trait]
impl GoalSignalSource for GitHubContributions {
    async fn fetch_month_flags(
        &self,
        month: CalendarMonth,
        today: NaiveDate,
    ) -> PicoCalResult<DayFlags> {
        let token = self.token()?;
        let (from, to) = query_window(self.zone, month, today);
        let body = json!({
            "query": CONTRIBUTIONS_QUERY,
            "variables": { "from": from, "to": to },
        });

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(token)
            .header("User-Agent", "picocal")
            .json(&body)
            .send()
            .await
            .map_err(|e| PicoCalError::Backend(format!("GitHub request failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| PicoCalError::Backend(format!("GitHub response unreadable: {e}")))?;

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(PicoCalError::PermissionDenied(format!(
                    "GitHub rejected the token ({status})"
                )));
            }
            s if !s.is_success() => {
                return Err(PicoCalError::Backend(format!(
                    "GitHub returned {status}: {text}"
                )));
            }
            _ => {}
        }

        let counts = parse_contribution_counts(&text)?;
        debug!(days = counts.len(), "fetched GitHub contribution days");

        Ok(flags_from_daily_totals(
            month,
            today,
            &counts,
            GoalThreshold::at_least(f64::from(self.min_contributions)),
        ))
    }
}

#[derive(Deserialize)]
struct QueryResponse {
    data: Option<ViewerData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Deserialize)]
struct ViewerData {
    viewer: Viewer,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Viewer {
    contributions_collection: ContributionsCollection,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContributionsCollection {
    contribution_calendar: ContributionCalendar,
}

#[derive(Deserialize)]
struct ContributionCalendar {
    weeks: Vec<Week>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Week {
    contribution_days: Vec<ContributionDay>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContributionDay {
    date: NaiveDate,
    contribution_count: u32,
}

/// Start of day 1 through the end of `today`, as local times carrying the zone's offset.
fn query_window(zone: Tz, month: CalendarMonth, today: NaiveDate) -> (String, String) {
    let stamp = |at: NaiveDateTime| {
        zone.from_local_datetime(&at)
            .earliest()
            .unwrap_or_else(|| zone.from_utc_datetime(&at))
            .to_rfc3339_opts(SecondsFormat::Secs, true)
    };
    let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
    (
        stamp(month.first_day().and_time(NaiveTime::MIN)),
        stamp(today.and_time(end_of_day)),
    )
}

/// Extract per-day contribution counts from a GraphQL response body.
fn parse_contribution_counts(body: &str) -> PicoCalResult<BTreeMap<NaiveDate, f64>> {
    let response: QueryResponse = serde_json::from_str(body)
        .map_err(|e| PicoCalError::Backend(format!("Failed to parse GitHub response: {e}")))?;

    let Some(data) = response.data else {
        let messages: Vec<_> = response.errors.into_iter().map(|e| e.message).collect();
        return Err(PicoCalError::Backend(format!(
            "GitHub query failed: {}",
            messages.join("; ")
        )));
    };

    Ok(data
        .viewer
        .contributions_collection
        .contribution_calendar
        .weeks
        .into_iter()
        .flat_map(|week| week.contribution_days)
        .map(|day| (day.date, f64::from(day.contribution_count)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
      "data": { "viewer": { "contributionsCollection": { "contributionCalendar": {
        "totalContributions": 5,
        "weeks": [
          { "contributionDays": [
            { "date": "2024-04-01", "contributionCount": 3 },
            { "date": "2024-04-02", "contributionCount": 0 }
          ] },
          { "contributionDays": [
            { "date": "2024-04-03", "contributionCount": 2 }
          ] }
        ]
      } } } }
    }"#;

    #[test]
    fn test_parse_contribution_counts() {
        let counts = parse_contribution_counts(SAMPLE).unwrap();
        assert_eq!(counts.len(), 3);
        let april_3 = NaiveDate::from_ymd_opt(2024, 4, 3).unwrap();
        assert_eq!(counts.get(&april_3), Some(&2.0));
    }

    #[test]
    fn test_counts_become_flags() {
        let counts = parse_contribution_counts(SAMPLE).unwrap();
        let month = CalendarMonth::from_ym(2024, 4).unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 4, 4).unwrap();
        let flags = flags_from_daily_totals(month, today, &counts, GoalThreshold::at_least(1.0));
        assert_eq!(flags.as_slice(), &[true, false, true, false]);
    }

    #[test]
    fn test_graphql_errors_are_backend_errors() {
        let body = r#"{ "data": null, "errors": [ { "message": "Bad credentials" } ] }"#;
        match parse_contribution_counts(body) {
            Err(PicoCalError::Backend(msg)) => assert!(msg.contains("Bad credentials")),
            other => panic!("Expected backend error, got {:?}", other.map(|c| c.len())),
        }
    }

    #[test]
    fn test_query_window_uses_zone_offset() {
        let month = CalendarMonth::from_ym(2024, 4).unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 4, 4).unwrap();

        let (from, to) = query_window(chrono_tz::Europe::Berlin, month, today);
        assert_eq!(from, "2024-04-01T00:00:00+02:00");
        assert_eq!(to, "2024-04-04T23:59:59+02:00");

        let (from, to) = query_window(Tz::UTC, month, today);
        assert_eq!(from, "2024-04-01T00:00:00Z");
        assert_eq!(to, "2024-04-04T23:59:59Z");

        // Auckland is ahead of UTC, so its April starts on March 31 in UTC terms
        let (from, _) = query_window(chrono_tz::Pacific::Auckland, month, today);
        assert_eq!(from, "2024-04-01T00:00:00+13:00");
    }

    #[tokio::test]
    async fn test_missing_token_is_permission_denied() {
        let source = GitHubContributions::new("PICOCAL_TEST_TOKEN_THAT_IS_NEVER_SET", 1);
        let month = CalendarMonth::from_ym(2024, 4).unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 4, 4).unwrap();
        let result = source.fetch_month_flags(month, today).await;
        assert!(matches!(result, Err(PicoCalError::PermissionDenied(_))));
    }
}
