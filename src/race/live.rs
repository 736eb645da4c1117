//! Live-race selection: which race is "now showing", plus everything the
//! board renders around it.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::{Race, RaceResult, Runner};
use crate::db::Database;
use crate::error::ServiceError;

/// Upcoming races shown under the board
pub const UPCOMING_LIMIT: i64 = 10;

/// Everything the board needs for one refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveView {
    pub current_race: Option<Race>,
    pub runners: Vec<Runner>,
    pub results: Vec<RaceResult>,
    /// Persisted races sharing the current race's signature, itself included
    pub duplicate_count: i64,
    /// When this lineup last aired before the current capture, if ever
    pub last_seen: Option<DateTime<Utc>>,
    pub upcoming: Vec<Race>,
}

impl LiveView {
    fn empty() -> Self {
        LiveView {
            current_race: None,
            runners: Vec::new(),
            results: Vec::new(),
            duplicate_count: 0,
            last_seen: None,
            upcoming: Vec::new(),
        }
    }
}

/// Select the current race for `now` and assemble the full board view.
///
/// Selection rule: among today's races (on the display-zone calendar) whose
/// schedule time is at or before `now`, the latest-scheduled one is current.
/// Before the day's first race the view is empty rather than an error. This
/// is the single selection rule; there are no secondary clock windows.
pub fn current_view(
    db: &Database,
    now: DateTime<Utc>,
    tz: FixedOffset,
) -> Result<LiveView, ServiceError> {
    let local = now.with_timezone(&tz);
    let today = local.date_naive();
    let clock = local.format("%H:%M").to_string();

    let Some(race) = db.current_race(today, &clock)? else {
        return Ok(LiveView::empty());
    };

    let runners = db.runners_for_race(race.id)?;
    let results = db.results_for_race(race.id)?;
    let duplicate_count = db.count_signature(&race.race_signature)?;
    let last_seen = db.last_seen_before(&race.race_signature, race.scraped_at)?;
    let upcoming = db.upcoming_races(today, &race.race_time_ist, UPCOMING_LIMIT)?;

    Ok(LiveView {
        current_race: Some(race),
        runners,
        results,
        duplicate_count,
        last_seen,
        upcoming,
    })
}
