use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One scraped snapshot of a race card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Race {
    pub id: i64,
    /// Scheduled time-of-day on the display clock ("HH:MM")
    pub race_time_ist: String,
    /// Broadcast clock ("HH:MM"); the key result captures arrive under
    pub race_time_uk: String,
    pub runner_count: i64,
    pub scraped_at: DateTime<Utc>,
    /// Capture calendar date in the display zone; scopes "today's" races
    pub scraped_date: NaiveDate,
    /// Lineup fingerprint used to recognize re-airings
    pub race_signature: String,
}

/// One entrant in a race's lineup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runner {
    pub id: i64,
    pub race_id: i64,
    pub runner_number: i64,
    pub horse_name: String,
    pub jockey_name: Option<String>,
    /// Free-text odds as captured ("5/2", "EVS")
    pub odds: Option<String>,
}

/// One finishing-position record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceResult {
    pub id: i64,
    pub race_id: i64,
    pub position: i64,
    pub horse_number: Option<i64>,
    /// Unparsed captured text; fallback display value when the number is unreadable
    pub raw_text: Option<String>,
    pub race_time_capture: Option<String>,
    pub video_race_time_uk: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

/// A prior airing of the same lineup, with its winner when results are known
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub race_time_uk: String,
    pub scraped_at: DateTime<Utc>,
    pub winner: Option<String>,
}

/// Validated race fields ready for the upsert
#[derive(Debug, Clone)]
pub struct NewRace {
    pub race_time_ist: String,
    pub race_time_uk: String,
    pub runner_count: i64,
    pub scraped_at: DateTime<Utc>,
    pub scraped_date: NaiveDate,
    pub race_signature: String,
}

/// Validated runner fields ready for insertion
#[derive(Debug, Clone)]
pub struct NewRunner {
    pub runner_number: i64,
    pub horse_name: String,
    pub jockey_name: Option<String>,
    pub odds: Option<String>,
}

/// Validated result fields ready for insertion
#[derive(Debug, Clone)]
pub struct NewResult {
    pub position: i64,
    pub horse_number: Option<i64>,
    pub raw_text: Option<String>,
}
