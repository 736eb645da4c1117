//! Ingest paths for the two scraper feeds: race cards and result captures.
//!
//! Payloads are loosely typed on the wire (the scraper emits numbers and
//! numeric strings interchangeably), so the numeric fields come in as raw
//! JSON values and are coerced here. Validation is fail-fast for the fields
//! that identify a race; individual runners are filtered silently.

use chrono::{DateTime, FixedOffset, NaiveDateTime, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::db::models::{NewRace, NewResult, NewRunner, Race};
use crate::db::Database;
use crate::error::ServiceError;
use crate::signature::compute_signature;

/// Race card payload as posted by the card scraper
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RacePayload {
    /// Schedule time on the display clock ("HH:MM")
    #[serde(default)]
    pub race_time: Option<String>,
    /// Broadcast clock ("HH:MM")
    #[serde(default)]
    pub race_time_uk: Option<String>,
    #[serde(default)]
    pub runner_count: Option<Value>,
    #[serde(default)]
    pub scraped_at: Option<String>,
    #[serde(default)]
    pub runners: Vec<RunnerPayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunnerPayload {
    #[serde(default)]
    pub number: Option<Value>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub jockey: Option<String>,
    #[serde(default)]
    pub odds: Option<String>,
}

/// Result batch payload as posted by the video-capture scraper
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultsPayload {
    /// Clock shown on the capture itself
    #[serde(default)]
    pub race_time_capture: Option<String>,
    /// Broadcast time read off the video; the lookup key into races
    #[serde(default)]
    pub video_race_time_uk: Option<String>,
    #[serde(default)]
    pub results: Vec<ResultEntryPayload>,
    #[serde(default)]
    pub scraped_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultEntryPayload {
    #[serde(default)]
    pub position: Option<Value>,
    #[serde(default)]
    pub horse_number: Option<Value>,
    #[serde(default)]
    pub raw_text: Option<String>,
}

/// Validate a race card and upsert it with its runners in one transaction.
///
/// The race is keyed by (race_time_uk, scraped_date); re-scraping the same
/// broadcast slot on the same day overwrites the mutable fields and replaces
/// the runner set. Returns the persisted row including its signature.
pub fn ingest_race(
    db: &Database,
    tz: FixedOffset,
    payload: RacePayload,
) -> Result<Race, ServiceError> {
    let race_time = required_clock(payload.race_time.as_deref(), "race_time")?;
    let race_time_uk = required_clock(payload.race_time_uk.as_deref(), "race_time_uk")?;

    let runner_count = numeric(payload.runner_count.as_ref())
        .filter(|n| n.is_finite() && *n > 0.0)
        .ok_or_else(|| ServiceError::validation("runner_count must be a positive number"))?;

    if payload.runners.is_empty() {
        return Err(ServiceError::validation("runners array missing or empty"));
    }

    let scraped_at = parse_scraped_at(payload.scraped_at.as_deref(), tz)?;
    let scraped_date = scraped_at.with_timezone(&tz).date_naive();

    // Signature over the pre-filter lineup: a runner dropped for a bad cloth
    // number still identifies the race.
    let race_signature = compute_signature(payload.runners.iter().map(|r| {
        (
            r.name.as_deref().unwrap_or(""),
            r.jockey.as_deref().unwrap_or(""),
        )
    }));

    let runners: Vec<NewRunner> = payload.runners.iter().filter_map(to_new_runner).collect();

    let race = db.upsert_race_with_runners(
        &NewRace {
            race_time_ist: race_time,
            race_time_uk,
            runner_count: runner_count as i64,
            scraped_at,
            scraped_date,
            race_signature,
        },
        &runners,
    )?;

    info!(
        "Race {} ingested: uk {} on {} ({} runners kept)",
        race.id,
        race.race_time_uk,
        race.scraped_date,
        runners.len()
    );
    Ok(race)
}

/// Attach a capture batch to the most recently scraped race carrying the
/// captured broadcast time. The race id is resolved here, once; readers never
/// re-match by clock. An unknown broadcast time is a soft no-op because the
/// capture scraper can run ahead of card ingestion.
pub fn ingest_results(
    db: &Database,
    tz: FixedOffset,
    payload: ResultsPayload,
) -> Result<usize, ServiceError> {
    let mut entries = Vec::with_capacity(payload.results.len());
    for entry in &payload.results {
        let position = numeric(entry.position.as_ref())
            .filter(|p| p.is_finite() && *p >= 1.0)
            .ok_or_else(|| ServiceError::validation("every result needs a numeric position"))?;
        entries.push(NewResult {
            position: position as i64,
            horse_number: numeric(entry.horse_number.as_ref()).map(|n| n as i64),
            raw_text: entry
                .raw_text
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from),
        });
    }

    let scraped_at = parse_scraped_at(payload.scraped_at.as_deref(), tz)?;

    let raw_uk = payload
        .video_race_time_uk
        .as_deref()
        .map(str::trim)
        .unwrap_or("");
    let uk_time = normalize_clock(raw_uk).unwrap_or_else(|| raw_uk.to_string());

    let Some(race) = db.latest_race_by_uk_time(&uk_time)? else {
        debug!(
            "No race matches broadcast time {:?}; dropped {} result rows",
            uk_time,
            entries.len()
        );
        return Ok(0);
    };

    let inserted = db.insert_results(
        race.id,
        &entries,
        payload
            .race_time_capture
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty()),
        Some(&uk_time),
        scraped_at,
    )?;

    info!("{} result rows attached to race {}", inserted, race.id);
    Ok(inserted)
}

/// Coerce a JSON number or numeric string (the scraper emits both)
fn numeric(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse and zero-pad a clock string to "HH:MM" so schedule comparison and
/// the broadcast-time lookup stay plain string operations
fn normalize_clock(raw: &str) -> Option<String> {
    let s = raw.trim();
    let t = NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()?;
    Some(t.format("%H:%M").to_string())
}

fn required_clock(raw: Option<&str>, field: &str) -> Result<String, ServiceError> {
    let raw = raw.map(str::trim).unwrap_or("");
    if raw.is_empty() {
        return Err(ServiceError::Validation(format!("{} is required", field)));
    }
    normalize_clock(raw).ok_or_else(|| {
        ServiceError::Validation(format!("{} must be an HH:MM clock value", field))
    })
}

/// Accept RFC 3339 or the scraper's naive "YYYY-MM-DD HH:MM:SS" stamps;
/// naive stamps are read on the configured display clock. Absent means now.
fn parse_scraped_at(
    raw: Option<&str>,
    tz: FixedOffset,
) -> Result<DateTime<Utc>, ServiceError> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(Utc::now());
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .and_then(|naive| naive.and_local_timezone(tz).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| ServiceError::validation("scraped_at is not a valid timestamp"))
}

fn to_new_runner(r: &RunnerPayload) -> Option<NewRunner> {
    let number = numeric(r.number.as_ref()).filter(|n| *n >= 1.0)? as i64;
    let name = r.name.as_deref().map(str::trim).unwrap_or("");
    if name.is_empty() {
        return None;
    }
    Some(NewRunner {
        runner_number: number,
        horse_name: name.to_string(),
        jockey_name: r
            .jockey
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from),
        odds: r
            .odds
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from),
    })
}
