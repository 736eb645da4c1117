use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use chrono::{FixedOffset, Utc};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::db::Database;
use crate::error::ServiceError;
use crate::race::ingest::{self, RacePayload, ResultsPayload};
use crate::race::live;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    /// Display-zone offset; drives date bucketing and current-race selection
    pub tz: FixedOffset,
}

/// Build the Axum router for the board and the scraper-facing API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/api/races", post(create_race_handler))
        .route("/api/races/upcoming", get(upcoming_handler))
        .route("/api/races/duplicates/:id", get(duplicates_handler))
        .route("/api/races/:id", get(race_details_handler))
        .route("/api/results", post(create_results_handler))
        .route("/api/live/latest", get(live_latest_handler))
        .route("/api/export/races.csv", get(export_csv_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// Serve the embedded board page.
async fn index_handler() -> impl IntoResponse {
    Html(BOARD_HTML)
}

/// GET /health
async fn health_handler() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

/// POST /api/races: one scraped race card
async fn create_race_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RacePayload>,
) -> Result<impl IntoResponse, ServiceError> {
    let race = ingest::ingest_race(&state.db, state.tz, payload)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "race": race })),
    ))
}

/// POST /api/results: one result capture batch
async fn create_results_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ResultsPayload>,
) -> Result<impl IntoResponse, ServiceError> {
    let inserted = ingest::ingest_results(&state.db, state.tz, payload)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "inserted": inserted })),
    ))
}

/// GET /api/live/latest: the full board view for "now"
async fn live_latest_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ServiceError> {
    let view = live::current_view(&state.db, Utc::now(), state.tz)?;
    Ok(Json(json!({ "success": true, "data": view })))
}

/// GET /api/races/upcoming: today's races still ahead of the clock
async fn upcoming_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ServiceError> {
    let local = Utc::now().with_timezone(&state.tz);
    let races = state.db.upcoming_races(
        local.date_naive(),
        &local.format("%H:%M").to_string(),
        live::UPCOMING_LIMIT,
    )?;
    Ok(Json(json!({ "success": true, "data": races })))
}

/// GET /api/races/duplicates/:id: all airings sharing the race's lineup,
/// newest first. An unknown id yields an empty list, not an error.
async fn duplicates_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ServiceError> {
    let races = match state.db.get_race(id)? {
        Some(race) => state.db.races_with_signature(&race.race_signature)?,
        None => Vec::new(),
    };
    Ok(Json(json!({ "success": true, "data": races })))
}

/// GET /api/races/:id: a race with its runners and prior same-lineup airings
async fn race_details_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ServiceError> {
    let race = state
        .db
        .get_race(id)?
        .ok_or_else(|| ServiceError::not_found(format!("race {} not found", id)))?;
    let runners = state.db.runners_for_race(race.id)?;
    let history = state.db.history_for_signature(&race.race_signature, race.id)?;
    Ok(Json(json!({
        "success": true,
        "data": { "race": race, "runners": runners, "history": history }
    })))
}

/// GET /api/export/races.csv: flat dump of races joined with runners and
/// finishing positions, for spreadsheet use.
async fn export_csv_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ServiceError> {
    let rows = state.db.export_rows()?;

    let mut out = String::from("race_id,uk_time,ist_time,runner_number,horse,jockey,odds,position\n");
    for row in rows {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{}\n",
            row.race_id,
            csv_field(&row.race_time_uk),
            csv_field(&row.race_time_ist),
            row.runner_number.map(|n| n.to_string()).unwrap_or_default(),
            csv_field(row.horse_name.as_deref().unwrap_or("")),
            csv_field(row.jockey_name.as_deref().unwrap_or("")),
            csv_field(row.odds.as_deref().unwrap_or("")),
            row.position.map(|p| p.to_string()).unwrap_or_default(),
        ));
    }

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"races.csv\"",
            ),
        ],
        out,
    ))
}

/// Quote a CSV field when it carries a delimiter, quote or newline
fn csv_field(value: &str) -> String {
    if value.contains(['"', ',', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Embedded single-file board (HTML + CSS + JS)
const BOARD_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Virtual Racing Board</title>
<style>
  :root {
    --bg: #0f1117;
    --card: #1a1d27;
    --border: #2a2d3a;
    --accent: #6c63ff;
    --green: #00c896;
    --amber: #ff9800;
    --text: #e0e0e0;
    --muted: #8888aa;
  }
  * { box-sizing: border-box; margin: 0; padding: 0; }
  body { background: var(--bg); color: var(--text); font-family: 'Segoe UI', system-ui, sans-serif; }
  header { display: flex; align-items: center; gap: 1rem; padding: 1rem 2rem; border-bottom: 1px solid var(--border); }
  header h1 { font-size: 1.4rem; font-weight: 700; }
  .status-dot { width: 10px; height: 10px; border-radius: 50%; background: var(--green); display: inline-block; animation: pulse 1.5s infinite; }
  @keyframes pulse { 0%,100% { opacity: 1; } 50% { opacity: .3; } }
  .badge { padding: .2rem .6rem; border-radius: 4px; font-size: .75rem; font-weight: 700; text-transform: uppercase; }
  .badge.rerun { background: var(--amber); color: #000; }
  main { padding: 1.5rem 2rem; display: grid; gap: 1.5rem; }
  .stats-grid { display: grid; grid-template-columns: repeat(auto-fill, minmax(160px, 1fr)); gap: 1rem; }
  .stat-card { background: var(--card); border: 1px solid var(--border); border-radius: 10px; padding: 1.2rem; }
  .stat-card .label { color: var(--muted); font-size: .8rem; text-transform: uppercase; letter-spacing: .06em; margin-bottom: .4rem; }
  .stat-card .value { font-size: 1.7rem; font-weight: 700; }
  .panel { background: var(--card); border: 1px solid var(--border); border-radius: 10px; overflow: hidden; }
  .panel-header { padding: .9rem 1.2rem; border-bottom: 1px solid var(--border); font-weight: 600; }
  table { width: 100%; border-collapse: collapse; }
  th { padding: .7rem 1rem; text-align: left; font-size: .75rem; text-transform: uppercase; color: var(--muted); border-bottom: 1px solid var(--border); }
  td { padding: .65rem 1rem; font-size: .88rem; border-bottom: 1px solid #1e2130; }
  tr:last-child td { border-bottom: none; }
  .two-col { display: grid; grid-template-columns: 1fr 1fr; gap: 1.5rem; }
  @media (max-width: 768px) { .two-col { grid-template-columns: 1fr; } }
  .empty { color: var(--muted); text-align: center; padding: 2rem; font-size: .9rem; }
  .pos-1 { color: var(--green); font-weight: 700; }
</style>
</head>
<body>
<header>
  <span class="status-dot"></span>
  <h1>&#127943; Virtual Racing Board</h1>
  <span class="badge rerun" id="rerun-badge" style="display:none;"></span>
  <span style="margin-left:auto;color:var(--muted);font-size:.8rem;" id="last-updated"></span>
</header>

<main>
  <div class="stats-grid">
    <div class="stat-card"><div class="label">Race (IST)</div><div class="value" id="s-ist">&ndash;</div></div>
    <div class="stat-card"><div class="label">Race (UK)</div><div class="value" id="s-uk">&ndash;</div></div>
    <div class="stat-card"><div class="label">Runners</div><div class="value" id="s-count">&ndash;</div></div>
    <div class="stat-card"><div class="label">Times Seen</div><div class="value" id="s-dupes">&ndash;</div></div>
    <div class="stat-card"><div class="label">Last Seen</div><div class="value" id="s-last-seen" style="font-size:1rem;">&ndash;</div></div>
  </div>

  <div class="two-col">
    <div class="panel">
      <div class="panel-header">Runners</div>
      <table>
        <thead><tr><th>No</th><th>Horse</th><th>Jockey</th><th>Odds</th></tr></thead>
        <tbody id="runners-tbody"><tr><td colspan="4" class="empty">Waiting for a race&hellip;</td></tr></tbody>
      </table>
    </div>

    <div class="panel">
      <div class="panel-header">Results</div>
      <table>
        <thead><tr><th>Pos</th><th>Horse No</th><th>Captured</th></tr></thead>
        <tbody id="results-tbody"><tr><td colspan="3" class="empty">No results yet</td></tr></tbody>
      </table>
    </div>
  </div>

  <div class="panel">
    <div class="panel-header">Upcoming Races</div>
    <table>
      <thead><tr><th>IST</th><th>UK</th><th>Runners</th></tr></thead>
      <tbody id="upcoming-tbody"><tr><td colspan="3" class="empty">Nothing scheduled</td></tr></tbody>
    </table>
  </div>
</main>

<script>
const esc = s => String(s ?? '').replace(/[&<>"]/g, c => ({'&':'&amp;','<':'&lt;','>':'&gt;','"':'&quot;'}[c]));
const timeAgo = ts => {
  const d = (Date.now() - new Date(ts).getTime()) / 1000;
  if (d < 60) return Math.round(d)+'s ago';
  if (d < 3600) return Math.round(d/60)+'m ago';
  return new Date(ts).toLocaleTimeString();
};

async function loadBoard() {
  const r = await fetch('/api/live/latest');
  if (!r.ok) return;
  const view = (await r.json()).data;
  const race = view.current_race;

  document.getElementById('s-ist').textContent = race ? race.race_time_ist : '–';
  document.getElementById('s-uk').textContent = race ? race.race_time_uk : '–';
  document.getElementById('s-count').textContent = race ? race.runner_count : '–';
  document.getElementById('s-dupes').textContent = race ? view.duplicate_count : '–';
  document.getElementById('s-last-seen').textContent = view.last_seen ? timeAgo(view.last_seen) : '–';

  const badge = document.getElementById('rerun-badge');
  if (race && view.duplicate_count > 1) {
    badge.textContent = 'Re-run ×' + view.duplicate_count;
    badge.style.display = '';
  } else {
    badge.style.display = 'none';
  }

  const runners = document.getElementById('runners-tbody');
  runners.innerHTML = view.runners.length
    ? view.runners.map(r => `<tr>
        <td>${r.runner_number}</td>
        <td>${esc(r.horse_name)}</td>
        <td>${esc(r.jockey_name || '–')}</td>
        <td>${esc(r.odds || '–')}</td>
      </tr>`).join('')
    : '<tr><td colspan="4" class="empty">Waiting for a race&hellip;</td></tr>';

  const results = document.getElementById('results-tbody');
  results.innerHTML = view.results.length
    ? view.results.map(res => `<tr>
        <td class="${res.position === 1 ? 'pos-1' : ''}">${res.position}</td>
        <td>${res.horse_number ?? '?'}</td>
        <td>${esc(res.raw_text || '')}</td>
      </tr>`).join('')
    : '<tr><td colspan="3" class="empty">No results yet</td></tr>';

  const upcoming = document.getElementById('upcoming-tbody');
  upcoming.innerHTML = view.upcoming.length
    ? view.upcoming.map(u => `<tr>
        <td>${u.race_time_ist}</td>
        <td>${u.race_time_uk}</td>
        <td>${u.runner_count}</td>
      </tr>`).join('')
    : '<tr><td colspan="3" class="empty">Nothing scheduled</td></tr>';

  document.getElementById('last-updated').textContent = 'Updated ' + new Date().toLocaleTimeString();
}

// The board is a poller; the backend does no pushing.
loadBoard();
setInterval(loadBoard, 5000);
</script>
</body>
</html>"#;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Router {
        router(AppState {
            db: Database::open_in_memory().unwrap(),
            tz: FixedOffset::east_opt(0).unwrap(),
        })
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(resp: axum::response::Response) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// A race card scheduled at midnight: always at-or-before "now", so the
    /// live view is deterministic regardless of when the test runs.
    fn midnight_card(uk: &str) -> Value {
        json!({
            "race_time": "00:00",
            "race_time_uk": uk,
            "runner_count": 2,
            "runners": [
                { "number": 1, "name": "Fast Nag", "jockey": "J Smith" },
                { "number": 2, "name": "Slow Coach", "jockey": "P O'Brien" }
            ]
        })
    }

    #[tokio::test]
    async fn test_index_and_health() {
        let app = app();
        let resp = app.clone().oneshot(get("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8_lossy(&body).contains("Virtual Racing Board"));

        let resp = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_post_race_and_live_view() {
        let app = app();

        let resp = app
            .clone()
            .oneshot(post_json("/api/races", midnight_card("20:02")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = json_body(resp).await;
        assert_eq!(body["success"], json!(true));
        assert!(body["race"]["id"].as_i64().is_some());

        let resp = app.oneshot(get("/api/live/latest")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        let data = &body["data"];
        assert_eq!(data["current_race"]["race_time_uk"], json!("20:02"));
        assert_eq!(data["runners"].as_array().unwrap().len(), 2);
        assert_eq!(data["duplicate_count"], json!(1));
        assert_eq!(data["last_seen"], Value::Null);
    }

    #[tokio::test]
    async fn test_post_race_validation_failure() {
        let app = app();
        let resp = app
            .oneshot(post_json(
                "/api/races",
                json!({ "race_time": "20:02", "race_time_uk": "20:02", "runner_count": 2, "runners": [] }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = json_body(resp).await;
        assert_eq!(body["success"], json!(false));
    }

    #[tokio::test]
    async fn test_duplicates_endpoint() {
        let app = app();
        app.clone()
            .oneshot(post_json("/api/races", midnight_card("20:02")))
            .await
            .unwrap();
        let resp = app
            .clone()
            .oneshot(post_json("/api/races", midnight_card("20:17")))
            .await
            .unwrap();
        let id = json_body(resp).await["race"]["id"].as_i64().unwrap();

        let resp = app
            .clone()
            .oneshot(get(&format!("/api/races/duplicates/{}", id)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 2);

        // Unknown id: empty is valid, not an error.
        let resp = app
            .oneshot(get("/api/races/duplicates/9999"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_race_details_and_not_found() {
        let app = app();
        let resp = app
            .clone()
            .oneshot(post_json("/api/races", midnight_card("20:02")))
            .await
            .unwrap();
        let id = json_body(resp).await["race"]["id"].as_i64().unwrap();

        let resp = app
            .clone()
            .oneshot(get(&format!("/api/races/{}", id)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["data"]["runners"].as_array().unwrap().len(), 2);
        assert_eq!(body["data"]["history"].as_array().unwrap().len(), 0);

        let resp = app.oneshot(get("/api/races/9999")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_post_results_unknown_race_is_noop() {
        let app = app();
        let resp = app
            .oneshot(post_json(
                "/api/results",
                json!({
                    "race_time_capture": "20:05",
                    "video_race_time_uk": "20:02",
                    "results": [{ "position": 1, "horse_number": 1 }]
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = json_body(resp).await;
        assert_eq!(body["inserted"], json!(0));
    }

    #[tokio::test]
    async fn test_post_results_attach_and_surface() {
        let app = app();
        app.clone()
            .oneshot(post_json("/api/races", midnight_card("20:02")))
            .await
            .unwrap();

        let resp = app
            .clone()
            .oneshot(post_json(
                "/api/results",
                json!({
                    "race_time_capture": "20:05",
                    "video_race_time_uk": "20:02",
                    "results": [
                        { "position": 1, "horse_number": 2, "raw_text": "2 Slow Coach" },
                        { "position": 2, "horse_number": 1 }
                    ]
                }),
            ))
            .await
            .unwrap();
        assert_eq!(json_body(resp).await["inserted"], json!(2));

        let resp = app.oneshot(get("/api/live/latest")).await.unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["data"]["results"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_export_csv() {
        let app = app();
        app.clone()
            .oneshot(post_json("/api/races", midnight_card("20:02")))
            .await
            .unwrap();

        let resp = app.oneshot(get("/api/export/races.csv")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/csv"));
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.starts_with("race_id,uk_time,ist_time,"));
        assert!(text.contains("Fast Nag"));
    }

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
