//! Parsers for the www.faceit.com internal API: `{result|code, payload}` envelopes, camelCase keys
//! and per-match stat rows with terse column codes (`i6` kills, `i7` deaths, `c2` K/D, ...).

use chrono::DateTime;
use serde_json::Value;

use crate::elo::skill_level_for_elo;
use crate::error::{ApiError, ApiResult};
use crate::model::{MatchHistoryEntry, MatchResult, PlayerProfile, PlayerStats};
use crate::values::{as_f64, as_string, pick, pick_f64, pick_string, round2, round_u32};

const DAMAGE_FIELDS: &[&str] = &["damage", "dmg", "adr", "i8", "i9", "c5", "c6", "c7", "c8", "c9"];
const TIMESTAMP_FIELDS: &[&str] = &["date", "createdAt", "matchDate"];
const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const MIN_EPOCH_MS_IN_ID: i64 = 1_000_000_000_000;

/// Returns the payload (or the whole body when there is none). A non-OK `result` or `code` is an
/// error; an empty or `null` body is `None`.
pub fn unwrap_envelope(raw: &str) -> ApiResult<Option<Value>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(None);
    }
    let data: Value =
        serde_json::from_str(trimmed).map_err(|err| ApiError::Malformed(err.to_string()))?;

    if let Some(result) = data.get("result").and_then(Value::as_str)
        && !result.is_empty()
        && !result.eq_ignore_ascii_case("OK")
    {
        return Err(ApiError::Envelope {
            code: result.to_string(),
        });
    }
    if let Some(code) = data.get("code").and_then(Value::as_str)
        && !code.is_empty()
        && !code.eq_ignore_ascii_case("OPERATION-OK")
    {
        return Err(ApiError::Envelope {
            code: code.to_string(),
        });
    }

    match data.get("payload") {
        Some(payload) if !payload.is_null() => Ok(Some(payload.clone())),
        _ => Ok(Some(data)),
    }
}

pub fn profile_from_payload(payload: &Value, game: &str) -> Option<PlayerProfile> {
    let player_id = pick_string(payload, &["user_id", "id", "guid"])?;
    let game_entry = payload.get("games").and_then(|g| g.get(game));
    let elo = game_entry
        .and_then(|g| pick_f64(g, &["faceit_elo"]))
        .map(round_u32);
    let skill_level = game_entry
        .and_then(|g| pick_f64(g, &["skill_level"]))
        .or_else(|| pick_f64(payload, &["skill_level", "level"]))
        .map(round_u32)
        .filter(|lvl| *lvl > 0)
        .or_else(|| elo.and_then(|e| skill_level_for_elo(game, e)));

    Some(PlayerProfile {
        player_id,
        nickname: pick_string(payload, &["nickname"]).unwrap_or_default(),
        skill_level,
        country: pick_string(payload, &["country"]),
        elo,
    })
}

/// Rows from the time-series endpoint that were played in a 5v5 mode.
pub fn five_v_five_rows(rows: &Value) -> Vec<Value> {
    rows.as_array()
        .map(|items| {
            items
                .iter()
                .filter(|row| {
                    pick(row, &["game_mode"])
                        .and_then(Value::as_str)
                        .is_some_and(|mode| mode.contains("5v5"))
                })
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

/// Combines lifetime totals with recent 5v5 rows. `None` when totals are empty or there is at most
/// one usable row.
pub fn stats_from_rows(totals: &Value, rows: &[Value]) -> Option<PlayerStats> {
    if !totals.as_object().is_some_and(|o| !o.is_empty()) {
        return None;
    }
    if rows.len() <= 1 {
        return None;
    }

    let total_matches = totals
        .get("lifetime")
        .and_then(|l| pick_f64(l, &["m1"]))
        .map(round_u32)
        .unwrap_or(0);
    let n = rows.len() as f64;

    let wins = rows
        .iter()
        .filter(|row| {
            pick(row, &["result", "i10"])
                .and_then(as_string)
                .is_some_and(|r| MatchResult::from_flag(&r) == MatchResult::Win)
        })
        .count();
    let win_rate = round_u32(wins as f64 / n * 100.0);

    let column_sum =
        |key: &str| -> f64 { rows.iter().filter_map(|r| r.get(key).and_then(as_f64)).sum() };
    let total_kills = column_sum("i6");
    let total_deaths = column_sum("i7");
    let total_headshots = column_sum("c4");

    let positive_mean = |key: &str| -> Option<f64> {
        let values: Vec<f64> = rows
            .iter()
            .filter_map(|r| r.get(key).and_then(as_f64))
            .filter(|v| *v > 0.0)
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(round2(values.iter().sum::<f64>() / values.len() as f64))
        }
    };

    let kd = positive_mean("c2").unwrap_or_else(|| {
        if total_deaths > 0.0 {
            round2(total_kills / total_deaths)
        } else {
            0.0
        }
    });
    let kr = positive_mean("c3").unwrap_or(kd);

    let damages: Vec<f64> = rows
        .iter()
        .filter_map(|r| {
            DAMAGE_FIELDS
                .iter()
                .find_map(|field| r.get(*field).and_then(as_f64))
        })
        .collect();
    let adr = if damages.is_empty() {
        0
    } else {
        round_u32(damages.iter().sum::<f64>() / damages.len() as f64)
    };

    Some(PlayerStats {
        matches_played: total_matches,
        win_rate_percent: win_rate,
        avg_kills: round_u32(total_kills / n),
        avg_kd_ratio: kd,
        avg_kr_ratio: kr,
        avg_headshot_percent: round_u32(total_headshots / n),
        avg_adr: adr,
    })
}

/// Rows are newest first. A row without any usable timestamp is placed two days per index back
/// from `now_ms`.
pub fn history_from_rows(rows: &Value, now_ms: i64) -> Option<Vec<MatchHistoryEntry>> {
    let items = rows.as_array()?;
    let entries = items
        .iter()
        .enumerate()
        .map(|(index, row)| {
            let match_id = pick_string(row, &["match_id"]);
            let timestamp_ms = row_timestamp_ms(row, match_id.as_deref())
                .unwrap_or_else(|| now_ms - index as i64 * 2 * DAY_MS);
            let result = pick(row, &["result", "i10"])
                .and_then(as_string)
                .map(|r| MatchResult::from_flag(&r))
                .unwrap_or(MatchResult::Loss);
            MatchHistoryEntry {
                match_id: match_id.unwrap_or_else(|| format!("estimated-{timestamp_ms}-{index}")),
                timestamp_ms,
                result,
                map: pick_string(row, &["map", "i1"]),
            }
        })
        .collect();
    Some(entries)
}

fn row_timestamp_ms(row: &Value, match_id: Option<&str>) -> Option<i64> {
    if let Some(ts) = row.get("timestamp").and_then(as_f64) {
        return Some(ts as i64);
    }
    for field in TIMESTAMP_FIELDS {
        if let Some(v) = row.get(*field).filter(|v| !v.is_null()) {
            if let Some(ms) = parse_date_ms(v) {
                return Some(ms);
            }
        }
    }
    let prefix = match_id?.split('-').next()?;
    prefix
        .parse::<i64>()
        .ok()
        .filter(|ts| *ts > MIN_EPOCH_MS_IN_ID)
}

fn parse_date_ms(v: &Value) -> Option<i64> {
    if let Some(n) = v.as_f64() {
        return Some(n as i64);
    }
    let s = v.as_str()?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    s.parse::<i64>().ok()
}
