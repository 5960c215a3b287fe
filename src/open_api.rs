//! Parsers for the data/v4 "open" API: a flat player object and a `lifetime` dictionary keyed by
//! human-readable labels.

use anyhow::{Context, Result};
use serde_json::Value;

use crate::elo::skill_level_for_elo;
use crate::model::{PlayerProfile, PlayerStats};
use crate::values::{pick, pick_f64, pick_string, round2, round_u32};

const MATCHES: &[&str] = &["Matches", "Total Matches"];
const KD: &[&str] = &["Average K/D Ratio", "K/D Ratio"];
const KR: &[&str] = &["Average K/R Ratio"];
const WIN_RATE: &[&str] = &["Win Rate %"];
const KILLS: &[&str] = &["Average Kills"];
const HEADSHOTS: &[&str] = &["Average Headshots %"];
const ADR: &[&str] = &["Average ADR", "ADR", "Average Damage", "Damage"];
const TOTAL_KILLS: &[&str] = &["Total Kills"];
const TOTAL_DEATHS: &[&str] = &["Total Deaths"];

/// `None` when the payload does not identify a player (no `player_id`).
pub fn parse_player_json(raw: &str, game: &str) -> Result<Option<PlayerProfile>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(None);
    }
    let root: Value = serde_json::from_str(trimmed).context("invalid open api player json")?;
    Ok(profile_from_value(&root, game))
}

pub fn profile_from_value(root: &Value, game: &str) -> Option<PlayerProfile> {
    let player_id = pick_string(root, &["player_id"])?;
    let game_entry = root.get("games").and_then(|g| g.get(game));
    let elo = game_entry
        .and_then(|g| pick_f64(g, &["faceit_elo"]))
        .map(round_u32);
    let skill_level = pick_f64(root, &["skill_level"])
        .or_else(|| game_entry.and_then(|g| pick_f64(g, &["skill_level"])))
        .map(round_u32)
        .filter(|lvl| *lvl > 0)
        .or_else(|| elo.and_then(|e| skill_level_for_elo(game, e)));

    Some(PlayerProfile {
        nickname: pick_string(root, &["nickname"]).unwrap_or_default(),
        player_id,
        skill_level,
        country: pick_string(root, &["country"]),
        elo,
    })
}

/// `None` when the payload has no `lifetime` block.
pub fn parse_stats_json(raw: &str) -> Result<Option<Value>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(None);
    }
    let root: Value = serde_json::from_str(trimmed).context("invalid open api stats json")?;
    Ok(pick(&root, &["lifetime"]).filter(|v| v.is_object()).cloned())
}

pub fn stats_from_lifetime(lifetime: &Value) -> PlayerStats {
    let kd = pick_f64(lifetime, KD).unwrap_or_else(|| {
        let kills = pick_f64(lifetime, TOTAL_KILLS).unwrap_or(0.0);
        let deaths = pick_f64(lifetime, TOTAL_DEATHS).unwrap_or(0.0);
        if deaths > 0.0 {
            round2(kills / deaths)
        } else {
            0.0
        }
    });
    let kr = pick_f64(lifetime, KR).filter(|v| *v > 0.0).unwrap_or(kd);

    PlayerStats {
        matches_played: pick_f64(lifetime, MATCHES).map(round_u32).unwrap_or(0),
        win_rate_percent: pick_f64(lifetime, WIN_RATE).map(round_u32).unwrap_or(0),
        avg_kills: pick_f64(lifetime, KILLS).map(round_u32).unwrap_or(0),
        avg_kd_ratio: kd,
        avg_kr_ratio: kr,
        avg_headshot_percent: pick_f64(lifetime, HEADSHOTS).map(round_u32).unwrap_or(0),
        avg_adr: pick_f64(lifetime, ADR).map(round_u32).unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn lifetime_labels_map_onto_stats() {
        let lifetime = json!({
            "Matches": "142",
            "Average K/D Ratio": "1.31",
            "Average K/R Ratio": "0.84",
            "Win Rate %": "56",
            "Average Kills": "18.6",
            "Average Headshots %": "47.4",
            "ADR": "81.2"
        });
        let stats = stats_from_lifetime(&lifetime);
        assert_eq!(stats.matches_played, 142);
        assert_eq!(stats.avg_kd_ratio, 1.31);
        assert_eq!(stats.avg_kr_ratio, 0.84);
        assert_eq!(stats.win_rate_percent, 56);
        assert_eq!(stats.avg_kills, 19);
        assert_eq!(stats.avg_headshot_percent, 47);
        assert_eq!(stats.avg_adr, 81);
    }

    #[test]
    fn kd_falls_back_to_totals_and_kr_to_kd() {
        let lifetime = json!({
            "Total Matches": "10",
            "Total Kills": "250",
            "Total Deaths": "200"
        });
        let stats = stats_from_lifetime(&lifetime);
        assert_eq!(stats.matches_played, 10);
        assert_eq!(stats.avg_kd_ratio, 1.25);
        assert_eq!(stats.avg_kr_ratio, 1.25);
        assert_eq!(stats.avg_adr, 0);
    }

    #[test]
    fn empty_lifetime_defaults_to_zero() {
        assert_eq!(stats_from_lifetime(&json!({})), PlayerStats::default());
    }

    #[test]
    fn player_without_id_is_a_miss() {
        assert_eq!(parse_player_json(r#"{"nickname":"ghost"}"#, "cs2").unwrap(), None);
        assert_eq!(parse_player_json("null", "cs2").unwrap(), None);
    }

    #[test]
    fn level_derived_from_elo_when_missing() {
        let raw = r#"{"player_id":"p","nickname":"n","games":{"cs2":{"faceit_elo":820}}}"#;
        let profile = parse_player_json(raw, "cs2").unwrap().unwrap();
        assert_eq!(profile.elo, Some(820));
        assert_eq!(profile.skill_level, Some(3));
    }
}
