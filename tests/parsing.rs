use std::fs;
use std::path::PathBuf;

use serde_json::Value;

use smurf_radar::error::ApiError;
use smurf_radar::legacy_api::{
    five_v_five_rows, history_from_rows, profile_from_payload, stats_from_rows, unwrap_envelope,
};
use smurf_radar::model::MatchResult;
use smurf_radar::open_api::{parse_player_json, parse_stats_json, stats_from_lifetime};
use smurf_radar::smurf_score::{ScoringConfig, score};

fn read_fixture(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    fs::read_to_string(path).expect("fixture file should be readable")
}

fn json_fixture(name: &str) -> Value {
    serde_json::from_str(&read_fixture(name)).expect("fixture should be valid json")
}

#[test]
fn parses_open_player_fixture() {
    let raw = read_fixture("open_player.json");
    let profile = parse_player_json(&raw, "cs2")
        .expect("fixture should parse")
        .expect("fixture has a player id");
    assert_eq!(profile.player_id, "5f1c9a2e-3b7d-4c61-8e0f-2a9b7c6d5e41");
    assert_eq!(profile.nickname, "fresh_acc");
    assert_eq!(profile.skill_level, Some(3));
    assert_eq!(profile.elo, Some(911));
    assert_eq!(profile.country.as_deref(), Some("de"));
}

#[test]
fn parses_open_stats_fixture() {
    let raw = read_fixture("open_stats.json");
    let lifetime = parse_stats_json(&raw)
        .expect("fixture should parse")
        .expect("fixture has a lifetime block");
    let stats = stats_from_lifetime(&lifetime);
    assert_eq!(stats.matches_played, 24);
    assert_eq!(stats.win_rate_percent, 71);
    assert_eq!(stats.avg_kills, 24);
    assert_eq!(stats.avg_kd_ratio, 1.92);
    assert_eq!(stats.avg_kr_ratio, 1.21);
    assert_eq!(stats.avg_headshot_percent, 52);
    assert_eq!(stats.avg_adr, 99);
}

#[test]
fn open_fixture_scores_as_smurf() {
    let profile = parse_player_json(&read_fixture("open_player.json"), "cs2")
        .unwrap()
        .unwrap();
    let lifetime = parse_stats_json(&read_fixture("open_stats.json"))
        .unwrap()
        .unwrap();
    let stats = stats_from_lifetime(&lifetime);

    let assessment = score(&profile, &stats, &ScoringConfig::default()).expect("should be flagged");
    assert_eq!(assessment.nickname, "fresh_acc");
    assert_eq!(assessment.confidence_percent, 100);
    assert_eq!(assessment.elo, Some(911));
    assert_eq!(
        assessment.reasons,
        vec![
            "Very low match count: 24",
            "High K/D ratio: 1.92",
            "Above average K/R ratio: 1.21",
            "High win rate: 71%",
            "Very low level: 3",
            "Classic smurf pattern: high stats with low matches",
        ]
    );
}

#[test]
fn parses_legacy_user_envelope() {
    let payload = unwrap_envelope(&read_fixture("legacy_user.json"))
        .expect("envelope is ok")
        .expect("envelope has payload");
    let profile = profile_from_payload(&payload, "cs2").expect("payload has an id");
    assert_eq!(profile.player_id, "a1b2c3d4-0000-4000-8000-00000000beef");
    assert_eq!(profile.nickname, "fresh_acc");
    assert_eq!(profile.skill_level, Some(4));
    assert_eq!(profile.elo, Some(1050));
}

#[test]
fn legacy_error_envelope_is_an_error() {
    let err = unwrap_envelope(&read_fixture("envelope_error.json")).unwrap_err();
    assert_eq!(
        err,
        ApiError::Envelope {
            code: "error".to_string()
        }
    );
}

#[test]
fn legacy_rows_keep_only_five_v_five() {
    let rows = json_fixture("legacy_rows.json");
    let kept = five_v_five_rows(&rows);
    assert_eq!(kept.len(), 3);
    assert!(kept.iter().all(|r| r["gameMode"] == "5v5"));
}

#[test]
fn parses_legacy_stats_fixture() {
    let totals = unwrap_envelope(&read_fixture("legacy_totals.json"))
        .unwrap()
        .unwrap();
    let rows = five_v_five_rows(&json_fixture("legacy_rows.json"));
    let stats = stats_from_rows(&totals, &rows).expect("three rows are enough");
    assert_eq!(stats.matches_played, 18);
    assert_eq!(stats.win_rate_percent, 67);
    assert_eq!(stats.avg_kills, 22);
    assert_eq!(stats.avg_kd_ratio, 1.67);
    assert_eq!(stats.avg_kr_ratio, 1.1);
    assert_eq!(stats.avg_headshot_percent, 45);
    assert_eq!(stats.avg_adr, 92);
}

#[test]
fn parses_legacy_history_fixture() {
    let now_ms = 1_700_100_000_000;
    let rows = json_fixture("legacy_rows.json");
    let history = history_from_rows(&rows, now_ms).expect("rows are a list");
    assert_eq!(history.len(), 4);

    assert_eq!(history[0].match_id, "1700000000000-5v5-aaa");
    assert_eq!(history[0].timestamp_ms, 1_700_000_000_000);
    assert_eq!(history[0].result, MatchResult::Win);
    assert_eq!(history[0].map.as_deref(), Some("de_mirage"));

    let estimated = now_ms - 2 * 2 * 24 * 60 * 60 * 1000;
    assert_eq!(history[2].timestamp_ms, estimated);
    assert_eq!(history[2].match_id, format!("estimated-{estimated}-2"));
    assert_eq!(history[2].result, MatchResult::Loss);
}
