use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub player_id: String,
    pub nickname: String,
    #[serde(default)]
    pub skill_level: Option<u32>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub elo: Option<u32>,
}

/// Lifetime numbers normalised from either upstream shape. Missing fields are 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub matches_played: u32,
    pub win_rate_percent: u32,
    pub avg_kills: u32,
    pub avg_kd_ratio: f64,
    pub avg_kr_ratio: f64,
    pub avg_headshot_percent: u32,
    pub avg_adr: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchResult {
    Win,
    Loss,
    Unknown,
}

impl MatchResult {
    pub fn from_flag(raw: &str) -> Self {
        match raw.trim() {
            "1" => MatchResult::Win,
            "0" => MatchResult::Loss,
            _ => MatchResult::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchHistoryEntry {
    pub match_id: String,
    pub timestamp_ms: i64,
    pub result: MatchResult,
    #[serde(default)]
    pub map: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerBundle {
    pub profile: PlayerProfile,
    pub stats: Option<PlayerStats>,
    pub history: Option<Vec<MatchHistoryEntry>>,
}

/// Scorer output. Reasons are kept in evaluation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmurfAssessment {
    pub nickname: String,
    pub confidence_percent: u8,
    pub reasons: Vec<String>,
    pub source_stats: PlayerStats,
    #[serde(default)]
    pub elo: Option<u32>,
}
