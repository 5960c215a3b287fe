//! Heuristic smurf scoring over lifetime stats.
//!
//! Every table below is evaluated top to bottom and only its first matching band contributes.
//! Bonuses are independent of each other. The sum is clamped to 100 and published only at or
//! above `min_confidence`.

use crate::model::{PlayerProfile, PlayerStats, SmurfAssessment};

pub const DEFAULT_MAX_MATCHES: u32 = 2000;
pub const DEFAULT_MIN_CONFIDENCE: u8 = 51;
const MAX_CONFIDENCE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub limit: f64,
    pub weight: u32,
    pub label: &'static str,
}

const fn band(limit: f64, weight: u32, label: &'static str) -> Band {
    Band {
        limit,
        weight,
        label,
    }
}

/// Fires when `matches < limit`.
pub const MATCH_BANDS: &[Band] = &[
    band(30.0, 40, "Very low match count"),
    band(100.0, 30, "Low match count"),
    band(200.0, 20, "Moderate match count"),
    band(350.0, 10, "Average match count"),
];

/// Fires when `kd > limit`.
pub const KD_BANDS: &[Band] = &[
    band(2.5, 35, "Extremely high K/D ratio"),
    band(2.0, 30, "Very high K/D ratio"),
    band(1.5, 25, "High K/D ratio"),
    band(1.2, 15, "Above average K/D ratio"),
    band(1.0, 10, "Good K/D ratio"),
];

/// Fires when `kr > limit`.
pub const KR_BANDS: &[Band] = &[
    band(2.5, 30, "Extremely high K/R ratio"),
    band(2.0, 25, "Very high K/R ratio"),
    band(1.5, 20, "High K/R ratio"),
    band(1.2, 12, "Above average K/R ratio"),
    band(1.0, 8, "Good K/R ratio"),
];

/// Fires when `win_rate > limit`.
pub const WIN_RATE_BANDS: &[Band] = &[
    band(85.0, 25, "Extremely high win rate"),
    band(75.0, 20, "Very high win rate"),
    band(65.0, 15, "High win rate"),
    band(55.0, 10, "Above average win rate"),
    band(45.0, 5, "Good win rate"),
];

/// Fires when `level <= limit`; skipped for unknown or zero levels.
pub const LEVEL_BANDS: &[Band] = &[
    band(3.0, 25, "Very low level"),
    band(5.0, 20, "Low level"),
    band(8.0, 15, "Moderate level"),
    band(12.0, 10, "Average level"),
    band(20.0, 5, "High level"),
];

/// Which stat a bonus reason quotes after its label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BonusCite {
    Label,
    HeadshotPercent,
    Adr,
}

/// Fires when `matches < max_matches` and every set minimum is strictly exceeded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BonusRule {
    pub max_matches: u32,
    pub min_kd: Option<f64>,
    pub min_kr: Option<f64>,
    pub min_win_rate: Option<f64>,
    pub min_hs: Option<u32>,
    pub min_adr: Option<u32>,
    pub weight: u32,
    pub label: &'static str,
    pub cite: BonusCite,
}

const EMPTY_RULE: BonusRule = BonusRule {
    max_matches: 0,
    min_kd: None,
    min_kr: None,
    min_win_rate: None,
    min_hs: None,
    min_adr: None,
    weight: 0,
    label: "",
    cite: BonusCite::Label,
};

pub const DEFAULT_BONUS_RULES: &[BonusRule] = &[
    BonusRule {
        max_matches: 30,
        min_kd: Some(1.8),
        min_win_rate: Some(70.0),
        weight: 20,
        label: "Classic smurf pattern: high stats with low matches",
        ..EMPTY_RULE
    },
    BonusRule {
        max_matches: 50,
        min_kr: Some(1.5),
        min_win_rate: Some(65.0),
        weight: 15,
        label: "High K/R with low matches: potential smurf",
        ..EMPTY_RULE
    },
    BonusRule {
        max_matches: 100,
        min_hs: Some(60),
        weight: 10,
        label: "High headshot percentage",
        cite: BonusCite::HeadshotPercent,
        ..EMPTY_RULE
    },
    BonusRule {
        max_matches: 100,
        min_adr: Some(100),
        weight: 10,
        label: "High ADR",
        cite: BonusCite::Adr,
        ..EMPTY_RULE
    },
];

impl BonusRule {
    fn fires(&self, stats: &PlayerStats) -> bool {
        let wr = stats.win_rate_percent as f64;
        stats.matches_played < self.max_matches
            && self.min_kd.is_none_or(|min| stats.avg_kd_ratio > min)
            && self.min_kr.is_none_or(|min| stats.avg_kr_ratio > min)
            && self.min_win_rate.is_none_or(|min| wr > min)
            && self.min_hs.is_none_or(|min| stats.avg_headshot_percent > min)
            && self.min_adr.is_none_or(|min| stats.avg_adr > min)
    }

    fn reason(&self, stats: &PlayerStats) -> String {
        match self.cite {
            BonusCite::Label => self.label.to_string(),
            BonusCite::HeadshotPercent => format!("{}: {}%", self.label, stats.avg_headshot_percent),
            BonusCite::Adr => format!("{}: {}", self.label, stats.avg_adr),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoringConfig {
    pub max_matches: u32,
    pub min_confidence: u8,
    pub match_bands: Vec<Band>,
    pub kd_bands: Vec<Band>,
    pub kr_bands: Vec<Band>,
    pub win_rate_bands: Vec<Band>,
    pub level_bands: Vec<Band>,
    pub bonus_rules: Vec<BonusRule>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            max_matches: DEFAULT_MAX_MATCHES,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            match_bands: MATCH_BANDS.to_vec(),
            kd_bands: KD_BANDS.to_vec(),
            kr_bands: KR_BANDS.to_vec(),
            win_rate_bands: WIN_RATE_BANDS.to_vec(),
            level_bands: LEVEL_BANDS.to_vec(),
            bonus_rules: DEFAULT_BONUS_RULES.to_vec(),
        }
    }
}

impl ScoringConfig {
    /// Defaults with the env-level overrides from `Config` applied.
    pub fn with_overrides(max_matches: Option<u32>, min_confidence: Option<u8>) -> Self {
        let mut cfg = Self::default();
        if let Some(max) = max_matches {
            cfg.max_matches = max;
        }
        if let Some(min) = min_confidence {
            cfg.min_confidence = min.min(MAX_CONFIDENCE as u8);
        }
        cfg
    }
}

#[derive(Default)]
struct Tally {
    confidence: u32,
    reasons: Vec<String>,
}

impl Tally {
    fn add(&mut self, weight: u32, reason: String) {
        self.confidence = self.confidence.saturating_add(weight);
        self.reasons.push(reason);
    }

    fn first_band(&mut self, bands: &[Band], fires: impl Fn(f64) -> bool, cite: impl Fn(&str) -> String) {
        if let Some(b) = bands.iter().find(|b| fires(b.limit)) {
            self.add(b.weight, cite(b.label));
        }
    }
}

/// Pure: same inputs, same output. `None` for excluded players and for scores below threshold.
pub fn score(
    profile: &PlayerProfile,
    stats: &PlayerStats,
    cfg: &ScoringConfig,
) -> Option<SmurfAssessment> {
    let matches = stats.matches_played;
    if matches > cfg.max_matches {
        return None;
    }
    let m = matches as f64;
    let kd = stats.avg_kd_ratio;
    let kr = stats.avg_kr_ratio;
    let wr = stats.win_rate_percent as f64;

    let mut tally = Tally::default();
    tally.first_band(&cfg.match_bands, |limit| m < limit, |label| {
        format!("{label}: {matches}")
    });
    tally.first_band(&cfg.kd_bands, |limit| kd > limit, |label| format!("{label}: {kd}"));
    tally.first_band(&cfg.kr_bands, |limit| kr > limit, |label| format!("{label}: {kr}"));
    tally.first_band(&cfg.win_rate_bands, |limit| wr > limit, |label| {
        format!("{label}: {}%", stats.win_rate_percent)
    });
    if let Some(level) = profile.skill_level.filter(|lvl| *lvl > 0) {
        let lvl = level as f64;
        tally.first_band(&cfg.level_bands, |limit| lvl <= limit, |label| {
            format!("{label}: {level}")
        });
    }

    for rule in cfg.bonus_rules.iter().filter(|rule| rule.fires(stats)) {
        tally.add(rule.weight, rule.reason(stats));
    }

    let confidence = tally.confidence.min(MAX_CONFIDENCE) as u8;
    if confidence < cfg.min_confidence {
        return None;
    }
    Some(SmurfAssessment {
        nickname: profile.nickname.clone(),
        confidence_percent: confidence,
        reasons: tally.reasons,
        source_stats: stats.clone(),
        elo: profile.elo,
    })
}
