use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RatingChange {
    pub gain: i32,
    pub loss: i32,
}

pub const DEFAULT_K: f64 = 50.0;

/// Inclusive upper Elo bound per skill level 1..=9; level 10 is open-ended.
const CSGO_LEVEL_CEILINGS: [u32; 9] = [800, 950, 1100, 1250, 1400, 1550, 1700, 1850, 2000];
const CS2_LEVEL_CEILINGS: [u32; 9] = [500, 750, 900, 1050, 1200, 1350, 1530, 1750, 2000];

pub fn skill_level_for_elo(game: &str, elo: u32) -> Option<u32> {
    if elo == 0 {
        return None;
    }
    let ceilings = match game.trim().to_ascii_lowercase().as_str() {
        "csgo" => &CSGO_LEVEL_CEILINGS,
        "cs2" => &CS2_LEVEL_CEILINGS,
        _ => return None,
    };
    let level = ceilings
        .iter()
        .position(|ceiling| elo <= *ceiling)
        .map(|idx| idx as u32 + 1)
        .unwrap_or(10);
    Some(level)
}

/// Gain if `elo1` beats `elo2`, loss otherwise. Never reports a zero change.
pub fn estimate_rating_change(elo1: f64, elo2: f64, k: f64) -> RatingChange {
    let p = expected_score(elo1, elo2);
    let gain = (k * (1.0 - p)).round() as i32;
    let loss = (k * (0.0 - p)).round() as i32;
    RatingChange {
        gain: if gain == 0 { 1 } else { gain },
        loss: if loss == 0 { -1 } else { loss },
    }
}

/// Swing for a match the player wins with `win_probability`; `gain - loss` always equals `k`.
pub fn predict_rating_change(win_probability: f64, k: f64) -> RatingChange {
    let gain = (k - win_probability * k).round() as i32;
    RatingChange {
        gain,
        loss: -(k.round() as i32 - gain),
    }
}

pub fn average_elo<I: IntoIterator<Item = u32>>(elos: I) -> Option<f64> {
    let (sum, n) = elos
        .into_iter()
        .fold((0.0_f64, 0_u32), |(s, n), e| (s + e as f64, n + 1));
    if n == 0 { None } else { Some(sum / n as f64) }
}

fn expected_score(r_a: f64, r_b: f64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf((r_b - r_a) / 400.0))
}
