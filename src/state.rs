use std::collections::VecDeque;

use crate::cache::CacheInfo;
use crate::detect::{RunOutcome, SkipReason};
use crate::elo::{DEFAULT_K, RatingChange, estimate_rating_change};
use crate::model::SmurfAssessment;
use crate::scrape::NodePath;

const MAX_LOGS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Idle,
    Running,
    Skipped(SkipReason),
    NoPlayers,
    Completed,
    Stale,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BadgeRow {
    pub nickname: String,
    pub confidence: u8,
    pub reasons: Vec<String>,
    pub elo: Option<u32>,
    pub matches: u32,
}

impl BadgeRow {
    fn from_assessment(a: SmurfAssessment) -> Self {
        Self {
            matches: a.source_stats.matches_played,
            nickname: a.nickname,
            confidence: a.confidence_percent,
            reasons: a.reasons,
            elo: a.elo,
        }
    }

    /// Expected Elo swing for this player against the room average.
    pub fn rating_change(&self, room_avg_elo: Option<f64>) -> Option<RatingChange> {
        let elo = self.elo? as f64;
        let avg = room_avg_elo?;
        Some(estimate_rating_change(elo, avg, DEFAULT_K))
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub snapshot: String,
    pub url: Option<String>,
    pub room_id: Option<String>,
    pub status: RunStatus,
    pub enabled: bool,
    pub badges: Vec<BadgeRow>,
    pub selected: usize,
    pub hidden_widgets: usize,
    pub room_avg_elo: Option<f64>,
    pub players_seen: usize,
    pub runs: u32,
    pub cache: Option<CacheInfo>,
    pub logs: VecDeque<String>,
    pub help_overlay: bool,
}

impl AppState {
    pub fn new(snapshot: impl Into<String>) -> Self {
        Self {
            snapshot: snapshot.into(),
            url: None,
            room_id: None,
            status: RunStatus::Idle,
            enabled: true,
            badges: Vec::new(),
            selected: 0,
            hidden_widgets: 0,
            room_avg_elo: None,
            players_seen: 0,
            runs: 0,
            cache: None,
            logs: VecDeque::with_capacity(MAX_LOGS),
            help_overlay: false,
        }
    }

    pub fn push_log(&mut self, msg: impl Into<String>) {
        self.logs.push_back(msg.into());
        while self.logs.len() > MAX_LOGS {
            self.logs.pop_front();
        }
    }

    pub fn select_next(&mut self) {
        if !self.badges.is_empty() {
            self.selected = (self.selected + 1).min(self.badges.len() - 1);
        }
    }

    pub fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn selected_badge(&self) -> Option<&BadgeRow> {
        self.badges.get(self.selected)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    ClearBadges,
    PlaceBadge(SmurfAssessment),
    HideWidget(NodePath),
    RunFinished(RunOutcome),
    SetEnabled(bool),
    SetCacheInfo(CacheInfo),
    Log(String),
}

pub fn apply_delta(state: &mut AppState, delta: Delta) {
    match delta {
        Delta::ClearBadges => {
            state.badges.clear();
            state.selected = 0;
            state.status = RunStatus::Running;
        }
        Delta::PlaceBadge(assessment) => {
            let row = BadgeRow::from_assessment(assessment);
            if let Some(existing) = state
                .badges
                .iter_mut()
                .find(|b| b.nickname.eq_ignore_ascii_case(&row.nickname))
            {
                *existing = row;
            } else {
                state.badges.push(row);
            }
        }
        Delta::HideWidget(_) => state.hidden_widgets += 1,
        Delta::RunFinished(outcome) => match outcome {
            RunOutcome::Skipped(reason) => {
                if state.status != RunStatus::Running {
                    state.status = RunStatus::Skipped(reason);
                }
            }
            RunOutcome::NoPlayers { room_id } => {
                state.room_id = room_id;
                state.status = RunStatus::NoPlayers;
                state.runs += 1;
            }
            RunOutcome::Completed(report) => {
                state.url = report.url;
                state.room_id = report.room_id;
                state.room_avg_elo = report.room_avg_elo;
                state.players_seen = report.nicknames.len();
                state.status = RunStatus::Completed;
                state.runs += 1;
            }
            RunOutcome::Stale { .. } => {
                state.badges.clear();
                state.selected = 0;
                state.status = RunStatus::Stale;
            }
            RunOutcome::Failed(_) => state.status = RunStatus::Failed,
        },
        Delta::SetEnabled(enabled) => {
            state.enabled = enabled;
            if !enabled {
                state.badges.clear();
                state.selected = 0;
                state.status = RunStatus::Skipped(SkipReason::Disabled);
            }
        }
        Delta::SetCacheInfo(info) => state.cache = Some(info),
        Delta::Log(msg) => state.push_log(msg),
    }
}

/// Deltas the detector thread emits after a run. Routine skips are not logged.
pub fn outcome_deltas(outcome: &RunOutcome) -> Vec<Delta> {
    let log = match outcome {
        RunOutcome::Skipped(SkipReason::ContentNotReady) => {
            Some("[INFO] Player cards not loaded yet".to_string())
        }
        RunOutcome::Skipped(SkipReason::NotEligible) => {
            Some("[INFO] Page is not a match room".to_string())
        }
        RunOutcome::Skipped(_) => None,
        RunOutcome::NoPlayers { .. } => Some("[INFO] No players found on page".to_string()),
        RunOutcome::Completed(report) => Some(format!(
            "[INFO] Scanned {} players ({} resolved), {} flagged",
            report.nicknames.len(),
            report.resolved,
            report.assessments.len()
        )),
        RunOutcome::Stale { .. } => {
            Some("[WARN] Room changed during run, results discarded".to_string())
        }
        RunOutcome::Failed(err) => Some(format!("[WARN] Detection failed: {err}")),
    };
    let mut deltas = vec![Delta::RunFinished(outcome.clone())];
    if let Some(msg) = log {
        deltas.push(Delta::Log(msg));
    }
    deltas
}

pub fn status_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Idle => "idle",
        RunStatus::Running => "running",
        RunStatus::Skipped(SkipReason::AlreadyRunning) => "busy",
        RunStatus::Skipped(SkipReason::SameUrl) => "up to date",
        RunStatus::Skipped(SkipReason::NotEligible) => "not a match room",
        RunStatus::Skipped(SkipReason::ContentNotReady) => "waiting for page",
        RunStatus::Skipped(SkipReason::CoolingDown) => "cooling down",
        RunStatus::Skipped(SkipReason::Disabled) => "disabled",
        RunStatus::NoPlayers => "no players",
        RunStatus::Completed => "done",
        RunStatus::Stale => "stale",
        RunStatus::Failed => "failed",
    }
}
