use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use chrono::Utc;
use rayon::prelude::*;
use reqwest::Url;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::ResultCache;
use crate::config::{ApiConfig, BatchConfig, RetryPolicy};
use crate::error::{ApiError, ApiResult};
use crate::http_client::{HttpRequest, Transport, send_with_retry};
use crate::legacy_api;
use crate::model::{MatchHistoryEntry, PlayerBundle, PlayerProfile, PlayerStats};
use crate::open_api;

pub const SUPPORTED_GAMES: &[&str] = &["csgo", "cs2"];
const HISTORY_GAME: &str = "cs2";
const HISTORY_PAGE_SIZE: u32 = 30;

pub fn is_supported_game(game: &str) -> bool {
    SUPPORTED_GAMES
        .iter()
        .any(|g| g.eq_ignore_ascii_case(game.trim()))
}

/// Raw stats as fetched, before normalisation into `PlayerStats`.
#[derive(Debug, Clone, PartialEq)]
pub enum Upstream {
    Modern { lifetime: Value },
    Legacy { totals: Value, rows: Vec<Value> },
}

impl Upstream {
    pub fn into_stats(self) -> Option<PlayerStats> {
        match self {
            Upstream::Modern { lifetime } => Some(open_api::stats_from_lifetime(&lifetime)),
            Upstream::Legacy { totals, rows } => legacy_api::stats_from_rows(&totals, &rows),
        }
    }
}

/// Resolves nicknames to profile + stats + history. The orchestrator only depends on this.
pub trait PlayerDirectory: Send + Sync {
    fn fetch_many(&self, nicknames: &[String]) -> HashMap<String, PlayerBundle>;
}

pub struct StatsClient {
    transport: Arc<dyn Transport>,
    cache: Arc<ResultCache>,
    api: ApiConfig,
    retry: RetryPolicy,
    batch: BatchConfig,
    pool: Option<rayon::ThreadPool>,
}

impl StatsClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        cache: Arc<ResultCache>,
        api: ApiConfig,
        retry: RetryPolicy,
        batch: BatchConfig,
    ) -> Self {
        let pool = build_fetch_pool(batch.size);
        Self {
            transport,
            cache,
            api,
            retry,
            batch,
            pool,
        }
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn get_profile(&self, nickname: &str) -> Option<PlayerProfile> {
        let key = format!("player:{nickname}");
        if let Some(profile) = self.cache.get::<PlayerProfile>(&key) {
            debug!(nickname, "using cached player data");
            return Some(profile);
        }

        match self.fetch_profile(nickname) {
            Ok(Some(mut profile)) => {
                if profile.nickname.is_empty() {
                    profile.nickname = nickname.to_string();
                }
                self.cache.set(&key, &profile);
                Some(profile)
            }
            Ok(None) => {
                debug!(nickname, "player not found");
                None
            }
            Err(err) => {
                warn!(nickname, error = %err, "failed to fetch player");
                None
            }
        }
    }

    pub fn get_stats(&self, player_id: &str, game: &str, sample_size: u32) -> Option<PlayerStats> {
        if !is_supported_game(game) {
            warn!(game, "unsupported game");
            return None;
        }
        let game = game.trim().to_ascii_lowercase();
        let key = format!("stats:{player_id}:{game}:{sample_size}");
        if let Some(stats) = self.cache.get::<PlayerStats>(&key) {
            return Some(stats);
        }

        let upstream = match self.fetch_stats(player_id, &game, sample_size) {
            Ok(Some(upstream)) => upstream,
            Ok(None) => {
                debug!(player_id, "no stats available");
                return None;
            }
            Err(err) => {
                warn!(player_id, error = %err, "failed to fetch player stats");
                return None;
            }
        };
        let stats = upstream.into_stats()?;
        self.cache.set(&key, &stats);
        Some(stats)
    }

    /// Optional context for scoring; every failure collapses to `None`.
    pub fn get_history(&self, player_id: &str, page: u32) -> Option<Vec<MatchHistoryEntry>> {
        let key = format!("history:{player_id}:{page}");
        if let Some(history) = self.cache.get::<Vec<MatchHistoryEntry>>(&key) {
            return Some(history);
        }

        let now_ms = Utc::now().timestamp_millis();
        let query = [
            ("size", HISTORY_PAGE_SIZE.to_string()),
            ("page", page.to_string()),
            ("to", now_ms.to_string()),
        ];
        let segments = [
            "stats", "v1", "stats", "time", "users", player_id, "games", HISTORY_GAME,
        ];
        let rows = match self.legacy_get(&segments, &query) {
            Ok(Some(rows)) => rows,
            Ok(None) => return None,
            Err(err) => {
                debug!(player_id, error = %err, "stats history unavailable");
                return None;
            }
        };
        let history = legacy_api::history_from_rows(&rows, now_ms)?;
        self.cache.set(&key, &history);
        Some(history)
    }

    /// Profile first, then stats and history side by side. `None` if the player is unknown.
    pub fn get_player_bundle(&self, nickname: &str) -> Option<PlayerBundle> {
        let profile = self.get_profile(nickname)?;
        let (stats, history) = rayon::join(
            || self.get_stats(&profile.player_id, &self.api.game, self.api.sample_size),
            || self.get_history(&profile.player_id, 0),
        );
        Some(PlayerBundle {
            profile,
            stats,
            history,
        })
    }

    /// Batches of `batch.size` run one after another with `batch.delay` between them; nicknames
    /// inside a batch resolve concurrently. Unresolvable nicknames are left out of the map.
    pub fn get_many_profiles_and_stats(&self, nicknames: &[String]) -> HashMap<String, PlayerBundle> {
        let mut results = HashMap::new();
        let batches: Vec<&[String]> = nicknames.chunks(self.batch.size.max(1)).collect();
        info!(players = nicknames.len(), batches = batches.len(), "fetching player data");

        for (idx, batch) in batches.iter().enumerate() {
            let resolved: Vec<(String, Option<PlayerBundle>)> = with_fetch_pool(&self.pool, || {
                batch
                    .par_iter()
                    .map(|nickname| (nickname.clone(), self.get_player_bundle(nickname)))
                    .collect()
            });
            for (nickname, bundle) in resolved {
                if let Some(bundle) = bundle {
                    results.insert(nickname, bundle);
                }
            }
            if idx + 1 < batches.len() && !self.batch.delay.is_zero() {
                thread::sleep(self.batch.delay);
            }
        }

        info!(
            resolved = results.len(),
            requested = nicknames.len(),
            "fetched player data"
        );
        results
    }

    fn fetch_profile(&self, nickname: &str) -> ApiResult<Option<PlayerProfile>> {
        match self.open_get(&["players"], &[("nickname", nickname.to_string())]) {
            Ok(Some(body)) => match open_api::parse_player_json(&body, &self.api.game) {
                Ok(Some(profile)) => return Ok(Some(profile)),
                Ok(None) => debug!(nickname, "open api payload has no player id"),
                Err(err) => warn!(nickname, error = %err, "open api player payload unreadable"),
            },
            Ok(None) => debug!(nickname, "open api has no such player"),
            Err(err) => warn!(nickname, error = %err, "open api failed, trying legacy api"),
        }

        let payload = self.legacy_get(&["users", "v1", "nicknames", nickname], &[])?;
        Ok(payload.and_then(|p| legacy_api::profile_from_payload(&p, &self.api.game)))
    }

    fn fetch_stats(
        &self,
        player_id: &str,
        game: &str,
        sample_size: u32,
    ) -> ApiResult<Option<Upstream>> {
        match self.open_get(&["players", player_id, "games", game, "stats"], &[]) {
            Ok(Some(body)) => match open_api::parse_stats_json(&body) {
                Ok(Some(lifetime)) => return Ok(Some(Upstream::Modern { lifetime })),
                Ok(None) => debug!(player_id, "open api stats have no lifetime block"),
                Err(err) => warn!(player_id, error = %err, "open api stats unreadable"),
            },
            Ok(None) => debug!(player_id, "open api has no stats"),
            Err(err) => warn!(player_id, error = %err, "open api stats failed, trying legacy api"),
        }

        let (totals, rows) = rayon::join(
            || self.legacy_get(&["stats", "v1", "stats", "users", player_id, "games", game], &[]),
            || {
                self.legacy_get(
                    &["stats", "v1", "stats", "time", "users", player_id, "games", game],
                    &[("size", sample_size.to_string())],
                )
            },
        );
        let Some(totals) = totals? else {
            return Ok(None);
        };
        let Some(rows) = rows? else {
            return Ok(None);
        };
        if !rows.is_array() {
            return Err(ApiError::Malformed("stats rows are not a list".to_string()));
        }
        Ok(Some(Upstream::Legacy {
            totals,
            rows: legacy_api::five_v_five_rows(&rows),
        }))
    }

    fn open_get(&self, segments: &[&str], query: &[(&str, String)]) -> ApiResult<Option<String>> {
        let Some(api_key) = self.api.api_key.as_deref() else {
            return Err(ApiError::MissingApiKey);
        };
        let url = build_url(&self.api.open_api_url, segments, query)?;
        let req = HttpRequest::get(url).header("Authorization", format!("Bearer {api_key}"));
        send_with_retry(self.transport.as_ref(), &req, &self.retry)
    }

    fn legacy_get(&self, segments: &[&str], query: &[(&str, String)]) -> ApiResult<Option<Value>> {
        let url = build_url(&self.api.legacy_api_url, segments, query)?;
        let req = HttpRequest::get(url).header("Content-Type", "application/json");
        match send_with_retry(self.transport.as_ref(), &req, &self.retry)? {
            Some(body) => legacy_api::unwrap_envelope(&body),
            None => Ok(None),
        }
    }
}

impl PlayerDirectory for StatsClient {
    fn fetch_many(&self, nicknames: &[String]) -> HashMap<String, PlayerBundle> {
        self.get_many_profiles_and_stats(nicknames)
    }
}

fn build_url(base: &str, segments: &[&str], query: &[(&str, String)]) -> ApiResult<String> {
    let mut url =
        Url::parse(base).map_err(|err| ApiError::Malformed(format!("bad base url {base}: {err}")))?;
    url.path_segments_mut()
        .map_err(|_| ApiError::Malformed(format!("base url {base} cannot take a path")))?
        .pop_if_empty()
        .extend(segments);
    if !query.is_empty() {
        url.query_pairs_mut()
            .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
    }
    Ok(url.to_string())
}

fn build_fetch_pool(threads: usize) -> Option<rayon::ThreadPool> {
    match rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(|idx| format!("player-fetch-{idx}"))
        .build()
    {
        Ok(pool) => Some(pool),
        Err(err) => {
            warn!(error = %err, "failed to build fetch pool, using global pool");
            None
        }
    }
}

fn with_fetch_pool<T>(pool: &Option<rayon::ThreadPool>, action: impl FnOnce() -> T + Send) -> T
where
    T: Send,
{
    if let Some(pool) = pool.as_ref() {
        pool.install(action)
    } else {
        action()
    }
}
