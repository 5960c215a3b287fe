use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use smurf_radar::cache::ResultCache;
use smurf_radar::config::Config;
use smurf_radar::elo::{
    DEFAULT_K, RatingChange, average_elo, estimate_rating_change, predict_rating_change,
};
use smurf_radar::http_client::ReqwestTransport;
use smurf_radar::model::SmurfAssessment;
use smurf_radar::page::room_id;
use smurf_radar::player_fetch::StatsClient;
use smurf_radar::scrape::{room_nicknames, scrape_room_html};
use smurf_radar::smurf_score::{ScoringConfig, score};
use smurf_radar::store::open_store;

#[derive(Debug, Serialize)]
struct ScanReport {
    room_id: Option<String>,
    players: Vec<String>,
    resolved: usize,
    room_avg_elo: Option<f64>,
    flagged: Vec<SmurfAssessment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    predicted_change: Option<RatingChange>,
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let Some(snapshot) = positional_arg(&args) else {
        eprintln!("usage: scan <snapshot.html> [--url <page-url>] [--win-prob <0..1>] [--json]");
        std::process::exit(2);
    };
    let url = parse_url_arg(&args);
    let win_probability = parse_win_prob_arg(&args);
    let json = args.iter().any(|a| a == "--json");

    let html = std::fs::read_to_string(&snapshot)
        .with_context(|| format!("read snapshot {snapshot}"))?;
    let nicknames = room_nicknames(&scrape_room_html(&html)?);
    if nicknames.is_empty() {
        eprintln!("No players found in {snapshot}.");
        return Ok(());
    }

    let config = Config::from_env();
    let store = open_store(config.store_path.as_deref());
    let cache = Arc::new(ResultCache::new(store, config.cache_ttl));
    let client = StatsClient::new(
        Arc::new(ReqwestTransport),
        cache,
        config.api.clone(),
        config.retry,
        config.batch,
    );
    let scoring = ScoringConfig::with_overrides(config.max_matches, config.min_confidence);

    let bundles = client.get_many_profiles_and_stats(&nicknames);
    let flagged = nicknames
        .iter()
        .filter_map(|nick| {
            let bundle = bundles.get(nick)?;
            score(&bundle.profile, bundle.stats.as_ref()?, &scoring)
        })
        .collect::<Vec<_>>();

    let report = ScanReport {
        room_id: url.as_deref().and_then(room_id),
        resolved: bundles.len(),
        room_avg_elo: average_elo(bundles.values().filter_map(|b| b.profile.elo)),
        players: nicknames,
        flagged,
        predicted_change: win_probability.map(|p| predict_rating_change(p, DEFAULT_K)),
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("encode report")?
        );
        return Ok(());
    }

    println!(
        "Room {} | {} players | {} resolved | avg elo {}",
        report.room_id.as_deref().unwrap_or("-"),
        report.players.len(),
        report.resolved,
        report
            .room_avg_elo
            .map(|e| format!("{e:.0}"))
            .unwrap_or_else(|| "-".to_string())
    );
    if let (Some(p), Some(change)) = (win_probability, report.predicted_change) {
        println!(
            "At {:.0}% win probability: +{}/{}",
            p * 100.0,
            change.gain,
            change.loss
        );
    }
    if report.flagged.is_empty() {
        println!("No suspected smurfs.");
        return Ok(());
    }
    println!("{:<20} {:>5} {:>6} {:>9}  reasons", "nickname", "conf", "elo", "+/-");
    for a in &report.flagged {
        let elo = a.elo.map(|e| e.to_string()).unwrap_or_else(|| "-".to_string());
        let swing = match (a.elo, report.room_avg_elo) {
            (Some(elo), Some(avg)) => {
                let change = estimate_rating_change(elo as f64, avg, DEFAULT_K);
                format!("+{}/{}", change.gain, change.loss)
            }
            _ => "-".to_string(),
        };
        println!(
            "{:<20} {:>4}% {:>6} {:>9}  {}",
            a.nickname,
            a.confidence_percent,
            elo,
            swing,
            a.reasons.join("; ")
        );
    }
    Ok(())
}

fn positional_arg(args: &[String]) -> Option<String> {
    let mut skip_next = false;
    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if arg == "--url" || arg == "--win-prob" {
            skip_next = true;
            continue;
        }
        if !arg.starts_with("--") {
            return Some(arg.clone());
        }
    }
    None
}

fn parse_url_arg(args: &[String]) -> Option<String> {
    for (idx, arg) in args.iter().enumerate() {
        if let Some(v) = arg.strip_prefix("--url=")
            && !v.trim().is_empty()
        {
            return Some(v.trim().to_string());
        }
        if arg == "--url"
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}

/// `--win-prob 0.6` or `--win-prob=0.6`, clamped to `0..=1`.
fn parse_win_prob_arg(args: &[String]) -> Option<f64> {
    for (idx, arg) in args.iter().enumerate() {
        let raw = if let Some(v) = arg.strip_prefix("--win-prob=") {
            Some(v)
        } else if arg == "--win-prob" {
            args.get(idx + 1).map(String::as_str)
        } else {
            None
        };
        if let Some(p) = raw.and_then(|v| v.trim().parse::<f64>().ok())
            && p.is_finite()
        {
            return Some(p.clamp(0.0, 1.0));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn win_prob_flag_is_parsed_and_clamped() {
        assert_eq!(parse_win_prob_arg(&args(&["room.html", "--win-prob", "0.6"])), Some(0.6));
        assert_eq!(parse_win_prob_arg(&args(&["--win-prob=1.7"])), Some(1.0));
        assert_eq!(parse_win_prob_arg(&args(&["--win-prob", "abc"])), None);
        assert_eq!(parse_win_prob_arg(&args(&["room.html"])), None);
    }

    #[test]
    fn flag_values_are_not_taken_as_the_snapshot() {
        let list = args(&["--win-prob", "0.4", "--url", "https://x", "room.html"]);
        assert_eq!(positional_arg(&list).as_deref(), Some("room.html"));
    }
}
