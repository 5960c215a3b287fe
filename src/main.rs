use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, mpsc};
use std::time::{Duration, Instant, SystemTime};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::prelude::*;
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use tracing_subscriber::EnvFilter;

use smurf_radar::cache::ResultCache;
use smurf_radar::campaigns::CampaignWidget;
use smurf_radar::config::{Config, app_cache_dir};
use smurf_radar::detect::{Orchestrator, PageRenderer, Trigger, spawn_detector};
use smurf_radar::http_client::ReqwestTransport;
use smurf_radar::model::SmurfAssessment;
use smurf_radar::page::FilePage;
use smurf_radar::player_fetch::StatsClient;
use smurf_radar::scrape::Anchor;
use smurf_radar::settings;
use smurf_radar::smurf_score::ScoringConfig;
use smurf_radar::state::{AppState, BadgeRow, Delta, apply_delta, status_label};
use smurf_radar::store::{KvStore, open_store};

const SNAPSHOT_POLL: Duration = Duration::from_secs(1);

/// Badge placement for the terminal: every call becomes a `Delta` for the UI thread.
struct DeltaRenderer {
    tx: mpsc::Sender<Delta>,
}

impl PageRenderer for DeltaRenderer {
    fn clear_badges(&self) {
        let _ = self.tx.send(Delta::ClearBadges);
    }

    fn place_badge(&self, assessment: &SmurfAssessment, _anchor: &Anchor) {
        let _ = self.tx.send(Delta::PlaceBadge(assessment.clone()));
    }

    fn hide_widget(&self, widget: &CampaignWidget) {
        let _ = self.tx.send(Delta::HideWidget(widget.path.clone()));
    }
}

struct App {
    state: AppState,
    should_quit: bool,
    trigger_tx: mpsc::Sender<Trigger>,
    store: Arc<dyn KvStore>,
    cache: Arc<ResultCache>,
    snapshot: PathBuf,
    last_mtime: Option<SystemTime>,
    last_poll: Instant,
}

impl App {
    fn new(
        snapshot: PathBuf,
        trigger_tx: mpsc::Sender<Trigger>,
        store: Arc<dyn KvStore>,
        cache: Arc<ResultCache>,
    ) -> Self {
        let mut state = AppState::new(snapshot.display().to_string());
        state.enabled = settings::load(store.as_ref()).enabled;
        state.cache = Some(cache.info());
        Self {
            state,
            should_quit: false,
            trigger_tx,
            store,
            cache,
            last_mtime: snapshot_mtime(&snapshot),
            snapshot,
            last_poll: Instant::now(),
        }
    }

    fn on_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('r') => self.send_trigger(Trigger::Manual, true),
            KeyCode::Char('c') => {
                self.cache.clear();
                apply_delta(&mut self.state, Delta::SetCacheInfo(self.cache.info()));
                self.state.push_log("[INFO] Cache cleared");
            }
            KeyCode::Char('t') => self.toggle_enabled(),
            KeyCode::Char('j') | KeyCode::Down => self.state.select_next(),
            KeyCode::Char('k') | KeyCode::Up => self.state.select_prev(),
            KeyCode::Char('?') => self.state.help_overlay = !self.state.help_overlay,
            _ => {}
        }
    }

    fn toggle_enabled(&mut self) {
        let next = !self.state.enabled;
        match settings::set_enabled(self.store.as_ref(), &self.cache, next) {
            Ok(saved) => {
                apply_delta(&mut self.state, Delta::SetEnabled(saved.enabled));
                apply_delta(&mut self.state, Delta::SetCacheInfo(self.cache.info()));
                let label = if saved.enabled { "enabled" } else { "disabled" };
                self.state.push_log(format!("[INFO] Extension {label}, cache cleared"));
                if saved.enabled {
                    self.send_trigger(Trigger::Manual, false);
                }
            }
            Err(err) => self.state.push_log(format!("[WARN] Toggle failed: {err}")),
        }
    }

    fn send_trigger(&mut self, trigger: Trigger, announce: bool) {
        if self.trigger_tx.send(trigger).is_err() {
            self.state.push_log("[WARN] Detector is not running");
        } else if announce {
            self.state.push_log("[INFO] Rerun requested");
        }
    }

    fn maybe_poll_snapshot(&mut self) {
        if self.last_poll.elapsed() < SNAPSHOT_POLL {
            return;
        }
        self.last_poll = Instant::now();
        let mtime = snapshot_mtime(&self.snapshot);
        if mtime.is_some() && mtime != self.last_mtime {
            self.last_mtime = mtime;
            self.send_trigger(Trigger::Mutation, false);
            self.state.cache = Some(self.cache.info());
        }
    }
}

fn snapshot_mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");

    let Some(snapshot) = parse_snapshot_arg() else {
        eprintln!("usage: smurf_radar <snapshot.html> [--url <page-url>]");
        std::process::exit(2);
    };
    init_file_logging();

    let config = Config::from_env();
    let store = open_store(config.store_path.as_deref());
    let cache = Arc::new(ResultCache::new(store.clone(), config.cache_ttl));
    let client = StatsClient::new(
        Arc::new(ReqwestTransport),
        cache.clone(),
        config.api.clone(),
        config.retry,
        config.batch,
    );

    let (delta_tx, delta_rx) = mpsc::channel();
    let (trigger_tx, trigger_rx) = mpsc::channel();
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(client),
        Arc::new(DeltaRenderer {
            tx: delta_tx.clone(),
        }),
        store.clone(),
        ScoringConfig::with_overrides(config.max_matches, config.min_confidence),
        config.detect,
    ));
    let page = Arc::new(FilePage::new(&snapshot, parse_url_arg()));
    let _detector = spawn_detector(orchestrator, page, trigger_rx, delta_tx);

    let mut app = App::new(snapshot, trigger_tx, store, cache);
    if config.api.api_key.is_none() {
        app.state
            .push_log("[INFO] FACEIT_API_KEY not set, using the public endpoints only");
    }
    app.send_trigger(Trigger::Navigation, false);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = ratatui::backend::CrosstermBackend::new(stdout);
    let mut terminal = ratatui::Terminal::new(backend)?;

    let res = run_app(&mut terminal, &mut app, delta_rx);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        eprintln!("error: {err}");
    }
    Ok(())
}

/// Logs go to a file so they do not tear the terminal UI.
fn init_file_logging() {
    let Some(dir) = app_cache_dir() else {
        return;
    };
    if fs::create_dir_all(&dir).is_err() {
        return;
    }
    let Ok(file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("smurf_radar.log"))
    else {
        return;
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init();
}

fn parse_snapshot_arg() -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let mut skip_next = false;
    for arg in &args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if arg == "--url" {
            skip_next = true;
            continue;
        }
        if arg.starts_with("--") {
            continue;
        }
        return Some(PathBuf::from(arg));
    }
    None
}

fn parse_url_arg() -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
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

fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    rx: mpsc::Receiver<Delta>,
) -> io::Result<()> {
    let tick_rate = Duration::from_millis(250);
    let mut last_tick = Instant::now();

    loop {
        while let Ok(delta) = rx.try_recv() {
            apply_delta(&mut app.state, delta);
        }

        app.maybe_poll_snapshot();

        terminal.draw(|f| ui(f, app))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);
        if event::poll(timeout)?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            app.on_key(key);
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

fn ui(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Min(6),
            Constraint::Length(6),
            Constraint::Length(1),
        ])
        .split(frame.size());

    let header = Paragraph::new(header_text(&app.state))
        .block(Block::default().borders(Borders::BOTTOM));
    frame.render_widget(header, chunks[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(chunks[1]);
    render_badges(frame, body[0], &app.state);
    render_reasons(frame, body[1], &app.state);

    let console = Paragraph::new(console_text(&app.state))
        .block(Block::default().title("Log").borders(Borders::ALL))
        .wrap(Wrap { trim: true });
    frame.render_widget(console, chunks[2]);

    let footer = Paragraph::new(
        "r Rerun | c Clear cache | t Toggle | j/k/↑/↓ Move | ? Help | q Quit",
    );
    frame.render_widget(footer, chunks[3]);

    if app.state.help_overlay {
        let area = frame.size();
        render_help_overlay(frame, area);
    }
}

fn header_text(state: &AppState) -> String {
    let power = if state.enabled { "ON" } else { "OFF" };
    let room = state.room_id.as_deref().unwrap_or("-");
    let line1 = format!(
        "SMURF RADAR | {power} | room {room} | {}",
        status_label(state.status)
    );
    let line2 = format!(
        "snapshot {} | url {}",
        state.snapshot,
        state.url.as_deref().unwrap_or("-")
    );
    let avg = state
        .room_avg_elo
        .map(|e| format!("{e:.0}"))
        .unwrap_or_else(|| "-".to_string());
    let cache = match state.cache {
        Some(info) => match info.persisted_entries {
            Some(p) => format!("{} mem / {p} stored", info.memory_entries),
            None => format!("{} mem / store offline", info.memory_entries),
        },
        None => "-".to_string(),
    };
    let line3 = format!(
        "players {} | flagged {} | room avg elo {avg} | runs {} | hidden widgets {} | cache {cache}",
        state.players_seen,
        state.badges.len(),
        state.runs,
        state.hidden_widgets
    );
    format!("{line1}\n{line2}\n{line3}")
}

fn render_badges(frame: &mut Frame, area: Rect, state: &AppState) {
    let block = Block::default().title("Suspected smurfs").borders(Borders::ALL);
    if state.badges.is_empty() {
        frame.render_widget(Paragraph::new("No suspects").block(block), area);
        return;
    }
    let lines: Vec<Line> = state
        .badges
        .iter()
        .enumerate()
        .map(|(idx, badge)| {
            let style = if idx == state.selected {
                Style::default().add_modifier(Modifier::REVERSED)
            } else {
                Style::default()
            };
            Line::from(vec![
                Span::styled(format!("{:<18}", badge.nickname), style),
                Span::styled(
                    format!(" {:>3}%", badge.confidence),
                    Style::default().fg(confidence_color(badge.confidence)),
                ),
                Span::raw(format!(" {:>6}", elo_label(badge))),
                Span::raw(format!(" {}", rating_label(badge, state.room_avg_elo))),
            ])
        })
        .collect();
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_reasons(frame: &mut Frame, area: Rect, state: &AppState) {
    let block = Block::default().title("Reasons").borders(Borders::ALL);
    let text = match state.selected_badge() {
        Some(badge) => {
            let mut lines = vec![format!("{} ({} matches)", badge.nickname, badge.matches)];
            lines.extend(badge.reasons.iter().map(|r| format!("- {r}")));
            lines.join("\n")
        }
        None => "Select a player".to_string(),
    };
    frame.render_widget(
        Paragraph::new(text).block(block).wrap(Wrap { trim: true }),
        area,
    );
}

fn confidence_color(confidence: u8) -> Color {
    if confidence >= 90 {
        Color::Red
    } else if confidence >= 70 {
        Color::LightRed
    } else {
        Color::Yellow
    }
}

fn elo_label(badge: &BadgeRow) -> String {
    badge
        .elo
        .map(|e| e.to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn rating_label(badge: &BadgeRow, room_avg: Option<f64>) -> String {
    match badge.rating_change(room_avg) {
        Some(change) => format!("+{}/{}", change.gain, change.loss),
        None => String::new(),
    }
}

fn console_text(state: &AppState) -> String {
    if state.logs.is_empty() {
        return "Waiting for first run".to_string();
    }
    state
        .logs
        .iter()
        .rev()
        .take(4)
        .cloned()
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_help_overlay(frame: &mut Frame, area: Rect) {
    let popup_area = centered_rect(60, 50, area);
    frame.render_widget(Clear, popup_area);

    let text = [
        "Smurf Radar - Help",
        "",
        "Watches a saved match-room snapshot and reruns detection when it changes.",
        "Write the page URL to <snapshot>.url to follow room changes.",
        "",
        "  r            Rerun detection",
        "  c            Clear cached player data",
        "  t            Toggle the extension (clears cache)",
        "  j/k or ↑/↓   Move selection",
        "  ?            Toggle help",
        "  q            Quit",
    ]
    .join("\n");

    let help = Paragraph::new(text)
        .block(Block::default().title("Help").borders(Borders::ALL))
        .style(Style::default());
    frame.render_widget(help, popup_area);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1]);

    horizontal[1]
}
