//! Detection runs: scrape the room, resolve players, score them and hand badges to the renderer.
//!
//! One run at a time. A trigger that arrives while a run is active, for a URL already processed,
//! or inside the cooldown window for the same room is skipped. A run whose room changed underneath
//! it discards its output instead of rendering.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::Result;
use scraper::Html;
use tracing::{debug, info, warn};

use crate::campaigns::{CampaignWidget, find_campaign_widgets};
use crate::config::DetectConfig;
use crate::elo::average_elo;
use crate::model::{PlayerBundle, SmurfAssessment};
use crate::page::{PageSource, is_eligible_url, room_id, wait_for_content};
use crate::player_fetch::PlayerDirectory;
use crate::scrape::{Anchor, has_player_markers, room_nicknames, scrape_room};
use crate::settings;
use crate::smurf_score::{ScoringConfig, score};
use crate::state::{Delta, outcome_deltas};
use crate::store::KvStore;

/// The page-side half of rendering. Implementations mount, clear and hide elements.
pub trait PageRenderer: Send + Sync {
    fn clear_badges(&self);
    fn place_badge(&self, assessment: &SmurfAssessment, anchor: &Anchor);
    fn hide_widget(&self, widget: &CampaignWidget);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Navigation,
    Mutation,
    /// User-requested rerun; the same-URL check does not apply.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyRunning,
    SameUrl,
    NotEligible,
    ContentNotReady,
    CoolingDown,
    Disabled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub url: Option<String>,
    pub room_id: Option<String>,
    pub nicknames: Vec<String>,
    pub resolved: usize,
    pub assessments: Vec<SmurfAssessment>,
    pub placed: usize,
    pub room_avg_elo: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Skipped(SkipReason),
    NoPlayers { room_id: Option<String> },
    Completed(RunReport),
    Stale { room_id: Option<String> },
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionState {
    pub last_url: Option<String>,
    pub last_run_at: Option<Instant>,
    pub room_id: Option<String>,
    pub generation: u64,
}

struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct Orchestrator {
    directory: Arc<dyn PlayerDirectory>,
    renderer: Arc<dyn PageRenderer>,
    settings_store: Arc<dyn KvStore>,
    scoring: ScoringConfig,
    detect: DetectConfig,
    state: Mutex<DetectionState>,
    running: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        directory: Arc<dyn PlayerDirectory>,
        renderer: Arc<dyn PageRenderer>,
        settings_store: Arc<dyn KvStore>,
        scoring: ScoringConfig,
        detect: DetectConfig,
    ) -> Self {
        Self {
            directory,
            renderer,
            settings_store,
            scoring,
            detect,
            state: Mutex::new(DetectionState::default()),
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn state(&self) -> DetectionState {
        self.state.lock().expect("detection state lock poisoned").clone()
    }

    pub fn on_trigger(&self, page: &dyn PageSource, trigger: Trigger) -> RunOutcome {
        let settings = settings::load(self.settings_store.as_ref());
        if settings.campaigns_hidden() {
            self.hide_campaigns(page);
        }
        if !settings.detection_active() {
            return RunOutcome::Skipped(SkipReason::Disabled);
        }

        let url = page.url();
        self.observe_room(url.as_deref());

        let Some(_guard) = RunGuard::acquire(&self.running) else {
            debug!(?trigger, "detection already running");
            return RunOutcome::Skipped(SkipReason::AlreadyRunning);
        };

        match self.run(page, trigger, url) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "detection run failed");
                RunOutcome::Failed(err.to_string())
            }
        }
    }

    /// Tracks the room behind `url`. Moving to a different room starts a new generation and
    /// resets the cooldown.
    fn observe_room(&self, url: Option<&str>) {
        let room = url.and_then(room_id);
        let mut state = self.state.lock().expect("detection state lock poisoned");
        if state.room_id != room {
            state.generation += 1;
            state.room_id = room;
            state.last_run_at = None;
            debug!(generation = state.generation, room = ?state.room_id, "room changed");
        }
    }

    fn run(
        &self,
        page: &dyn PageSource,
        trigger: Trigger,
        url: Option<String>,
    ) -> Result<RunOutcome> {
        {
            let state = self.state.lock().expect("detection state lock poisoned");
            if trigger != Trigger::Manual && url.is_some() && state.last_url == url {
                return Ok(RunOutcome::Skipped(SkipReason::SameUrl));
            }
            if let Some(last) = state.last_run_at
                && last.elapsed() < self.detect.cooldown
            {
                return Ok(RunOutcome::Skipped(SkipReason::CoolingDown));
            }
        }

        let eligible_by_url = url.as_deref().is_some_and(is_eligible_url);
        if !eligible_by_url && !has_player_markers(&Html::parse_document(&page.html()?))? {
            return Ok(RunOutcome::Skipped(SkipReason::NotEligible));
        }

        let Some(html) = wait_for_content(page, self.detect.content_wait, self.detect.content_poll)?
        else {
            info!(url = ?url, "player cards not loaded yet, will retry on next trigger");
            return Ok(RunOutcome::Skipped(SkipReason::ContentNotReady));
        };

        let (generation, room) = {
            let mut state = self.state.lock().expect("detection state lock poisoned");
            state.last_url = url.clone();
            state.last_run_at = Some(Instant::now());
            (state.generation, state.room_id.clone())
        };

        self.renderer.clear_badges();

        let nicknames = room_nicknames(&scrape_room(&Html::parse_document(&html))?);
        if nicknames.is_empty() {
            info!(room = ?room, "no players found on page");
            return Ok(RunOutcome::NoPlayers { room_id: room });
        }
        info!(room = ?room, players = nicknames.len(), "running smurf detection");

        let bundles = self.directory.fetch_many(&nicknames);
        let assessments = self.assess(&nicknames, &bundles);
        let room_avg_elo = average_elo(bundles.values().filter_map(|b| b.profile.elo));

        if self.is_stale(page, generation, room.as_deref()) {
            info!(room = ?room, "room changed during run, discarding results");
            return Ok(RunOutcome::Stale { room_id: room });
        }

        let by_nick: HashMap<String, &SmurfAssessment> = assessments
            .iter()
            .map(|a| (a.nickname.to_lowercase(), a))
            .collect();
        let fresh = scrape_room(&Html::parse_document(&page.html()?))?;
        let mut placed = 0;
        for placement in fresh.placements() {
            if let Some(assessment) = by_nick.get(&placement.nickname.to_lowercase()) {
                self.renderer.place_badge(assessment, placement.anchor);
                placed += 1;
            }
        }

        info!(
            room = ?room,
            resolved = bundles.len(),
            flagged = assessments.len(),
            placed,
            "smurf detection finished"
        );
        Ok(RunOutcome::Completed(RunReport {
            url,
            room_id: room,
            nicknames,
            resolved: bundles.len(),
            assessments,
            placed,
            room_avg_elo,
        }))
    }

    /// Scores in page order so the output is stable across runs.
    fn assess(
        &self,
        nicknames: &[String],
        bundles: &HashMap<String, PlayerBundle>,
    ) -> Vec<SmurfAssessment> {
        nicknames
            .iter()
            .filter_map(|nick| {
                let bundle = bundles.get(nick)?;
                let stats = bundle.stats.as_ref()?;
                let mut assessment = score(&bundle.profile, stats, &self.scoring)?;
                if assessment.nickname.is_empty() {
                    assessment.nickname = nick.clone();
                }
                Some(assessment)
            })
            .collect()
    }

    fn is_stale(&self, page: &dyn PageSource, generation: u64, room: Option<&str>) -> bool {
        let current_room = page.url().as_deref().and_then(room_id);
        let state = self.state.lock().expect("detection state lock poisoned");
        state.generation != generation || current_room.as_deref() != room
    }

    fn hide_campaigns(&self, page: &dyn PageSource) {
        let widgets = page
            .html()
            .and_then(|html| find_campaign_widgets(&Html::parse_document(&html)));
        match widgets {
            Ok(widgets) => {
                for widget in &widgets {
                    self.renderer.hide_widget(widget);
                }
                if !widgets.is_empty() {
                    debug!(count = widgets.len(), "hid campaign widgets");
                }
            }
            Err(err) => warn!(error = %err, "campaign scan failed"),
        }
    }
}

/// Single consumer for page triggers. Triggers that queued up during a run are dropped once it
/// finishes; the thread exits when the trigger channel closes or the delta receiver goes away.
pub fn spawn_detector(
    orchestrator: Arc<Orchestrator>,
    page: Arc<dyn PageSource>,
    triggers: Receiver<Trigger>,
    deltas: Sender<Delta>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        while let Ok(trigger) = triggers.recv() {
            let outcome = orchestrator.on_trigger(page.as_ref(), trigger);
            let dropped = triggers.try_iter().count();
            if dropped > 0 {
                debug!(dropped, "dropped triggers queued during run");
            }
            for delta in outcome_deltas(&outcome) {
                if deltas.send(delta).is_err() {
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::model::{PlayerProfile, PlayerStats};
    use crate::page::MemoryPage;
    use crate::settings::SystemSettings;
    use crate::store::MemoryStore;

    const ROOM_A: &str = "https://www.faceit.com/en/cs2/room/1-aaaa1111-bbbb-cccc-dddd-eeeeffff0000";
    const ROOM_B: &str = "https://www.faceit.com/en/cs2/room/1-9999aaaa-bbbb-cccc-dddd-eeeeffff0000";

    fn room_html(names: &[&str]) -> String {
        let cards: String = names
            .iter()
            .map(|n| {
                format!(
                    r#"<div type="button" aria-haspopup="dialog"><span class="Nickname">{n}</span></div>"#
                )
            })
            .collect();
        format!("<html><body><div><span>Players</span><div>{cards}</div></div></body></html>")
    }

    fn smurf_bundle(nick: &str) -> PlayerBundle {
        PlayerBundle {
            profile: PlayerProfile {
                player_id: format!("id-{nick}"),
                nickname: nick.to_string(),
                skill_level: Some(2),
                country: None,
                elo: Some(700),
            },
            stats: Some(PlayerStats {
                matches_played: 12,
                win_rate_percent: 80,
                avg_kills: 25,
                avg_kd_ratio: 2.1,
                avg_kr_ratio: 1.6,
                avg_headshot_percent: 55,
                avg_adr: 95,
            }),
            history: None,
        }
    }

    /// Resolves every nickname as a smurf; optionally flips the page URL mid-run.
    struct FakeDirectory {
        calls: AtomicUsize,
        navigate_to: Option<(Arc<MemoryPage>, &'static str)>,
    }

    impl PlayerDirectory for FakeDirectory {
        fn fetch_many(&self, nicknames: &[String]) -> HashMap<String, PlayerBundle> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some((page, url)) = &self.navigate_to {
                page.set_url(Some(url));
            }
            nicknames
                .iter()
                .map(|n| (n.clone(), smurf_bundle(n)))
                .collect()
        }
    }

    #[derive(Default)]
    struct CountingRenderer {
        clears: AtomicUsize,
        placed: Mutex<Vec<String>>,
        hidden: AtomicUsize,
    }

    impl PageRenderer for CountingRenderer {
        fn clear_badges(&self) {
            self.clears.fetch_add(1, Ordering::SeqCst);
        }
        fn place_badge(&self, assessment: &SmurfAssessment, _anchor: &Anchor) {
            self.placed.lock().unwrap().push(assessment.nickname.clone());
        }
        fn hide_widget(&self, _widget: &CampaignWidget) {
            self.hidden.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn quick_config() -> DetectConfig {
        DetectConfig {
            cooldown: Duration::ZERO,
            content_wait: Duration::ZERO,
            content_poll: Duration::from_millis(1),
        }
    }

    fn orchestrator(
        directory: Arc<FakeDirectory>,
        renderer: Arc<CountingRenderer>,
        detect: DetectConfig,
    ) -> Orchestrator {
        Orchestrator::new(
            directory,
            renderer,
            Arc::new(MemoryStore::new()),
            ScoringConfig::default(),
            detect,
        )
    }

    fn directory() -> Arc<FakeDirectory> {
        Arc::new(FakeDirectory {
            calls: AtomicUsize::new(0),
            navigate_to: None,
        })
    }

    #[test]
    fn same_url_runs_once() {
        let dir = directory();
        let renderer = Arc::new(CountingRenderer::default());
        let orch = orchestrator(dir.clone(), renderer.clone(), quick_config());
        let page = MemoryPage::new(Some(ROOM_A), room_html(&["alpha", "beta"]));

        let first = orch.on_trigger(&page, Trigger::Mutation);
        let RunOutcome::Completed(report) = first else {
            panic!("expected completed run, got {first:?}");
        };
        assert_eq!(report.placed, 2);
        assert_eq!(report.room_avg_elo, Some(700.0));

        let second = orch.on_trigger(&page, Trigger::Mutation);
        assert_eq!(second, RunOutcome::Skipped(SkipReason::SameUrl));
        assert_eq!(dir.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*renderer.placed.lock().unwrap(), vec!["alpha", "beta"]);
        assert!(!orch.is_running());
    }

    #[test]
    fn manual_rerun_respects_cooldown() {
        let dir = directory();
        let renderer = Arc::new(CountingRenderer::default());
        let detect = DetectConfig {
            cooldown: Duration::from_secs(60),
            ..quick_config()
        };
        let orch = orchestrator(dir.clone(), renderer, detect);
        let page = MemoryPage::new(Some(ROOM_A), room_html(&["alpha", "beta"]));

        assert!(matches!(
            orch.on_trigger(&page, Trigger::Navigation),
            RunOutcome::Completed(_)
        ));
        assert_eq!(
            orch.on_trigger(&page, Trigger::Manual),
            RunOutcome::Skipped(SkipReason::CoolingDown)
        );
        assert_eq!(dir.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn not_ready_page_is_retried_later() {
        let dir = directory();
        let renderer = Arc::new(CountingRenderer::default());
        let orch = orchestrator(dir.clone(), renderer, quick_config());
        let page = MemoryPage::new(Some(ROOM_A), "<html><body>loading</body></html>");

        assert_eq!(
            orch.on_trigger(&page, Trigger::Mutation),
            RunOutcome::Skipped(SkipReason::ContentNotReady)
        );
        assert_eq!(orch.state().last_url, None);

        page.set_html(room_html(&["alpha", "beta"]));
        assert!(matches!(
            orch.on_trigger(&page, Trigger::Mutation),
            RunOutcome::Completed(_)
        ));
    }

    #[test]
    fn ineligible_page_is_skipped() {
        let dir = directory();
        let orch = orchestrator(dir.clone(), Arc::new(CountingRenderer::default()), quick_config());
        let page = MemoryPage::new(Some("https://www.faceit.com/en/home"), "<p>feed</p>");
        assert_eq!(
            orch.on_trigger(&page, Trigger::Navigation),
            RunOutcome::Skipped(SkipReason::NotEligible)
        );
        assert_eq!(dir.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn room_change_mid_run_discards_output() {
        let page = Arc::new(MemoryPage::new(Some(ROOM_A), room_html(&["alpha", "beta"])));
        let dir = Arc::new(FakeDirectory {
            calls: AtomicUsize::new(0),
            navigate_to: Some((page.clone(), ROOM_B)),
        });
        let renderer = Arc::new(CountingRenderer::default());
        let orch = orchestrator(dir, renderer.clone(), quick_config());

        let outcome = orch.on_trigger(page.as_ref(), Trigger::Navigation);
        assert!(matches!(outcome, RunOutcome::Stale { .. }));
        assert!(renderer.placed.lock().unwrap().is_empty());
        assert!(!orch.is_running());
    }

    #[test]
    fn disabled_detection_skips_everything() {
        let store = Arc::new(MemoryStore::new());
        settings::save(
            store.as_ref(),
            &SystemSettings {
                smurf_detection: false,
                ..SystemSettings::default()
            },
        )
        .unwrap();
        let dir = directory();
        let orch = Orchestrator::new(
            dir.clone(),
            Arc::new(CountingRenderer::default()),
            store,
            ScoringConfig::default(),
            quick_config(),
        );
        let page = MemoryPage::new(Some(ROOM_A), room_html(&["alpha", "beta"]));
        assert_eq!(
            orch.on_trigger(&page, Trigger::Navigation),
            RunOutcome::Skipped(SkipReason::Disabled)
        );
        assert_eq!(dir.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn guard_blocks_reentry_and_releases() {
        let flag = AtomicBool::new(false);
        {
            let _held = RunGuard::acquire(&flag).unwrap();
            assert!(RunGuard::acquire(&flag).is_none());
        }
        assert!(RunGuard::acquire(&flag).is_some());
    }

    /// Parks inside `fetch_many` until the test releases it.
    struct BlockingDirectory {
        calls: AtomicUsize,
        entered: Mutex<Sender<()>>,
        release: Mutex<Receiver<()>>,
    }

    impl PlayerDirectory for BlockingDirectory {
        fn fetch_many(&self, nicknames: &[String]) -> HashMap<String, PlayerBundle> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
            nicknames
                .iter()
                .map(|n| (n.clone(), smurf_bundle(n)))
                .collect()
        }
    }

    #[test]
    fn trigger_during_active_run_is_a_no_op() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let dir = Arc::new(BlockingDirectory {
            calls: AtomicUsize::new(0),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let renderer = Arc::new(CountingRenderer::default());
        let orch = Orchestrator::new(
            dir.clone(),
            renderer.clone(),
            Arc::new(MemoryStore::new()),
            ScoringConfig::default(),
            quick_config(),
        );
        let page = MemoryPage::new(Some(ROOM_A), room_html(&["alpha", "beta"]));

        thread::scope(|scope| {
            let first = scope.spawn(|| orch.on_trigger(&page, Trigger::Navigation));
            entered_rx.recv().unwrap();
            assert!(orch.is_running());
            assert_eq!(
                orch.on_trigger(&page, Trigger::Manual),
                RunOutcome::Skipped(SkipReason::AlreadyRunning)
            );
            release_tx.send(()).unwrap();
            assert!(matches!(first.join().unwrap(), RunOutcome::Completed(_)));
        });

        assert_eq!(dir.calls.load(Ordering::SeqCst), 1);
        assert_eq!(renderer.placed.lock().unwrap().len(), 2);
        assert!(!orch.is_running());
        assert_eq!(
            orch.on_trigger(&page, Trigger::Mutation),
            RunOutcome::Skipped(SkipReason::SameUrl)
        );
    }
}
