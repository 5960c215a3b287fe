use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use regex::Regex;
use scraper::Html;
use tracing::debug;

use crate::scrape::has_player_markers;

const ROOM_PAGE_PATTERN: &str = r"^https://www\.faceit\.com/[a-z]{2}/cs2/(room|results)/[^/]+$";
const ROOM_ID_PATTERN: &str =
    r"room/([0-9a-z]+-[0-9a-z]+-[0-9a-z]+-[0-9a-z]+-[0-9a-z]+(?:-[0-9a-z]+)?)";

static ROOM_PAGE_RE: OnceCell<Regex> = OnceCell::new();
static ROOM_ID_RE: OnceCell<Regex> = OnceCell::new();

/// The live page as the orchestrator sees it: a URL and the current serialized DOM.
pub trait PageSource: Send + Sync {
    fn url(&self) -> Option<String>;
    fn html(&self) -> Result<String>;
}

/// An exported DOM snapshot on disk. The URL is read from `<snapshot>.url` when that file exists,
/// otherwise the fixed URL given at construction is used.
#[derive(Debug, Clone)]
pub struct FilePage {
    path: PathBuf,
    url: Option<String>,
}

impl FilePage {
    pub fn new(path: impl Into<PathBuf>, url: Option<String>) -> Self {
        Self {
            path: path.into(),
            url,
        }
    }

    fn sidecar_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".url");
        PathBuf::from(name)
    }
}

impl PageSource for FilePage {
    fn url(&self) -> Option<String> {
        fs::read_to_string(self.sidecar_path())
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| self.url.clone())
    }

    fn html(&self) -> Result<String> {
        fs::read_to_string(&self.path)
            .with_context(|| format!("read snapshot {}", self.path.display()))
    }
}

/// In-memory page whose URL and DOM can be swapped while a run is in flight.
#[derive(Debug, Default)]
pub struct MemoryPage {
    inner: Mutex<(Option<String>, String)>,
}

impl MemoryPage {
    pub fn new(url: Option<&str>, html: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new((url.map(str::to_string), html.into())),
        }
    }

    pub fn set_url(&self, url: Option<&str>) {
        self.inner.lock().expect("memory page lock poisoned").0 = url.map(str::to_string);
    }

    pub fn set_html(&self, html: impl Into<String>) {
        self.inner.lock().expect("memory page lock poisoned").1 = html.into();
    }
}

impl PageSource for MemoryPage {
    fn url(&self) -> Option<String> {
        self.inner.lock().expect("memory page lock poisoned").0.clone()
    }

    fn html(&self) -> Result<String> {
        Ok(self.inner.lock().expect("memory page lock poisoned").1.clone())
    }
}

pub fn is_eligible_url(url: &str) -> bool {
    ROOM_PAGE_RE
        .get_or_try_init(|| Regex::new(ROOM_PAGE_PATTERN))
        .is_ok_and(|re| re.is_match(url.trim()))
}

/// Room identity from a `room/<id>` URL segment.
pub fn room_id(url: &str) -> Option<String> {
    let re = ROOM_ID_RE
        .get_or_try_init(|| Regex::new(ROOM_ID_PATTERN))
        .ok()?;
    re.captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Polls `page` until player-card markers appear or `wait` runs out. Returns the ready HTML, or
/// `None` when the page was still loading at the deadline.
pub fn wait_for_content(
    page: &dyn PageSource,
    wait: Duration,
    poll: Duration,
) -> Result<Option<String>> {
    let deadline = Instant::now() + wait;
    loop {
        let html = page.html()?;
        if has_player_markers(&Html::parse_document(&html))? {
            return Ok(Some(html));
        }
        let now = Instant::now();
        if now >= deadline {
            debug!(wait_ms = wait.as_millis() as u64, "content markers never appeared");
            return Ok(None);
        }
        thread::sleep(poll.min(deadline - now));
    }
}
