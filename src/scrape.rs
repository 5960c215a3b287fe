//! Match-room scraping: team containers, player cards and one nickname per card.
//!
//! Team containers are located by the first strategy in `STRATEGIES` that yields anything. Every
//! element handed out is addressed by a `NodePath` so a renderer can resolve it against the same
//! document later.

use std::collections::HashSet;

use anyhow::{Context, Result, anyhow};
use once_cell::sync::OnceCell;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::debug;

const PLAYERS_LABEL: &str = "Players";
const MAX_ANCESTOR_DEPTH: usize = 10;
const MAX_CARD_CLIMB: usize = 5;
const MIN_MARKERS: usize = 2;

struct Selectors {
    dialog_button: Selector,
    avatar: Selector,
    avatar_class: Selector,
    holder: Selector,
    label: Selector,
    nickname: Selector,
    name: Selector,
    list_content: Selector,
    icon: Selector,
    nickname_safe: Regex,
}

static SELECTORS: OnceCell<Selectors> = OnceCell::new();

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|err| anyhow!("invalid selector {css}: {err}"))
}

fn selectors() -> Result<&'static Selectors> {
    SELECTORS.get_or_try_init(|| {
        Ok(Selectors {
            dialog_button: selector(r#"[type="button"][aria-haspopup="dialog"]"#)?,
            avatar: selector(r#"img[aria-label="avatar"]"#)?,
            avatar_class: selector(r#"[class*="Avatar"]"#)?,
            holder: selector(r#"[class*="ListContentPlayer__Holder"]"#)?,
            label: selector("span, div")?,
            nickname: selector(r#"[class*="Nickname"]"#)?,
            name: selector(r#"[class*="Name"]"#)?,
            list_content: selector(
                r#"[data-testid="ListContentPlayer"], .ListContentPlayer, [class*="ListContentPlayer"]"#,
            )?,
            icon: selector("svg")?,
            nickname_safe: Regex::new(r"^[\w\-\[\]\.]+$").context("nickname pattern")?,
        })
    })
}

/// Child-element indices from the document root down to an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodePath(pub Vec<usize>);

impl NodePath {
    pub fn of(el: ElementRef<'_>) -> Self {
        let mut indices = Vec::new();
        let mut node = *el;
        while let Some(parent) = node.parent() {
            let idx = parent
                .children()
                .filter(|c| c.value().is_element())
                .position(|c| c.id() == node.id())
                .unwrap_or(0);
            indices.push(idx);
            node = parent;
        }
        indices.reverse();
        NodePath(indices)
    }

    pub fn resolve<'a>(&self, doc: &'a Html) -> Option<ElementRef<'a>> {
        let mut node = doc.tree.root();
        for idx in &self.0 {
            node = node.children().filter(|c| c.value().is_element()).nth(*idx)?;
        }
        ElementRef::wrap(node)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnchorPosition {
    Before,
    After,
}

/// Where a badge goes relative to `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    pub target: NodePath,
    pub position: AnchorPosition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedCard {
    pub card: NodePath,
    pub nickname: Option<String>,
    pub anchor: Option<Anchor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScrapedTeam {
    pub container: NodePath,
    pub strategy: &'static str,
    pub cards: Vec<ScrapedCard>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoomScrape {
    pub teams: Vec<ScrapedTeam>,
}

/// A card with a nickname and somewhere to put its badge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement<'a> {
    pub nickname: &'a str,
    pub anchor: &'a Anchor,
}

impl RoomScrape {
    pub fn cards(&self) -> impl Iterator<Item = &ScrapedCard> {
        self.teams.iter().flat_map(|t| t.cards.iter())
    }

    pub fn placements(&self) -> impl Iterator<Item = Placement<'_>> {
        self.cards().filter_map(|card| {
            Some(Placement {
                nickname: card.nickname.as_deref()?,
                anchor: card.anchor.as_ref()?,
            })
        })
    }
}

type Strategy = for<'a> fn(&'a Html, &Selectors) -> Vec<ElementRef<'a>>;

const STRATEGIES: &[(&str, Strategy)] = &[
    ("exact-label", exact_label_containers),
    ("contains-label", contains_label_containers),
    ("marker-clusters", marker_cluster_containers),
];

pub fn scrape_room_html(html: &str) -> Result<RoomScrape> {
    let doc = Html::parse_document(html);
    scrape_room(&doc)
}

pub fn scrape_room(doc: &Html) -> Result<RoomScrape> {
    let sel = selectors()?;
    for &(name, strategy) in STRATEGIES {
        let containers = dedupe(strategy(doc, sel));
        if containers.is_empty() {
            continue;
        }
        debug!(strategy = name, teams = containers.len(), "found team containers");
        let teams = containers
            .into_iter()
            .map(|container| ScrapedTeam {
                container: NodePath::of(container),
                strategy: name,
                cards: player_cards(container, sel)
                    .into_iter()
                    .map(|card| scrape_card(card, sel))
                    .collect(),
            })
            .collect();
        return Ok(RoomScrape { teams });
    }
    debug!("no team containers found");
    Ok(RoomScrape::default())
}

/// Unique nicknames in page order.
pub fn room_nicknames(scrape: &RoomScrape) -> Vec<String> {
    let mut seen = HashSet::new();
    scrape
        .cards()
        .filter_map(|card| card.nickname.clone())
        .filter(|nick| seen.insert(nick.clone()))
        .collect()
}

/// Player-card markers anywhere in the document. Used as the eligibility fallback and as the
/// "content loaded" signal.
pub fn has_player_markers(doc: &Html) -> Result<bool> {
    let sel = selectors()?;
    Ok(doc.select(&sel.dialog_button).next().is_some()
        || doc.select(&sel.avatar).next().is_some()
        || doc.select(&sel.holder).next().is_some())
}

fn exact_label_containers<'a>(doc: &'a Html, sel: &Selectors) -> Vec<ElementRef<'a>> {
    doc.select(&sel.label)
        .filter(|el| text_of(*el) == PLAYERS_LABEL)
        .filter_map(|el| marker_ancestor(el, sel))
        .collect()
}

fn contains_label_containers<'a>(doc: &'a Html, sel: &Selectors) -> Vec<ElementRef<'a>> {
    doc.select(&sel.label)
        .filter(|el| text_of(*el).contains(PLAYERS_LABEL))
        .filter(|el| {
            !el.select(&sel.label)
                .any(|inner| text_of(inner).contains(PLAYERS_LABEL))
        })
        .filter_map(|el| marker_ancestor(el, sel))
        .collect()
}

fn marker_cluster_containers<'a>(doc: &'a Html, sel: &Selectors) -> Vec<ElementRef<'a>> {
    let mut markers: Vec<ElementRef<'a>> = doc.select(&sel.dialog_button).collect();
    if markers.is_empty() {
        markers = doc.select(&sel.avatar).collect();
    }
    markers
        .into_iter()
        .filter_map(|marker| marker_ancestor(marker, sel))
        .collect()
}

/// Nearest element (itself included) within the depth bound holding enough markers.
fn marker_ancestor<'a>(start: ElementRef<'a>, sel: &Selectors) -> Option<ElementRef<'a>> {
    std::iter::successors(Some(start), |el| el.parent().and_then(ElementRef::wrap))
        .take(MAX_ANCESTOR_DEPTH + 1)
        .find(|el| has_enough_markers(*el, sel))
}

fn has_enough_markers(el: ElementRef<'_>, sel: &Selectors) -> bool {
    el.select(&sel.dialog_button).nth(MIN_MARKERS - 1).is_some()
        || el.select(&sel.avatar).nth(MIN_MARKERS - 1).is_some()
}

fn dedupe(containers: Vec<ElementRef<'_>>) -> Vec<ElementRef<'_>> {
    let mut seen = HashSet::new();
    containers
        .into_iter()
        .filter(|el| seen.insert(el.id()))
        .collect()
}

fn player_cards<'a>(container: ElementRef<'a>, sel: &Selectors) -> Vec<ElementRef<'a>> {
    let buttons: Vec<ElementRef<'a>> = container.select(&sel.dialog_button).collect();
    if !buttons.is_empty() {
        return buttons;
    }

    let avatar_cards: Vec<ElementRef<'a>> = container
        .select(&sel.avatar)
        .filter_map(closest_div)
        .collect();
    if !avatar_cards.is_empty() {
        return dedupe(avatar_cards);
    }

    let nickname_cards = container
        .select(&sel.nickname)
        .filter_map(|nick| {
            let climbed = std::iter::successors(nick.parent().and_then(ElementRef::wrap), |el| {
                el.parent().and_then(ElementRef::wrap)
            })
            .take(MAX_CARD_CLIMB)
            .find(|el| {
                el.select(&sel.avatar).next().is_some()
                    || el.select(&sel.dialog_button).next().is_some()
                    || el.select(&sel.avatar_class).next().is_some()
            });
            climbed.or_else(|| closest_div(nick))
        })
        .collect();
    dedupe(nickname_cards)
}

fn closest_div(el: ElementRef<'_>) -> Option<ElementRef<'_>> {
    std::iter::successors(Some(el), |e| e.parent().and_then(ElementRef::wrap))
        .find(|e| e.value().name() == "div")
}

fn scrape_card(card: ElementRef<'_>, sel: &Selectors) -> ScrapedCard {
    let found = find_nickname(card, sel);
    let anchor = match card.select(&sel.list_content).next() {
        Some(list) => Some(Anchor {
            target: NodePath::of(list),
            position: AnchorPosition::Before,
        }),
        None => found.as_ref().map(|(el, _)| Anchor {
            target: NodePath::of(*el),
            position: AnchorPosition::After,
        }),
    };
    ScrapedCard {
        card: NodePath::of(card),
        nickname: found.map(|(_, nick)| nick),
        anchor,
    }
}

fn find_nickname<'a>(card: ElementRef<'a>, sel: &Selectors) -> Option<(ElementRef<'a>, String)> {
    let by_class = |class_sel: &Selector| {
        card.select(class_sel).find_map(|el| {
            let text = text_of(el);
            (!text.is_empty() && el.select(&sel.icon).next().is_none()).then_some((el, text))
        })
    };
    if let Some(found) = by_class(&sel.nickname).or_else(|| by_class(&sel.name)) {
        return Some(found);
    }

    let leaves: Vec<(ElementRef<'a>, String)> = card
        .descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() != "svg" && el.children().all(|c| !c.value().is_element()))
        .filter_map(|el| {
            let text = text_of(el);
            (!text.is_empty()).then_some((el, text))
        })
        .collect();

    let mut best: Option<&(ElementRef<'a>, String)> = None;
    for leaf in leaves.iter().filter(|(_, text)| sel.nickname_safe.is_match(text)) {
        if best.is_none_or(|(_, b)| leaf.1.chars().count() > b.chars().count()) {
            best = Some(leaf);
        }
    }
    best.or_else(|| leaves.first()).cloned()
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}
