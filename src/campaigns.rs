use std::collections::HashSet;

use anyhow::{Result, anyhow};
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

use crate::scrape::NodePath;

const CANDIDATE_SELECTORS: &[&str] = &[
    r#"div[class*="Card"][class*="CampaignWidget__StyledSingleCampaignWidget"]"#,
    r#"div[class*="CampaignWidget__Styled"]"#,
    r#"div[class*="SingleCampaignWidget"]"#,
    r#"div[class*="Card"][class*="CampaignWidget"]"#,
];

const STRUCTURE_SELECTOR: &str = r#"[class*="RewardTag"], [class*="MissionProgressCounterText"], [class*="BaseCampaignWidget__Content"], [class*="BaseCampaignWidget__Overline"]"#;

const CAMPAIGN_TEXT: &[&str] = &[
    "In progress",
    "Ends in",
    "Go to",
    "Complete",
    "Mission",
    "Reward",
    "депозит",
    "Winline",
];

/// A promotional widget the renderer should hide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignWidget {
    pub path: NodePath,
}

/// Candidates need a structural campaign indicator and campaign wording both; either alone is
/// not enough.
pub fn find_campaign_widgets(doc: &Html) -> Result<Vec<CampaignWidget>> {
    let structure = parse(STRUCTURE_SELECTOR)?;
    let mut seen = HashSet::new();
    let mut widgets = Vec::new();

    for css in CANDIDATE_SELECTORS {
        let candidates = parse(css)?;
        for el in doc.select(&candidates) {
            if !seen.insert(el.id()) {
                continue;
            }
            if is_campaign(el, &structure) {
                widgets.push(CampaignWidget {
                    path: NodePath::of(el),
                });
            }
        }
    }
    Ok(widgets)
}

fn is_campaign(el: ElementRef<'_>, structure: &Selector) -> bool {
    if el.parent().and_then(ElementRef::wrap).is_none() {
        return false;
    }
    if el.select(structure).next().is_none() {
        return false;
    }
    let text: String = el.text().collect();
    CAMPAIGN_TEXT.iter().any(|marker| text.contains(marker))
}

fn parse(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|err| anyhow!("invalid selector {css}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_structure_and_text() {
        let html = r#"<html><body>
            <div class="Card__X CampaignWidget__StyledSingleCampaignWidget-a">
                <span class="RewardTag__Tag">50</span><p>Ends in 2d</p>
            </div>
            <div class="CampaignWidget__Styled-b"><p>Mission complete soon</p></div>
            <div class="SingleCampaignWidget-c"><span class="RewardTag-d">x</span><p>nothing here</p></div>
        </body></html>"#;
        let doc = Html::parse_document(html);
        let widgets = find_campaign_widgets(&doc).unwrap();
        assert_eq!(widgets.len(), 1);

        let el = widgets[0].path.resolve(&doc).unwrap();
        assert!(el.value().attr("class").unwrap().contains("StyledSingleCampaignWidget"));
    }

    #[test]
    fn overlapping_selectors_report_once() {
        let html = r#"<html><body>
            <div class="Card CampaignWidget__StyledSingleCampaignWidget SingleCampaignWidget">
                <div class="BaseCampaignWidget__Content">Go to missions</div>
            </div>
        </body></html>"#;
        let doc = Html::parse_document(html);
        assert_eq!(find_campaign_widgets(&doc).unwrap().len(), 1);
    }
}
