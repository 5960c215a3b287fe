use std::fs;
use std::path::PathBuf;

use scraper::Html;

use smurf_radar::campaigns::find_campaign_widgets;
use smurf_radar::scrape::{AnchorPosition, has_player_markers, room_nicknames, scrape_room};

fn read_fixture(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    fs::read_to_string(path).expect("fixture file should be readable")
}

#[test]
fn match_room_fixture_has_two_full_teams() {
    let doc = Html::parse_document(&read_fixture("match_room.html"));
    assert!(has_player_markers(&doc).unwrap());

    let scrape = scrape_room(&doc).unwrap();
    assert_eq!(scrape.teams.len(), 2);
    assert!(scrape.teams.iter().all(|t| t.cards.len() == 5));
    assert_eq!(
        room_nicknames(&scrape),
        vec![
            "fresh_acc",
            "NiKo_fan",
            "[AUT]kebab",
            "m0nesy.jr",
            "ghost-5k",
            "okuda",
            "ZywOo_wannabe",
            "pashaBiceps2",
            "xX_rush_Xx",
            "lowkey",
        ]
    );
}

#[test]
fn badges_anchor_before_the_player_list_content() {
    let doc = Html::parse_document(&read_fixture("match_room.html"));
    let scrape = scrape_room(&doc).unwrap();

    let placements: Vec<_> = scrape.placements().collect();
    assert_eq!(placements.len(), 10);
    for placement in placements {
        assert_eq!(placement.anchor.position, AnchorPosition::Before);
        let target = placement.anchor.target.resolve(&doc).expect("anchor resolves");
        assert_eq!(target.value().attr("data-testid"), Some("ListContentPlayer"));
    }
}

#[test]
fn card_paths_resolve_to_dialog_buttons() {
    let doc = Html::parse_document(&read_fixture("match_room.html"));
    let scrape = scrape_room(&doc).unwrap();
    for card in scrape.cards() {
        let el = card.card.resolve(&doc).expect("card resolves");
        assert_eq!(el.value().attr("aria-haspopup"), Some("dialog"));
    }
}

#[test]
fn match_room_fixture_has_one_campaign_widget() {
    let doc = Html::parse_document(&read_fixture("match_room.html"));
    let widgets = find_campaign_widgets(&doc).unwrap();
    assert_eq!(widgets.len(), 1);

    let el = widgets[0].path.resolve(&doc).unwrap();
    let class = el.value().attr("class").unwrap();
    assert!(class.contains("CampaignWidget__StyledSingleCampaignWidget"));
}

#[test]
fn page_without_players_scrapes_empty() {
    let doc = Html::parse_document(
        "<html><body><main><h1>Matchmaking</h1><p>Find a match</p></main></body></html>",
    );
    assert!(!has_player_markers(&doc).unwrap());
    let scrape = scrape_room(&doc).unwrap();
    assert!(scrape.teams.is_empty());
    assert!(find_campaign_widgets(&doc).unwrap().is_empty());
}
