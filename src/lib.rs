pub mod cache;
pub mod campaigns;
pub mod config;
pub mod detect;
pub mod elo;
pub mod error;
pub mod http_client;
pub mod legacy_api;
pub mod model;
pub mod open_api;
pub mod page;
pub mod player_fetch;
pub mod scrape;
pub mod settings;
pub mod smurf_score;
pub mod state;
pub mod store;
pub mod values;
