//! Discovery and polling client for the Velleman VM201 relay/IO board.
//!
//! The board has no API; everything is scraped from its HTML pages.

pub mod models {
    pub mod vm201;
}

pub mod client;
pub mod config;
pub mod parser;
pub mod simulate;
pub mod transport;
pub mod services {
    pub mod poller;
}
