//! UniverseHub - space news ingestion
//!
//! Pulls articles from the Spaceflight News API and two Google News RSS
//! searches, gives every article a usable image, and keeps them in SQLite
//! behind a small JSON API.

pub mod config;
pub mod db;
pub mod fetcher;
pub mod images;
pub mod routes;
pub mod sources;
pub mod sync;
