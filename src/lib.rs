//! floodwatch: river gauge flood early-warning feed.
//!
//! Polls a geospatial feature-query service for gauge readings, reduces them
//! to one current snapshot per station, classifies each station against its
//! flood thresholds, and groups stations by river basin.

pub mod config;
pub mod controller;
pub mod error;
pub mod fetcher;
pub mod model;
pub mod pipeline;
