//! feed-refresh - a scheduled data-refresh job
//!
//! Polls a handful of external feeds (kernel.org releases, Slackware
//! mirrors, the FAIF podcast), derives one small value per source, and
//! persists each to a flat file slot with atomic replacement. Meant to be
//! run from cron; each run is a short sequential batch.

pub mod config;
pub mod fetch;
pub mod job;
pub mod shorten;
pub mod sources;
pub mod store;
