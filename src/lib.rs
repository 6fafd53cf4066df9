//! # complaint-locator
//!
//! Location acquisition and reverse geocoding for location-tagged complaints.
//!
//! A handheld device reports noisy, slowly converging position fixes (or
//! refuses to report any). This crate turns that stream into a stable
//! coordinate with a trust tier, and that coordinate into a readable address
//! with a few nearby landmarks, without ever blocking the surrounding form.
//!
//! ## Features
//!
//! - Jump rejection and accuracy-weighted smoothing of raw fixes
//! - A 20 second acquisition window with early exit on a precise fix
//! - Fallback to the last known good fix, then to a coarse network position
//! - Debounced reverse geocoding with a primary and secondary provider
//! - Nearby shop, college and temple enrichment from OpenStreetMap
//! - Respect for addresses the user typed in by hand

// Export modules for integration testing
pub mod acquisition;
pub mod config;
pub mod filter;
pub mod format;
pub mod geo;
pub mod geocode;
pub mod poi;
pub mod position;
pub mod replay;
pub mod resolver;
pub mod status;
pub mod store;
