//! Breezy CRM API Library
//!
//! This library provides the core functionality for the Breezy CRM API, a
//! proxy service in front of the HubSpot CRM REST API and the Gemini
//! completion API: outbound CRM clients, per-contact aggregation, creation
//! chains with best-effort side-effects, AI insight composition, data
//! models, and HTTP handlers.
//!
//! # Modules
//!
//! - `aggregation`: Per-contact deal/line-item/subscription read paths.
//! - `config`: Configuration management.
//! - `errors`: Error handling types and duplicate-contact remapping.
//! - `gemini`: Gemini completion API client.
//! - `handlers`: HTTP request handlers and shared state.
//! - `hubspot`: HubSpot CRM API client and portal constants.
//! - `insight`: Customer-health metrics, prompt templating, and parsing.
//! - `models`: Wire shapes for the CRM pass-through and the API surface.
//! - `orders`: Contact/deal creation chains with side-effect reporting.

pub mod aggregation;
pub mod config;
pub mod errors;
pub mod gemini;
pub mod handlers;
pub mod hubspot;
pub mod insight;
pub mod models;
pub mod orders;
