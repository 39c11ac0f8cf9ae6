//! Emitterscope - Filtered views over wireless emitter observations.
//!
//! # Overview
//!
//! Emitterscope holds one canonical filter state for a surveillance
//! dashboard and turns it into parameterized SQLite queries. Every page of
//! the dashboard sends the same `{filters, enabled}` pair; each result comes
//! back with a report of which filters were applied and which were ignored
//! and why.
//!
//! # Explicit-only filtering
//!
//! A filter applies only when its `enabled` flag is `true`. A populated but
//! disabled filter behaves exactly like an absent one.
//!
//! # Modules
//!
//! - [`filters`]: The versioned filter vocabulary and typed values
//! - [`capability`]: Per-surface capability tables and the adapter
//! - [`validation`]: Request validation collecting every violation
//! - [`compiler`]: Filter compiler for list, count, geospatial, observation and analytics shapes
//! - [`transparency`]: Threat reasons and evidence for flagged emitters
//! - [`storage`]: SQLite storage layer
//! - [`dashboard`]: Dashboard metrics with degradable severity counts
//! - [`api`]: HTTP API handlers
//! - [`client`]: Debounced HTTP client for a single surface

pub mod api;
pub mod capability;
pub mod client;
pub mod compiler;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod filters;
pub mod model;
pub mod storage;
pub mod transparency;
pub mod validation;
