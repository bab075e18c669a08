//! Forecast calibration core: fits and scores the two-parameter uplift model
//! (promo elasticity alpha, rebate drag beta) over monthly brand × canton
//! series, and persists per-scope parameter overrides.
//!
//! Data flow:
//!   TimeSeriesRow → features → fit_strategy → forecast → metrics
//!                                   ↓
//!                   session (active / candidate) ↔ store

pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod features;
pub mod fit_strategy;
pub mod forecast;
pub mod metrics;
pub mod scope;
pub mod session;
pub mod solver;
pub mod store;
pub mod types;
pub mod window;
