//! Core library of the materials calculator.
//!
//! A [`Store`] owns the SQLite file, the repository functions in [`db`] map
//! materials and calculation records onto it, the [`Calculator`] does the
//! arithmetic, and a [`Session`] ties one request together. The binary in
//! `main.rs` only resolves configuration and dispatches to [`cli::run`].
pub mod calculator;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod geometry;
pub mod models;
pub mod session;

pub use calculator::Calculator;
pub use config::Config;
pub use db::{Repository, Store};
pub use error::{Error, Result};
pub use models::{
    CalculationRecord, Estimate, Material, Quote, RecordFilter, Statistics, StoreInfo,
};
pub use session::Session;
