//! Stock Ledger Library
//!
//! This crate provides the core stock-ledger functionality: every change to a
//! product's stock level is recorded as an immutable movement event, the
//! cached quantity on the product row is reconciled in the same transaction,
//! and an audit entry attributes the change to an actor. The HTTP/CRUD layer
//! that drives it lives elsewhere and calls in through [`services`] and
//! [`queries`].
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod queries;
pub mod services;

/// Products with a cached quantity strictly below this are reported by the
/// low-stock listing when no explicit threshold is given.
pub const LOW_STOCK_THRESHOLD: i32 = 5;
