// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Virtual IBAN reconciliation service.
//!
//! Takes account events reported by a banking partner (balances, booked
//! transactions, payee verification holds) and maps them exactly once onto
//! top-up requests, orders and account balances.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Bearer token authentication and roles
//! - `jobs` - Periodic payment sync, reconciliation, validation and expiry
//! - `providers` - Banking partner clients
//! - `storage` - redb ledger, repositories and audit log
//! - `viban` - Reconciliation engine

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod jobs;
pub mod models;
pub mod providers;
pub mod state;
pub mod storage;
pub mod viban;

#[cfg(test)]
mod testing;
