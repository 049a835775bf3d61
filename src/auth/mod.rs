// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Callers present `Authorization: Bearer <session token>` issued by the
//! platform session service.
//!
//! - With `AUTH_JWT_SECRET` set, tokens are verified as HS256 with expiry,
//!   not-before and (optionally) issuer checks and 60 seconds of clock skew.
//! - Without it the server runs in development mode: claims are decoded
//!   without a signature check and only expiry is enforced.
//!
//! `sub` becomes the user id and the `role` claim selects [`Role`].

pub mod claims;
pub mod error;
pub mod extractor;
pub mod roles;

pub use claims::{AuthenticatedUser, SessionClaims};
pub use error::AuthError;
pub use extractor::{AdminOnly, Auth};
pub use roles::Role;
