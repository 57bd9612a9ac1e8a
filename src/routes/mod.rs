//! Router Module Index
//!
//! Routes are split by the privilege they require, so the guard is applied
//! per module rather than per endpoint.

/// Routes reachable without an authorized session.
pub mod public;

/// Routes behind the admin gate (any authorized role).
pub mod authenticated;

/// Routes restricted to SUPER_ADMIN.
pub mod admin;
