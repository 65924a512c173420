//! Hypeloop admin dashboard core.
//!
//! View-models for the admin screens (dashboard, leads, possible clients,
//! clients, internal ops, login) over a hosted Supabase project. Every list
//! mutation is optimistic and rolls back on failure.

pub mod backend;
pub mod board;
pub mod error;
pub mod instagram;
pub mod optimistic;
pub mod realtime;
pub mod routes;
pub mod session_gate;
pub mod state;
pub mod types;
pub mod views;
