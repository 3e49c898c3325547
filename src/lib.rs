//! carelog — session bootstrap, auth event fan-out, page session guard and
//! route middleware for the record-keeping app.
//!
//! ARCHITECTURE
//! ============
//! `config` is read once at startup. `auth` holds the client-side core
//! (session store, event bus, session guard) that page hosts embed.
//! `middleware` and `routes` form the HTTP boundary served by `main`.

pub mod auth;
pub mod config;
pub mod middleware;
pub mod routes;
pub mod state;
