//! HTTP surface for manual sweep triggers and marker maintenance.
//!
//! - `GET  /health`
//! - `POST /api/sweeps/{domain}?kind=regular|urgent`
//! - `POST /api/maintenance/purge-markers`

pub mod middleware;
pub mod routes;
pub mod state;
