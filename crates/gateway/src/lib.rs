//! The external surface of AgentMaestro: HTTP API, WebSocket streams,
//! session resolution, bootstrap wiring, and the administrative CLI.

pub mod api;
pub mod auth;
pub mod bootstrap;
pub mod cli;
pub mod state;
pub mod ws;
