//! Live polls, comment threads and admin analytics for an online academy,
//! served over HTTP with server-sent events and a WebSocket.

pub mod aggregator;
pub mod controllers;
pub mod db;
pub mod middleware;
pub mod models;
pub mod realtime;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;
