//! Parley - real-time private-messaging backend.
//!
//! The core is three cooperating subsystems: a websocket fan-out hub with
//! slow-consumer eviction, a score-ordered job queue with a retry/DLQ
//! pipeline, and a message write path over a bifurcated store (relational
//! room metadata plus an ordered message log).

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod workers;
