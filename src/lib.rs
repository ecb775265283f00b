//! Load generator for RTMP media servers.
//!
//! A test run spawns one publisher per simulated model and, once a
//! publisher is live, `client_count` players on the same stream. Every
//! publisher replays the same paced FLV file. Per-client counters are
//! folded into a [`model::Report`] once per second.

pub mod actors;
#[cfg(feature = "api")]
pub mod api;
pub mod config;
pub mod media;
pub mod model;
#[cfg(feature = "remote")]
pub mod remote;
pub mod rtmp;
pub mod session;
