//! Visitor-parking booking core for a condominium: window validation, per-spot conflict
//! checking, the booking state machine, XP rewards and the periodic sweeps.

pub mod auth;
pub mod clock;
pub mod config;
pub mod engine;
pub mod jobs;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod push;
pub mod repo;
pub mod rewards;
pub mod wal;
