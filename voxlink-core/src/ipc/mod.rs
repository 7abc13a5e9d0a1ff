//! Serializable event types delivered over broadcast channels.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so hosts can
//! forward them to a UI or log them as JSON unchanged.

pub mod events;
