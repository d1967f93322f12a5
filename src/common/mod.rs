//! Common types shared across the client

pub mod channels;
pub mod errors;
