//! Route handlers

pub mod hooks;
pub mod mute;
pub mod system;
