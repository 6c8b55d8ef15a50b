//! Guided character-sheet intake and asynchronous review for chat
//! communities.

pub mod bot;
pub mod characters;
pub mod config;
pub mod cooldown;
pub mod interview;
pub mod platform;
pub mod review;
pub mod sheet;
pub mod store;
