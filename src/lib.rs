//! # Open Music Engine
//!
//! Per-guild playback engine for a Discord music bot.
//!
//! Every guild gets its own [`audio::player::Player`]: an isolated state
//! machine that owns the guild's queue, volume and timers and processes its
//! commands one at a time. [`audio::registry::PlayerRegistry`] creates players
//! on demand and guarantees at most one live player per guild.
//!
//! The engine does not talk to Discord directly. Voice connections go through
//! the [`transport::Transport`] trait (implemented over Songbird), per-guild
//! settings come from a [`storage::SettingsStore`], and queries are turned into
//! tracks by a [`sources::TrackResolver`].

pub mod audio;
pub mod bot;
pub mod config;
pub mod error;
pub mod sources;
pub mod storage;
pub mod transport;
