//! # Audio Module
//!
//! Playback state for every guild.
//!
//! ## Architecture
//!
//! ### [`player`] - Guild Player
//! - One task per guild, fed through a bounded mailbox
//! - Owns the queue, the volume controller and the leave/duck timers
//! - Publishes its status through a `watch` channel for lock-free reads
//!
//! ### [`registry`] - Player Registry
//! - Creates players on first use, at most one live player per guild
//! - Routes transport events to the owning player
//!
//! ### Building blocks
//! - [`track`]: immutable description of one playable unit
//! - [`queue`]: ordered tracks plus a cursor to the current one
//! - [`volume`]: base volume, ducking and volume ramps
//! - [`timer`]: restartable single-shot deadlines

pub mod player;
pub mod queue;
pub mod registry;
pub mod timer;
pub mod track;
pub mod volume;
