use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::{audio::player::PlayerOptions, storage::GuildSettings};

/// Retraso máximo de salida por inactividad: una semana.
pub const MAX_LEAVE_DELAY_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,

    // Paths
    pub data_dir: PathBuf,

    // Valores por defecto para guilds sin configuración guardada
    pub default_volume: u8,
    pub max_playlist_size: usize,
    pub leave_delay_secs: u64,
    pub leave_if_no_listeners: bool,
    pub duck_enabled: bool,
    pub duck_target_volume: u8,
    pub auto_announce: bool,
    pub queue_add_hidden: bool,
    pub queue_page_size: usize,

    // Motor
    pub duck_release_ms: u64,
    pub volume_fade_ms: u64,
    pub player_mailbox: usize,
    pub resolve_max_entries: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        // Create directories if they don't exist
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(config)
    }

    /// Construye la configuración a partir de una fuente de variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let config = Self {
            discord_token: var("DISCORD_TOKEN").context("DISCORD_TOKEN no está definido")?,
            data_dir: var("DATA_DIR").map_or(defaults.data_dir, PathBuf::from),

            default_volume: parse_or(var("DEFAULT_VOLUME"), "DEFAULT_VOLUME", defaults.default_volume)?,
            max_playlist_size: parse_or(
                var("MAX_PLAYLIST_SIZE"),
                "MAX_PLAYLIST_SIZE",
                defaults.max_playlist_size,
            )?,
            leave_delay_secs: parse_or(
                var("LEAVE_DELAY_SECS"),
                "LEAVE_DELAY_SECS",
                defaults.leave_delay_secs,
            )?,
            leave_if_no_listeners: parse_or(
                var("LEAVE_IF_NO_LISTENERS"),
                "LEAVE_IF_NO_LISTENERS",
                defaults.leave_if_no_listeners,
            )?,
            duck_enabled: parse_or(var("DUCK_ENABLED"), "DUCK_ENABLED", defaults.duck_enabled)?,
            duck_target_volume: parse_or(
                var("DUCK_TARGET_VOLUME"),
                "DUCK_TARGET_VOLUME",
                defaults.duck_target_volume,
            )?,
            auto_announce: parse_or(var("AUTO_ANNOUNCE"), "AUTO_ANNOUNCE", defaults.auto_announce)?,
            queue_add_hidden: parse_or(
                var("QUEUE_ADD_HIDDEN"),
                "QUEUE_ADD_HIDDEN",
                defaults.queue_add_hidden,
            )?,
            queue_page_size: parse_or(
                var("QUEUE_PAGE_SIZE"),
                "QUEUE_PAGE_SIZE",
                defaults.queue_page_size,
            )?,

            duck_release_ms: parse_or(
                var("DUCK_RELEASE_MS"),
                "DUCK_RELEASE_MS",
                defaults.duck_release_ms,
            )?,
            volume_fade_ms: parse_or(var("VOLUME_FADE_MS"), "VOLUME_FADE_MS", defaults.volume_fade_ms)?,
            player_mailbox: parse_or(var("PLAYER_MAILBOX"), "PLAYER_MAILBOX", defaults.player_mailbox)?,
            resolve_max_entries: parse_or(
                var("RESOLVE_MAX_ENTRIES"),
                "RESOLVE_MAX_ENTRIES",
                defaults.resolve_max_entries,
            )?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    pub fn validate(&self) -> Result<()> {
        if self.default_volume > 100 {
            anyhow::bail!("Default volume must be between 0 and 100, got: {}", self.default_volume);
        }

        if self.duck_target_volume > 100 {
            anyhow::bail!(
                "Duck target volume must be between 0 and 100, got: {}",
                self.duck_target_volume
            );
        }

        if self.leave_delay_secs > MAX_LEAVE_DELAY_SECS {
            anyhow::bail!(
                "Leave delay must be at most {} seconds, got: {}",
                MAX_LEAVE_DELAY_SECS,
                self.leave_delay_secs
            );
        }

        if self.max_playlist_size == 0 {
            anyhow::bail!("Max playlist size must be greater than 0");
        }

        if self.queue_page_size == 0 {
            anyhow::bail!("Queue page size must be greater than 0");
        }

        if self.player_mailbox == 0 {
            anyhow::bail!("Player mailbox must be greater than 0");
        }

        Ok(())
    }

    /// Configuración inicial de una guild que nunca guardó la suya.
    pub fn default_guild_settings(&self) -> GuildSettings {
        GuildSettings {
            playlist_limit: self.max_playlist_size,
            leave_delay_secs: self.leave_delay_secs,
            leave_if_no_listeners: self.leave_if_no_listeners,
            duck_enabled: self.duck_enabled,
            duck_target_volume: self.duck_target_volume,
            default_volume: self.default_volume,
            auto_announce_next_song: self.auto_announce,
            queue_add_response_hidden: self.queue_add_hidden,
            default_queue_page_size: self.queue_page_size,
        }
    }

    pub fn player_options(&self) -> PlayerOptions {
        PlayerOptions {
            duck_release: Duration::from_millis(self.duck_release_ms),
            volume_fade: Duration::from_millis(self.volume_fade_ms),
            mailbox: self.player_mailbox,
        }
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The Discord token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Data: {}\n  \
            Audio: {}% vol, ducking={} ({}%)\n  \
            Limits: {} per batch, leave after {}s, leave when empty={}\n  \
            Queue: {} per page, announce={}, hidden adds={}",
            self.data_dir.display(),
            self.default_volume,
            self.duck_enabled,
            self.duck_target_volume,
            self.max_playlist_size,
            self.leave_delay_secs,
            self.leave_if_no_listeners,
            self.queue_page_size,
            self.auto_announce,
            self.queue_add_hidden
        )
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Valor inválido para {key}: {raw}")),
        None => Ok(default),
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        let guild = GuildSettings::default();
        let engine = PlayerOptions::default();

        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),

            data_dir: "./data".into(),

            default_volume: guild.default_volume,
            max_playlist_size: guild.playlist_limit,
            leave_delay_secs: guild.leave_delay_secs,
            leave_if_no_listeners: guild.leave_if_no_listeners,
            duck_enabled: guild.duck_enabled,
            duck_target_volume: guild.duck_target_volume,
            auto_announce: guild.auto_announce_next_song,
            queue_add_hidden: guild.queue_add_response_hidden,
            queue_page_size: guild.default_queue_page_size,

            duck_release_ms: engine.duck_release.as_millis() as u64,
            volume_fade_ms: engine.volume_fade.as_millis() as u64,
            player_mailbox: engine.mailbox,
            resolve_max_entries: 1000,
        }
    }
}
