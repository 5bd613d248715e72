use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serenity::model::id::GuildId;
use std::{path::PathBuf, time::Duration};
use tokio::fs;
use tracing::{info, warn};

use crate::error::StorageError;

/// Configuración de una guild, tal como la lee el player.
///
/// Inmutable: para cambiarla se guarda una nueva versión y se vuelve a leer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildSettings {
    pub playlist_limit: usize,
    pub leave_delay_secs: u64,
    pub leave_if_no_listeners: bool,
    pub duck_enabled: bool,
    pub duck_target_volume: u8,
    pub default_volume: u8,
    pub auto_announce_next_song: bool,
    pub queue_add_response_hidden: bool,
    pub default_queue_page_size: usize,
}

impl GuildSettings {
    /// Retraso antes de salir cuando la cola queda vacía. `None` = nunca.
    pub fn leave_delay(&self) -> Option<Duration> {
        (self.leave_delay_secs > 0).then(|| Duration::from_secs(self.leave_delay_secs))
    }
}

impl Default for GuildSettings {
    fn default() -> Self {
        Self {
            playlist_limit: 100,
            leave_delay_secs: 300,
            leave_if_no_listeners: true,
            duck_enabled: false,
            duck_target_volume: 30,
            default_volume: 50,
            auto_announce_next_song: true,
            queue_add_response_hidden: false,
            default_queue_page_size: 10,
        }
    }
}

/// Fuente de la configuración por guild.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn guild_settings(&self, guild_id: GuildId) -> Result<GuildSettings, StorageError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredGuild {
    guild_id: u64,
    #[serde(flatten)]
    settings: GuildSettings,
}

/// Almacenamiento basado en archivos JSON, uno por guild
pub struct JsonStorage {
    data_dir: PathBuf,
    defaults: GuildSettings,
    cache: DashMap<GuildId, GuildSettings>,
}

impl JsonStorage {
    pub async fn new(data_dir: PathBuf, defaults: GuildSettings) -> Result<Self, StorageError> {
        fs::create_dir_all(data_dir.join("servers")).await?;

        info!("📁 Storage inicializado en: {}", data_dir.display());

        let storage = Self {
            data_dir,
            defaults,
            cache: DashMap::new(),
        };
        storage.load_all().await?;
        Ok(storage)
    }

    /// Guarda la configuración de una guild y actualiza el caché
    pub async fn update_guild_settings(
        &self,
        guild_id: GuildId,
        settings: GuildSettings,
    ) -> Result<(), StorageError> {
        let stored = StoredGuild {
            guild_id: guild_id.get(),
            settings: settings.clone(),
        };
        let content = serde_json::to_string_pretty(&stored)?;
        fs::write(self.file_path(guild_id), content).await?;
        self.cache.insert(guild_id, settings);

        info!("💾 Configuración actualizada para guild {}", guild_id);
        Ok(())
    }

    pub fn cached_guilds(&self) -> usize {
        self.cache.len()
    }

    async fn load(&self, guild_id: GuildId) -> Result<Option<GuildSettings>, StorageError> {
        let path = self.file_path(guild_id);
        match fs::read_to_string(&path).await {
            Ok(content) => {
                let stored: StoredGuild = serde_json::from_str(&content)?;
                Ok(Some(stored.settings))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_all(&self) -> Result<(), StorageError> {
        let mut entries = fs::read_dir(self.data_dir.join("servers")).await?;
        let mut loaded = 0;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(guild_id) = path
                .file_stem()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_prefix("guild_"))
                .and_then(|id| id.parse::<u64>().ok())
                .filter(|id| *id != 0)
                .map(GuildId::new)
            else {
                continue;
            };

            match self.load(guild_id).await {
                Ok(Some(settings)) => {
                    self.cache.insert(guild_id, settings);
                    loaded += 1;
                }
                Ok(None) => {}
                Err(e) => warn!("Error cargando configuración para guild {}: {}", guild_id, e),
            }
        }

        if loaded > 0 {
            info!("📂 Cargadas {} configuraciones de servidor", loaded);
        }
        Ok(())
    }

    fn file_path(&self, guild_id: GuildId) -> PathBuf {
        self.data_dir
            .join("servers")
            .join(format!("guild_{}.json", guild_id))
    }
}

#[async_trait]
impl SettingsStore for JsonStorage {
    async fn guild_settings(&self, guild_id: GuildId) -> Result<GuildSettings, StorageError> {
        if let Some(settings) = self.cache.get(&guild_id) {
            return Ok(settings.clone());
        }

        let settings = self.load(guild_id).await?.unwrap_or_else(|| self.defaults.clone());
        self.cache.insert(guild_id, settings.clone());
        Ok(settings)
    }
}
