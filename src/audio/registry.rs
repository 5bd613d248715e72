use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::join_all;
use serenity::model::id::GuildId;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::player::{LeaveReason, Player, PlayerMap, PlayerNotice, PlayerOptions, PlayerParts};
use crate::{
    error::StorageError,
    storage::{GuildSettings, SettingsStore},
    transport::{Transport, TransportEvent},
};

const NOTICE_CAPACITY: usize = 256;

/// Mapa concurrente de guild a player, con creación bajo demanda.
///
/// Como máximo existe un player vivo por guild: las llamadas concurrentes a
/// [`PlayerRegistry::get`] para la misma guild devuelven la misma instancia.
/// Un player que se desconecta (timeout, canal vacío, `destroy`) se quita del
/// mapa por sí mismo, y el siguiente `get` crea uno nuevo.
pub struct PlayerRegistry {
    players: Arc<PlayerMap>,
    settings: Arc<dyn SettingsStore>,
    transport: Arc<dyn Transport>,
    defaults: GuildSettings,
    options: PlayerOptions,
    notices: broadcast::Sender<PlayerNotice>,
    next_instance: AtomicU64,
}

impl PlayerRegistry {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        transport: Arc<dyn Transport>,
        defaults: GuildSettings,
        options: PlayerOptions,
    ) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            players: Arc::new(DashMap::new()),
            settings,
            transport,
            defaults,
            options,
            notices,
            next_instance: AtomicU64::new(1),
        }
    }

    /// Suscripción a los avisos de todos los players.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerNotice> {
        self.notices.subscribe()
    }

    /// Devuelve el player de la guild, creándolo si no existe.
    pub async fn get(&self, guild_id: GuildId) -> Player {
        if let Some(player) = self.existing(guild_id) {
            return player;
        }

        // La configuración se lee fuera del lock del mapa
        let settings = self.load_settings(guild_id).await;

        match self.players.entry(guild_id) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_live() {
                    return entry.get().clone();
                }
                let player = self.spawn(guild_id, settings);
                entry.insert(player.clone());
                player
            }
            Entry::Vacant(entry) => {
                let player = self.spawn(guild_id, settings);
                entry.insert(player.clone());
                player
            }
        }
    }

    /// Player vivo de la guild, sin crearlo.
    pub fn existing(&self, guild_id: GuildId) -> Option<Player> {
        self.players
            .get(&guild_id)
            .map(|player| player.clone())
            .filter(Player::is_live)
    }

    /// Desconecta y olvida el player de la guild. No hace nada si no existe.
    pub async fn remove(&self, guild_id: GuildId) {
        if let Some((_, player)) = self.players.remove(&guild_id) {
            if let Err(e) = player.destroy().await {
                warn!("Error al destruir player de guild {}: {}", guild_id, e);
            }
        }
    }

    /// Vuelve a leer la configuración de la guild y la aplica al player vivo.
    pub async fn refresh_settings(&self, guild_id: GuildId) -> Result<(), StorageError> {
        let settings = self.settings.guild_settings(guild_id).await?;
        if let Some(player) = self.existing(guild_id) {
            player.refresh_settings(settings).await;
        }
        Ok(())
    }

    /// Entrega un evento del transporte al player de su guild.
    pub async fn dispatch(&self, event: TransportEvent) {
        let Some(player) = self.existing(event.guild_id()) else {
            debug!("Evento sin player activo: {:?}", event);
            return;
        };

        match event {
            TransportEvent::TrackFinished { playback, .. } => player.track_finished(playback).await,
            TransportEvent::VoiceActivity { active, .. } => player.voice_activity(active).await,
            TransportEvent::ListenerCount { count, .. } => player.listener_count(count).await,
        }
    }

    /// Desconecta todos los players.
    pub async fn shutdown(&self) {
        let players: Vec<Player> = self
            .players
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.players.clear();

        info!("🛑 Desconectando {} players", players.len());
        join_all(
            players
                .iter()
                .map(|player| player.destroy_with(LeaveReason::Shutdown)),
        )
        .await;
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    async fn load_settings(&self, guild_id: GuildId) -> GuildSettings {
        match self.settings.guild_settings(guild_id).await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(
                    "⚠️ No se pudo leer la configuración de guild {}, usando valores por defecto: {}",
                    guild_id, e
                );
                self.defaults.clone()
            }
        }
    }

    fn spawn(&self, guild_id: GuildId, settings: GuildSettings) -> Player {
        let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);
        debug!("🎛️ Creando player {} para guild {}", instance, guild_id);

        Player::spawn(PlayerParts {
            guild_id,
            instance,
            settings,
            options: self.options,
            transport: self.transport.clone(),
            notices: self.notices.clone(),
            registry: Arc::downgrade(&self.players),
        })
    }
}
