//! # Transport Module
//!
//! Boundary between the playback engine and the voice connection that actually
//! carries audio frames to Discord.
//!
//! The engine only *requests* connect/disconnect/play; ownership of the
//! underlying connection stays with the [`Transport`] implementation. Events
//! coming back from the voice layer (track end, speech detection) are
//! delivered as [`TransportEvent`]s and routed to the owning player through
//! [`crate::audio::registry::PlayerRegistry::dispatch`].

pub mod events;
pub mod voice;
#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::fmt;

use crate::{audio::track::Track, error::TransportError};

pub use self::voice::SongbirdTransport;

/// Conexión de voz establecida para una guild.
///
/// `session` distingue conexiones sucesivas de la misma guild: un
/// `disconnect` tardío de una sesión anterior no debe cerrar la nueva.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub session: u64,
}

/// Identifica una reproducción concreta pedida al transporte.
///
/// Permite descartar avisos de fin de pista que llegan tarde, por ejemplo
/// cuando `forward` ya detuvo esa pista.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaybackId(pub u64);

impl fmt::Display for PlaybackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Eventos del transporte hacia el player de una guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    TrackFinished { guild_id: GuildId, playback: PlaybackId },
    VoiceActivity { guild_id: GuildId, active: bool },
    ListenerCount { guild_id: GuildId, count: usize },
}

impl TransportEvent {
    pub fn guild_id(&self) -> GuildId {
        match self {
            Self::TrackFinished { guild_id, .. }
            | Self::VoiceActivity { guild_id, .. }
            | Self::ListenerCount { guild_id, .. } => *guild_id,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Se une al canal de voz. Es el único punto que espera a un servicio externo.
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<ConnectionHandle, TransportError>;

    async fn disconnect(&self, handle: &ConnectionHandle);

    /// Reemplaza lo que esté sonando por `track`.
    async fn play(
        &self,
        handle: &ConnectionHandle,
        track: &Track,
        playback: PlaybackId,
        volume: u8,
    ) -> Result<(), TransportError>;

    async fn stop(&self, handle: &ConnectionHandle);

    async fn pause(&self, handle: &ConnectionHandle);

    async fn resume(&self, handle: &ConnectionHandle);

    async fn set_volume(&self, handle: &ConnectionHandle, volume: u8);
}
