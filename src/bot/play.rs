use serenity::model::id::{ChannelId, GuildId, UserId};
use tracing::{debug, info};

use crate::{
    audio::{
        player::{EnqueueOutcome, EnqueueRequest},
        queue::InsertMode,
        registry::PlayerRegistry,
    },
    error::{PlayerError, PlayerResult},
    sources::TrackResolver,
};

/// Lo que pidió el usuario con `/play` (o un favorito).
#[derive(Debug, Clone)]
pub struct PlayRequest {
    pub guild_id: GuildId,
    /// Canal de voz del usuario; el bot se une a él si no está conectado.
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub query: String,
    pub mode: InsertMode,
    pub shuffle: bool,
    pub split_chapters: bool,
    pub skip_current: bool,
}

impl PlayRequest {
    pub fn new(guild_id: GuildId, channel_id: ChannelId, user_id: UserId, query: impl Into<String>) -> Self {
        Self {
            guild_id,
            channel_id,
            user_id,
            query: query.into(),
            mode: InsertMode::Append,
            shuffle: false,
            split_chapters: false,
            skip_current: false,
        }
    }
}

/// Resuelve la búsqueda y agrega el resultado a la cola de la guild.
pub async fn play(
    registry: &PlayerRegistry,
    resolver: &dyn TrackResolver,
    request: PlayRequest,
) -> PlayerResult<EnqueueOutcome> {
    let query = request.query.trim();
    if query.is_empty() {
        return Err(PlayerError::InvalidArgument(
            "La búsqueda no puede estar vacía".to_string(),
        ));
    }

    let tracks = resolver
        .resolve(query, request.split_chapters, request.user_id)
        .await?;
    info!(
        "🎶 '{}' resuelto en {} tracks para guild {}",
        query,
        tracks.len(),
        request.guild_id
    );

    let enqueue = EnqueueRequest {
        tracks,
        mode: request.mode,
        shuffle: request.shuffle,
        skip_current: request.skip_current,
        channel_id: request.channel_id,
    };

    let player = registry.get(request.guild_id).await;
    match player.enqueue(enqueue.clone()).await {
        // El player terminó entre `get` y `enqueue`; el siguiente `get` crea uno nuevo
        Err(PlayerError::Disconnected) => {
            debug!("Player de guild {} terminó durante el enqueue, reintentando", request.guild_id);
            registry.get(request.guild_id).await.enqueue(enqueue).await
        }
        result => result,
    }
}
