//! # Bot Module
//!
//! Gateway side of the engine: turns Discord events into player inputs.
//!
//! [`OpenMusicBot`] implements Serenity's [`EventHandler`]. On every voice
//! state update it recounts the listeners in the bot's channel and forwards
//! the number to the guild's player, which leaves when nobody is left. When
//! the bot itself is removed from voice, the guild's player is removed too.
//!
//! [`play`] is the glue a command handler calls to turn a raw query into
//! tracks in the guild's queue.

pub mod play;

use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Ready, UserId, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    audio::{
        player::{EnqueueOutcome, PlayerState},
        registry::PlayerRegistry,
    },
    error::PlayerResult,
    sources::TrackResolver,
    transport::TransportEvent,
};

pub use play::{play, PlayRequest};

/// Main Discord bot handler.
pub struct OpenMusicBot {
    registry: Arc<PlayerRegistry>,
    resolver: Arc<dyn TrackResolver>,
}

impl OpenMusicBot {
    pub fn new(registry: Arc<PlayerRegistry>, resolver: Arc<dyn TrackResolver>) -> Self {
        Self { registry, resolver }
    }

    pub fn registry(&self) -> &Arc<PlayerRegistry> {
        &self.registry
    }

    /// Punto de entrada de `/play` para los handlers de comandos.
    pub async fn play(&self, request: PlayRequest) -> PlayerResult<EnqueueOutcome> {
        play(&self.registry, self.resolver.as_ref(), request).await
    }

    /// Reenvía al player la cantidad de oyentes de su canal.
    async fn update_listeners(&self, ctx: &Context, guild_id: GuildId) {
        let Some(player) = self.registry.existing(guild_id) else {
            return;
        };
        let Some(channel_id) = player.status().channel_id else {
            return;
        };

        let bot_id = ctx.cache.current_user().id;
        // El GuildRef del caché no debe cruzar un await
        let count = {
            let Some(guild) = ctx.cache.guild(guild_id) else {
                return;
            };
            count_listeners(
                guild
                    .voice_states
                    .values()
                    .map(|state| (state.user_id, state.channel_id)),
                channel_id,
                bot_id,
            )
        };

        debug!("👥 {} oyentes en el canal de guild {}", count, guild_id);
        self.registry
            .dispatch(TransportEvent::ListenerCount { guild_id, count })
            .await;
    }
}

/// Usuarios conectados a `channel_id`, sin contar al bot.
fn count_listeners(
    states: impl Iterator<Item = (UserId, Option<ChannelId>)>,
    channel_id: ChannelId,
    bot_id: UserId,
) -> usize {
    states
        .filter(|(user_id, channel)| *user_id != bot_id && *channel == Some(channel_id))
        .count()
}

#[async_trait]
impl EventHandler for OpenMusicBot {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };

        // Detectar si el bot fue desconectado
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id == current_user_id && old.is_some() && new.channel_id.is_none() {
            // Un player que aún se está conectando no tiene canal y no es el afectado
            let connected = self.registry.existing(guild_id).is_some_and(|player| {
                let status = player.status();
                status.channel_id.is_some() && status.state != PlayerState::Connecting
            });
            if connected {
                info!("🔌 Bot desconectado en guild {}", guild_id);
                self.registry.remove(guild_id).await;
            }
            return;
        }

        self.update_listeners(&ctx, guild_id).await;
    }
}
