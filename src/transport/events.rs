use serenity::{async_trait, model::id::GuildId};
use songbird::{
    tracks::TrackHandle, Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler,
};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::{PlaybackId, TransportEvent};

/// Avisa al player cuando un track termina, por fin natural, `stop` o error.
pub struct TrackEndNotifier {
    pub guild_id: GuildId,
    pub playback: PlaybackId,
    pub events: mpsc::UnboundedSender<TransportEvent>,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        debug!("🎵 Track {} terminó en guild {}", self.playback, self.guild_id);

        let _ = self.events.send(TransportEvent::TrackFinished {
            guild_id: self.guild_id,
            playback: self.playback,
        });
        None
    }
}

/// Handler para errores de tracks: se registra y se trata como fin del track.
pub struct TrackErrorNotifier {
    pub guild_id: GuildId,
    pub playback: PlaybackId,
    pub events: mpsc::UnboundedSender<TransportEvent>,
}

#[async_trait]
impl VoiceEventHandler for TrackErrorNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        if let EventContext::Track(track_list) = ctx {
            for (state, _handle) in *track_list {
                error!(
                    "❌ Error en track {} para guild {}: {:?}",
                    self.playback, self.guild_id, state.playing
                );
            }
        }

        let _ = self.events.send(TransportEvent::TrackFinished {
            guild_id: self.guild_id,
            playback: self.playback,
        });
        None
    }
}

/// Detiene un capítulo cuando se cumple su duración.
///
/// Detenerlo dispara `TrackEvent::End`, que avanza la cola como cualquier fin de track.
pub struct ChapterEnd {
    pub handle: TrackHandle,
}

#[async_trait]
impl VoiceEventHandler for ChapterEnd {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        if let Err(e) = self.handle.stop() {
            warn!("No se pudo cortar el capítulo: {}", e);
        }
        None
    }
}

/// Detecta cuándo alguien empieza o deja de hablar en el canal.
///
/// Solo reporta transiciones; los ticks repetidos con el mismo estado se descartan.
pub struct VoiceActivityNotifier {
    guild_id: GuildId,
    events: mpsc::UnboundedSender<TransportEvent>,
    speaking: AtomicBool,
}

impl VoiceActivityNotifier {
    pub fn new(guild_id: GuildId, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            guild_id,
            events,
            speaking: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl VoiceEventHandler for VoiceActivityNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        if let EventContext::VoiceTick(tick) = ctx {
            let active = !tick.speaking.is_empty();
            if self.speaking.swap(active, Ordering::Relaxed) != active {
                debug!("📡 Actividad de voz en guild {}: {}", self.guild_id, active);
                let _ = self.events.send(TransportEvent::VoiceActivity {
                    guild_id: self.guild_id,
                    active,
                });
            }
        }

        None
    }
}
