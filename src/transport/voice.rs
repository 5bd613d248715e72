use async_trait::async_trait;
use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    events::CoreEvent,
    input::{HttpRequest, Input, YoutubeDl},
    tracks::TrackHandle,
    Call, Event, Songbird, TrackEvent,
};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::{
    events::{ChapterEnd, TrackEndNotifier, TrackErrorNotifier, VoiceActivityNotifier},
    ConnectionHandle, PlaybackId, Transport, TransportEvent,
};
use crate::{audio::track::Track, error::TransportError, sources::direct_url::is_audio_file_url};

struct VoiceSession {
    session: u64,
    call: Arc<Mutex<Call>>,
    track: Option<TrackHandle>,
}

/// Transporte sobre Songbird: una `Call` por guild.
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    http: reqwest::Client,
    sessions: DashMap<GuildId, VoiceSession>,
    next_session: AtomicU64,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl SongbirdTransport {
    /// Crea el transporte y el canal por el que llegan sus eventos.
    pub fn new(
        manager: Arc<Songbird>,
        http: reqwest::Client,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let transport = Self {
            manager,
            http,
            sessions: DashMap::new(),
            next_session: AtomicU64::new(1),
            events,
        };
        (transport, events_rx)
    }

    fn session_for(&self, handle: &ConnectionHandle) -> Option<Arc<Mutex<Call>>> {
        self.sessions
            .get(&handle.guild_id)
            .filter(|session| session.session == handle.session)
            .map(|session| session.call.clone())
    }

    fn current_track(&self, handle: &ConnectionHandle) -> Option<TrackHandle> {
        self.sessions
            .get(&handle.guild_id)
            .filter(|session| session.session == handle.session)
            .and_then(|session| session.track.clone())
    }

    fn input_for(&self, track: &Track) -> Input {
        if is_audio_file_url(track.query()) {
            HttpRequest::new(self.http.clone(), track.query().to_string()).into()
        } else {
            YoutubeDl::new(self.http.clone(), track.query().to_string()).into()
        }
    }
}

#[async_trait]
impl Transport for SongbirdTransport {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<ConnectionHandle, TransportError> {
        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| TransportError::Join(e.to_string()))?;

        {
            let mut call = call.lock().await;
            // Una Call reutilizada conserva los handlers de la sesión anterior
            call.remove_all_global_events();
            call.add_global_event(
                Event::Core(CoreEvent::VoiceTick),
                VoiceActivityNotifier::new(guild_id, self.events.clone()),
            );
        }

        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        self.sessions.insert(
            guild_id,
            VoiceSession {
                session,
                call,
                track: None,
            },
        );

        info!("🔊 Conectado al canal de voz en guild {}", guild_id);
        Ok(ConnectionHandle {
            guild_id,
            channel_id,
            session,
        })
    }

    async fn disconnect(&self, handle: &ConnectionHandle) {
        let removed = self
            .sessions
            .remove_if(&handle.guild_id, |_, session| session.session == handle.session);
        if removed.is_none() {
            debug!("Sesión {} de guild {} ya no existe", handle.session, handle.guild_id);
            return;
        }

        if let Err(e) = self.manager.remove(handle.guild_id).await {
            warn!("Error al salir del canal de voz en guild {}: {}", handle.guild_id, e);
        }
        info!("👋 Desconectado del canal de voz en guild {}", handle.guild_id);
    }

    async fn play(
        &self,
        handle: &ConnectionHandle,
        track: &Track,
        playback: PlaybackId,
        volume: u8,
    ) -> Result<(), TransportError> {
        let call = self.session_for(handle).ok_or(TransportError::NotConnected)?;
        let input = self.input_for(track);

        let track_handle = {
            let mut call = call.lock().await;
            call.stop();
            call.play_input(input)
        };

        if let Err(e) = track_handle.set_volume(f32::from(volume) / 100.0) {
            warn!("No se pudo ajustar el volumen inicial: {}", e);
        }

        track_handle
            .add_event(
                Event::Track(TrackEvent::End),
                TrackEndNotifier {
                    guild_id: handle.guild_id,
                    playback,
                    events: self.events.clone(),
                },
            )
            .map_err(|e| TransportError::Input(e.to_string()))?;
        track_handle
            .add_event(
                Event::Track(TrackEvent::Error),
                TrackErrorNotifier {
                    guild_id: handle.guild_id,
                    playback,
                    events: self.events.clone(),
                },
            )
            .map_err(|e| TransportError::Input(e.to_string()))?;

        if let Some(start) = track.start_offset() {
            let _ = track_handle.seek(start);
        }
        if let (Some(start), Some(length)) = (track.start_offset(), track.duration()) {
            debug!("Capítulo desde {:?} durante {:?}", start, length);
            track_handle
                .add_event(
                    Event::Delayed(length),
                    ChapterEnd {
                        handle: track_handle.clone(),
                    },
                )
                .map_err(|e| TransportError::Input(e.to_string()))?;
        }

        if let Some(mut session) = self.sessions.get_mut(&handle.guild_id) {
            if session.session == handle.session {
                session.track = Some(track_handle);
            }
        }
        Ok(())
    }

    async fn stop(&self, handle: &ConnectionHandle) {
        if let Some(call) = self.session_for(handle) {
            call.lock().await.stop();
        }
        if let Some(mut session) = self.sessions.get_mut(&handle.guild_id) {
            if session.session == handle.session {
                session.track = None;
            }
        }
    }

    async fn pause(&self, handle: &ConnectionHandle) {
        if let Some(track) = self.current_track(handle) {
            if let Err(e) = track.pause() {
                warn!("Error al pausar: {}", e);
            }
        }
    }

    async fn resume(&self, handle: &ConnectionHandle) {
        if let Some(track) = self.current_track(handle) {
            if let Err(e) = track.play() {
                warn!("Error al reanudar: {}", e);
            }
        }
    }

    async fn set_volume(&self, handle: &ConnectionHandle, volume: u8) {
        if let Some(track) = self.current_track(handle) {
            let _ = track.set_volume(f32::from(volume) / 100.0);
        }
    }
}
