use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};
use tokio::sync::{
    broadcast,
    mpsc::{self, error::TrySendError},
    oneshot, watch,
};
use tracing::{debug, info, warn};

use crate::{
    audio::{
        queue::{InsertMode, Queue, QueuePage, QueueSnapshot},
        timer::Timer,
        track::Track,
        volume::{validate_percent, VolumeController, VolumeRamp},
    },
    error::{PlayerError, PlayerResult},
    storage::GuildSettings,
    transport::{ConnectionHandle, PlaybackId, Transport},
};

/// Intervalo entre pasos de la interpolación de volumen.
const FADE_STEP: Duration = Duration::from_millis(50);

/// Ids de reproducción únicos en todo el proceso, para que un aviso tardío de
/// una instancia anterior nunca coincida con el de la actual.
static NEXT_PLAYBACK: AtomicU64 = AtomicU64::new(1);

pub(crate) type PlayerMap = DashMap<GuildId, Player>;

type Reply<T> = oneshot::Sender<PlayerResult<T>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Connecting,
    Playing,
    Paused,
    /// Terminal para esta instancia.
    Disconnected,
}

/// Parámetros del motor comunes a todas las guilds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerOptions {
    /// Tiempo que se mantiene el ducking después de que deja de haber voz.
    pub duck_release: Duration,
    /// Duración de la transición entre volumen base y volumen reducido.
    pub volume_fade: Duration,
    pub mailbox: usize,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            duck_release: Duration::from_millis(1500),
            volume_fade: Duration::from_millis(300),
            mailbox: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    Requested,
    IdleTimeout,
    NoListeners,
    Shutdown,
}

/// Avisos observables para quien renderiza mensajes.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerNotice {
    TrackStarted {
        guild_id: GuildId,
        track: Track,
        announce: bool,
    },
    QueueFinished {
        guild_id: GuildId,
    },
    Left {
        guild_id: GuildId,
        reason: LeaveReason,
    },
}

/// Estado publicado tras cada operación; leerlo no pasa por el buzón.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStatus {
    pub state: PlayerState,
    pub current: Option<Track>,
    pub upcoming: usize,
    pub volume: u8,
    pub channel_id: Option<ChannelId>,
}

/// Petición de agregar canciones a la cola de una guild.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub tracks: Vec<Track>,
    pub mode: InsertMode,
    pub shuffle: bool,
    /// Salta la canción actual tras insertar (repetir un favorito). Implica `Front`.
    pub skip_current: bool,
    /// Canal al que unirse si el player aún no está conectado.
    pub channel_id: ChannelId,
}

impl EnqueueRequest {
    pub fn new(channel_id: ChannelId, tracks: Vec<Track>) -> Self {
        Self {
            tracks,
            mode: InsertMode::Append,
            shuffle: false,
            skip_current: false,
            channel_id,
        }
    }

    pub fn front(mut self) -> Self {
        self.mode = InsertMode::Front;
        self
    }

    pub fn shuffled(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn skipping_current(mut self, skip: bool) -> Self {
        self.skip_current = skip;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueOutcome {
    pub added: usize,
    /// Canciones por delante de la primera agregada; 0 = está sonando.
    pub position: usize,
    /// Track que empezó a sonar como resultado de esta operación.
    pub started: Option<Track>,
    pub response_hidden: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub state: PlayerState,
    pub queue: QueueSnapshot,
    pub volume: VolumeController,
    pub settings: GuildSettings,
}

impl PlayerSnapshot {
    /// Página de la cola usando el tamaño configurado para la guild
    pub fn page(&self, page: usize) -> QueuePage {
        self.queue.page(page, self.settings.default_queue_page_size)
    }
}

enum Command {
    Enqueue(EnqueueRequest, Reply<EnqueueOutcome>),
    Forward(usize, Reply<Track>),
    Pause(Reply<()>),
    Resume(Reply<()>),
    SetVolume(u8, Reply<()>),
    Remove(usize, Reply<Track>),
    Clear(oneshot::Sender<usize>),
    Snapshot(oneshot::Sender<PlayerSnapshot>),
    RefreshSettings(GuildSettings),
    TrackFinished(PlaybackId),
    VoiceActivity(bool),
    ListenerCount(usize),
    Destroy(LeaveReason, oneshot::Sender<()>),
}

/// Handle del player de una guild. Clonarlo es barato.
///
/// Todas las operaciones se envían al buzón de la tarea del player y se
/// aplican de una en una, en el orden en que llegan.
#[derive(Clone)]
pub struct Player {
    guild_id: GuildId,
    instance: u64,
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<PlayerStatus>,
}

pub(crate) struct PlayerParts {
    pub guild_id: GuildId,
    pub instance: u64,
    pub settings: GuildSettings,
    pub options: PlayerOptions,
    pub transport: Arc<dyn Transport>,
    pub notices: broadcast::Sender<PlayerNotice>,
    pub registry: Weak<PlayerMap>,
}

impl Player {
    /// Crea la tarea del player y devuelve su handle.
    pub(crate) fn spawn(parts: PlayerParts) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(parts.options.mailbox.max(1));
        let volume = VolumeController::new(
            parts.settings.default_volume,
            parts.settings.duck_target_volume,
        );
        let (status_tx, status_rx) = watch::channel(PlayerStatus {
            state: PlayerState::Idle,
            current: None,
            upcoming: 0,
            volume: volume.effective_volume(),
            channel_id: None,
        });

        let task = PlayerTask {
            guild_id: parts.guild_id,
            instance: parts.instance,
            state: PlayerState::Idle,
            queue: Queue::new(),
            applied_volume: volume.effective_volume(),
            volume,
            settings: parts.settings,
            options: parts.options,
            transport: parts.transport,
            connection: None,
            playback: None,
            leave_timer: Timer::new(),
            duck_release: Timer::new(),
            ramp_timer: Timer::new(),
            ramp: None,
            status: status_tx,
            notices: parts.notices,
            registry: parts.registry,
        };
        tokio::spawn(task.run(commands_rx));

        Self {
            guild_id: parts.guild_id,
            instance: parts.instance,
            commands: commands_tx,
            status: status_rx,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn instance_id(&self) -> u64 {
        self.instance
    }

    pub fn status(&self) -> PlayerStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> PlayerState {
        self.status.borrow().state
    }

    /// Canción actual. Lectura pura, sin pasar por el buzón.
    pub fn current(&self) -> Option<Track> {
        self.status.borrow().current.clone()
    }

    /// `false` cuando la instancia terminó o está terminando.
    pub fn is_live(&self) -> bool {
        !self.commands.is_closed() && self.state() != PlayerState::Disconnected
    }

    /// Espera a que la tarea del player termine.
    pub async fn closed(&self) {
        self.commands.closed().await
    }

    pub fn watch(&self) -> watch::Receiver<PlayerStatus> {
        self.status.clone()
    }

    pub async fn enqueue(&self, request: EnqueueRequest) -> PlayerResult<EnqueueOutcome> {
        if request.tracks.is_empty() {
            return Err(PlayerError::InvalidArgument(
                "No hay canciones para agregar".to_string(),
            ));
        }
        self.request(|reply| Command::Enqueue(request, reply)).await
    }

    /// Descarta la canción actual y las `count - 1` siguientes.
    pub async fn forward(&self, count: i64) -> PlayerResult<Track> {
        let count = usize::try_from(count)
            .ok()
            .filter(|count| *count >= 1)
            .ok_or_else(|| {
                PlayerError::InvalidArgument(format!(
                    "La cantidad a saltar debe ser al menos 1, recibido: {count}"
                ))
            })?;
        self.request(|reply| Command::Forward(count, reply)).await
    }

    pub async fn pause(&self) -> PlayerResult<()> {
        self.request(Command::Pause).await
    }

    pub async fn resume(&self) -> PlayerResult<()> {
        self.request(Command::Resume).await
    }

    pub async fn set_volume(&self, percent: i64) -> PlayerResult<()> {
        let percent = validate_percent(percent)?;
        self.request(|reply| Command::SetVolume(percent, reply)).await
    }

    /// Elimina la canción en la posición `position` de las pendientes (empieza en 1).
    pub async fn remove(&self, position: i64) -> PlayerResult<Track> {
        let position = usize::try_from(position)
            .ok()
            .filter(|position| *position >= 1)
            .ok_or_else(|| {
                PlayerError::InvalidArgument(format!("Posición inválida: {position}"))
            })?;
        self.request(|reply| Command::Remove(position, reply)).await
    }

    /// Vacía las canciones pendientes, manteniendo la actual.
    pub async fn clear(&self) -> PlayerResult<usize> {
        self.ask(Command::Clear).await
    }

    pub async fn snapshot(&self) -> PlayerResult<PlayerSnapshot> {
        self.ask(Command::Snapshot).await
    }

    pub async fn destroy(&self) -> PlayerResult<()> {
        self.destroy_with(LeaveReason::Requested).await
    }

    pub(crate) async fn destroy_with(&self, reason: LeaveReason) -> PlayerResult<()> {
        match self.ask(|reply| Command::Destroy(reason, reply)).await {
            // Destruir dos veces no es un error
            Ok(()) | Err(PlayerError::Disconnected) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn refresh_settings(&self, settings: GuildSettings) {
        self.notify(Command::RefreshSettings(settings)).await
    }

    pub async fn track_finished(&self, playback: PlaybackId) {
        self.notify(Command::TrackFinished(playback)).await
    }

    pub async fn voice_activity(&self, active: bool) {
        self.notify(Command::VoiceActivity(active)).await
    }

    /// Oyentes en el canal del bot, sin contar al propio bot.
    pub async fn listener_count(&self, count: usize) {
        self.notify(Command::ListenerCount(count)).await
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> PlayerResult<T> {
        self.ask(build).await?
    }

    async fn ask<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> PlayerResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| PlayerError::Disconnected)?;
        response.await.map_err(|_| PlayerError::Disconnected)
    }

    /// Entrega un evento sin esperar lugar en el buzón.
    ///
    /// Los eventos llegan desde una única tarea compartida por todas las guilds;
    /// un buzón lleno se espera en una tarea aparte para no frenar a las demás.
    async fn notify(&self, command: Command) {
        match self.commands.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(command)) => {
                debug!("Buzón lleno en guild {}, evento diferido", self.guild_id);
                let commands = self.commands.clone();
                tokio::spawn(async move {
                    let _ = commands.send(command).await;
                });
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Evento descartado: el player de guild {} ya terminó", self.guild_id);
            }
        }
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("guild_id", &self.guild_id)
            .field("instance", &self.instance)
            .field("state", &self.state())
            .finish()
    }
}

/// Estado mutable de un player; vive dentro de su propia tarea.
struct PlayerTask {
    guild_id: GuildId,
    instance: u64,
    state: PlayerState,
    queue: Queue,
    volume: VolumeController,
    /// Último nivel enviado al transporte.
    applied_volume: u8,
    settings: GuildSettings,
    options: PlayerOptions,
    transport: Arc<dyn Transport>,
    connection: Option<ConnectionHandle>,
    playback: Option<PlaybackId>,
    leave_timer: Timer,
    duck_release: Timer,
    ramp_timer: Timer,
    ramp: Option<VolumeRamp>,
    status: watch::Sender<PlayerStatus>,
    notices: broadcast::Sender<PlayerNotice>,
    registry: Weak<PlayerMap>,
}

impl PlayerTask {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        debug!("🎛️ Player {} iniciado para guild {}", self.instance, self.guild_id);

        while self.state != PlayerState::Disconnected {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    // Ya no quedan handles: nadie puede volver a usar este player
                    None => self.teardown(LeaveReason::Requested).await,
                },
                _ = Timer::fired(self.leave_timer.deadline()) => self.on_leave_timer().await,
                _ = Timer::fired(self.duck_release.deadline()) => self.on_duck_release(),
                _ = Timer::fired(self.ramp_timer.deadline()) => self.on_ramp_tick().await,
            }
        }

        debug!("Player {} de guild {} terminado", self.instance, self.guild_id);
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Enqueue(request, reply) => {
                let _ = reply.send(self.enqueue(request).await);
            }
            Command::Forward(count, reply) => {
                let _ = reply.send(self.forward(count).await);
            }
            Command::Pause(reply) => {
                let _ = reply.send(self.pause().await);
            }
            Command::Resume(reply) => {
                let _ = reply.send(self.resume().await);
            }
            Command::SetVolume(percent, reply) => {
                let _ = reply.send(self.set_volume(percent).await);
            }
            Command::Remove(position, reply) => {
                let _ = reply.send(self.remove(position));
            }
            Command::Clear(reply) => {
                let removed = self.queue.clear_upcoming();
                info!("🗑️ Cola limpiada en guild {}: {} tracks removidos", self.guild_id, removed);
                self.publish();
                let _ = reply.send(removed);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(PlayerSnapshot {
                    state: self.state,
                    queue: self.queue.snapshot(),
                    volume: self.volume,
                    settings: self.settings.clone(),
                });
            }
            Command::RefreshSettings(settings) => self.refresh_settings(settings),
            Command::TrackFinished(playback) => self.on_track_finished(playback).await,
            Command::VoiceActivity(active) => self.on_voice_activity(active),
            Command::ListenerCount(count) => self.on_listener_count(count).await,
            Command::Destroy(reason, reply) => {
                self.teardown(reason).await;
                let _ = reply.send(());
            }
        }
    }

    async fn enqueue(&mut self, request: EnqueueRequest) -> PlayerResult<EnqueueOutcome> {
        let added = request.tracks.len();
        if added > self.settings.playlist_limit {
            return Err(PlayerError::PlaylistTooLarge {
                requested: added,
                limit: self.settings.playlist_limit,
            });
        }

        // Cualquier enqueue cancela una salida pendiente
        self.leave_timer.disarm();

        let mode = if request.skip_current {
            InsertMode::Front
        } else {
            request.mode
        };
        let cursor = self.queue.cursor().unwrap_or(0);
        let index = self.queue.enqueue(request.tracks, mode, request.shuffle);
        info!("➕ {} canciones agregadas a la cola de guild {}", added, self.guild_id);

        let active = matches!(self.state, PlayerState::Playing | PlayerState::Paused);
        let (started, position) = if active && request.skip_current {
            (Some(self.forward(1).await?), 0)
        } else if active {
            self.publish();
            (None, index.saturating_sub(cursor))
        } else {
            self.queue.start();
            let started = self.begin_playback(request.channel_id).await?;
            (started, index)
        };

        Ok(EnqueueOutcome {
            added,
            position,
            started,
            response_hidden: self.settings.queue_add_response_hidden,
        })
    }

    /// Conecta si hace falta y empieza a reproducir la canción actual.
    async fn begin_playback(&mut self, channel_id: ChannelId) -> PlayerResult<Option<Track>> {
        if self.connection.is_none() {
            self.set_state(PlayerState::Connecting);

            match self.transport.connect(self.guild_id, channel_id).await {
                Ok(handle) => {
                    info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, self.guild_id);
                    self.connection = Some(handle);
                }
                Err(e) => {
                    warn!("❌ Error al conectar en guild {}: {}", self.guild_id, e);
                    self.queue.clear();
                    self.set_state(PlayerState::Idle);
                    self.arm_leave_timer();
                    return Err(PlayerError::ConnectionFailed(e.to_string()));
                }
            }
        }

        Ok(self.play_current().await)
    }

    /// Reproduce la canción bajo el cursor; si falla, la descarta y prueba la siguiente.
    async fn play_current(&mut self) -> Option<Track> {
        let connection = self.connection?;

        while let Some(track) = self.queue.current().cloned() {
            let playback = PlaybackId(NEXT_PLAYBACK.fetch_add(1, Ordering::Relaxed));
            let volume = self.volume.effective_volume();

            match self.transport.play(&connection, &track, playback, volume).await {
                Ok(()) => {
                    info!("🎵 Reproduciendo en guild {}: {}", self.guild_id, track);
                    self.playback = Some(playback);
                    self.applied_volume = volume;
                    self.set_state(PlayerState::Playing);
                    let _ = self.notices.send(PlayerNotice::TrackStarted {
                        guild_id: self.guild_id,
                        track: track.clone(),
                        announce: self.settings.auto_announce_next_song,
                    });
                    return Some(track);
                }
                Err(e) => {
                    warn!("⏭️ Saltando track problemático {}: {}", track.title(), e);
                    self.queue.advance(1);
                }
            }
        }

        self.become_idle().await;
        None
    }

    async fn become_idle(&mut self) {
        info!("📭 Cola vacía en guild {}", self.guild_id);
        self.playback = None;
        if let Some(connection) = self.connection {
            self.transport.stop(&connection).await;
        }
        self.set_state(PlayerState::Idle);
        let _ = self.notices.send(PlayerNotice::QueueFinished {
            guild_id: self.guild_id,
        });
        self.arm_leave_timer();
    }

    /// Arma el timer de salida según la guild; un retraso de 0 lo desactiva.
    fn arm_leave_timer(&mut self) {
        match self.settings.leave_delay() {
            Some(delay) => {
                debug!("⏲️ Salida programada en {:?} para guild {}", delay, self.guild_id);
                self.leave_timer.arm(delay);
            }
            None => self.leave_timer.disarm(),
        }
    }

    async fn forward(&mut self, count: usize) -> PlayerResult<Track> {
        if self.queue.current().is_none() {
            return Err(PlayerError::NoNextTrack);
        }

        let discarded = self.queue.advance(count);
        info!("⏭️ Saltadas {} canciones en guild {}", discarded, self.guild_id);

        // Saltar estando en pausa reanuda con la nueva canción
        match self.play_current().await {
            Some(track) => Ok(track),
            None => Err(PlayerError::NoNextTrack),
        }
    }

    async fn pause(&mut self) -> PlayerResult<()> {
        match (self.state, self.connection) {
            (PlayerState::Playing, Some(connection)) => {
                self.transport.pause(&connection).await;
                self.set_state(PlayerState::Paused);
                info!("⏸️ Reproducción pausada en guild {}", self.guild_id);
                Ok(())
            }
            (PlayerState::Paused, _) => Ok(()),
            _ => Err(PlayerError::NothingPlaying),
        }
    }

    async fn resume(&mut self) -> PlayerResult<()> {
        match (self.state, self.connection) {
            (PlayerState::Paused, Some(connection)) => {
                self.transport.resume(&connection).await;
                self.set_state(PlayerState::Playing);
                info!("▶️ Reproducción reanudada en guild {}", self.guild_id);
                Ok(())
            }
            (PlayerState::Playing, _) => Ok(()),
            _ => Err(PlayerError::NothingPlaying),
        }
    }

    async fn set_volume(&mut self, percent: u8) -> PlayerResult<()> {
        self.volume.set_base(i64::from(percent))?;
        info!("🔊 Volumen ajustado a {}% en guild {}", percent, self.guild_id);

        if !self.volume.is_ducking() {
            self.ramp = None;
            self.ramp_timer.disarm();
            if let Some(connection) = self.connection {
                self.transport.set_volume(&connection, percent).await;
            }
            self.applied_volume = percent;
        }
        self.publish();
        Ok(())
    }

    fn remove(&mut self, position: usize) -> PlayerResult<Track> {
        let offset = self.queue.cursor().map_or(0, |cursor| cursor + 1);
        let index = offset + position - 1;
        let removed = self.queue.remove(index).ok_or_else(|| {
            PlayerError::InvalidArgument(format!(
                "Posición fuera de rango: {} (hay {} en cola)",
                position,
                self.queue.upcoming_len()
            ))
        })?;

        debug!("❌ Track eliminado en posición {} de guild {}", position, self.guild_id);
        self.publish();
        Ok(removed)
    }

    fn refresh_settings(&mut self, settings: GuildSettings) {
        debug!("⚙️ Configuración actualizada para guild {}", self.guild_id);
        self.settings = settings;

        // Un player inactivo vuelve a contar con el nuevo retraso, aunque antes fuera 0
        if self.leave_timer.is_armed() || self.state == PlayerState::Idle {
            self.arm_leave_timer();
        }

        let target_changed = self.volume.duck_target() != self.settings.duck_target_volume;
        self.volume.set_duck_target(self.settings.duck_target_volume);

        if !self.settings.duck_enabled && self.volume.is_ducking() {
            self.duck_release.disarm();
            self.volume.set_ducking(false);
            self.start_ramp();
        } else if target_changed && self.volume.is_ducking() {
            self.start_ramp();
        }
        self.publish();
    }

    async fn on_track_finished(&mut self, playback: PlaybackId) {
        let playing = matches!(self.state, PlayerState::Playing | PlayerState::Paused);
        if !playing || self.playback != Some(playback) {
            debug!("Aviso de fin ignorado en guild {}: {}", self.guild_id, playback);
            return;
        }

        self.queue.advance(1);
        self.play_current().await;
    }

    fn on_voice_activity(&mut self, active: bool) {
        if active {
            let playing = matches!(self.state, PlayerState::Playing | PlayerState::Paused);
            if !self.settings.duck_enabled || !playing {
                return;
            }

            self.duck_release.disarm();
            if self.volume.set_ducking(true) {
                debug!("🦆 Ducking activado en guild {}", self.guild_id);
                self.start_ramp();
                self.publish();
            }
        } else if self.volume.is_ducking() {
            // Se mantiene el ducking un rato para no oscilar con cada pausa al hablar
            self.duck_release.arm(self.options.duck_release);
        }
    }

    fn on_duck_release(&mut self) {
        self.duck_release.disarm();
        if self.volume.set_ducking(false) {
            debug!("🦆 Ducking desactivado en guild {}", self.guild_id);
            self.start_ramp();
            self.publish();
        }
    }

    /// Inicia la interpolación desde el último nivel aplicado hasta el efectivo.
    fn start_ramp(&mut self) {
        let target = self.volume.effective_volume();
        if self.connection.is_none() || self.playback.is_none() {
            self.applied_volume = target;
            return;
        }

        let steps = (self.options.volume_fade.as_millis() / FADE_STEP.as_millis()) as u32;
        self.ramp = Some(VolumeRamp::new(self.applied_volume, target, steps));
        self.ramp_timer.arm(Duration::ZERO);
    }

    async fn on_ramp_tick(&mut self) {
        let level = self.ramp.as_mut().and_then(Iterator::next);
        if let (Some(level), Some(connection)) = (level, self.connection) {
            self.transport.set_volume(&connection, level).await;
            self.applied_volume = level;
        }

        if self.ramp.as_ref().map_or(true, VolumeRamp::is_finished) {
            self.ramp = None;
            self.ramp_timer.disarm();
        } else {
            self.ramp_timer.arm(FADE_STEP);
        }
    }

    async fn on_listener_count(&mut self, count: usize) {
        if count == 0 && self.settings.leave_if_no_listeners {
            info!("🚪 Canal vacío en guild {}, desconectando", self.guild_id);
            self.teardown(LeaveReason::NoListeners).await;
        }
    }

    async fn on_leave_timer(&mut self) {
        self.leave_timer.disarm();
        if self.state == PlayerState::Idle {
            info!("🚪 Desconectando por inactividad en guild {}", self.guild_id);
            self.teardown(LeaveReason::IdleTimeout).await;
        }
    }

    async fn teardown(&mut self, reason: LeaveReason) {
        if self.state == PlayerState::Disconnected {
            return;
        }

        self.leave_timer.disarm();
        self.duck_release.disarm();
        self.ramp_timer.disarm();
        self.ramp = None;
        self.queue.clear();
        self.playback = None;

        // Primero se publica el estado terminal y se sale del registro, para que
        // ningún `get` concurrente devuelva esta instancia a medio destruir
        let connection = self.connection.take();
        self.set_state(PlayerState::Disconnected);
        if let Some(players) = self.registry.upgrade() {
            players.remove_if(&self.guild_id, |_, player| player.instance_id() == self.instance);
        }

        if let Some(connection) = connection {
            self.transport.stop(&connection).await;
            self.transport.disconnect(&connection).await;
        }

        info!("👋 Player desconectado en guild {} ({:?})", self.guild_id, reason);
        let _ = self.notices.send(PlayerNotice::Left {
            guild_id: self.guild_id,
            reason,
        });
    }

    fn set_state(&mut self, state: PlayerState) {
        if self.state != state {
            debug!("Guild {}: {:?} -> {:?}", self.guild_id, self.state, state);
            self.state = state;
        }
        self.publish();
    }

    fn publish(&self) {
        self.status.send_replace(PlayerStatus {
            state: self.state,
            current: self.queue.current().cloned(),
            upcoming: self.queue.upcoming_len(),
            volume: self.volume.effective_volume(),
            channel_id: self.connection.map(|connection| connection.channel_id),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{Call, RecordingTransport};
    use pretty_assertions::assert_eq;
    use serenity::model::id::UserId;

    const GUILD: GuildId = GuildId::new(1);
    const CHANNEL: ChannelId = ChannelId::new(10);

    fn track(title: &str) -> Track {
        Track::new(format!("https://example.com/{title}.mp3"), title, UserId::new(5))
    }

    fn tracks(titles: &[&str]) -> Vec<Track> {
        titles.iter().map(|title| track(title)).collect()
    }

    fn request(titles: &[&str]) -> EnqueueRequest {
        EnqueueRequest::new(CHANNEL, tracks(titles))
    }

    fn spawn_with(settings: GuildSettings) -> (Player, Arc<RecordingTransport>, broadcast::Receiver<PlayerNotice>) {
        let transport = Arc::new(RecordingTransport::new());
        let (notices, notices_rx) = broadcast::channel(64);
        let player = Player::spawn(PlayerParts {
            guild_id: GUILD,
            instance: 1,
            settings,
            options: PlayerOptions::default(),
            transport: transport.clone(),
            notices,
            registry: Weak::new(),
        });
        (player, transport, notices_rx)
    }

    fn spawn_default() -> (Player, Arc<RecordingTransport>) {
        let (player, transport, _) = spawn_with(GuildSettings::default());
        (player, transport)
    }

    fn upcoming(snapshot: &PlayerSnapshot) -> Vec<&str> {
        snapshot.queue.upcoming.iter().map(Track::title).collect()
    }

    #[tokio::test]
    async fn enqueue_forward_scenario() {
        let (player, transport) = spawn_default();
        assert_eq!(player.state(), PlayerState::Idle);

        let outcome = player.enqueue(request(&["A", "B", "C"])).await.unwrap();
        assert_eq!(outcome.added, 3);
        assert_eq!(outcome.position, 0);
        assert_eq!(outcome.started.as_ref().map(Track::title), Some("A"));
        assert_eq!(player.state(), PlayerState::Playing);
        assert_eq!(player.current().map(|t| t.title().to_string()), Some("A".to_string()));
        assert_eq!(upcoming(&player.snapshot().await.unwrap()), vec!["B", "C"]);

        let current = player.forward(2).await.unwrap();
        assert_eq!(current.title(), "C");
        assert!(upcoming(&player.snapshot().await.unwrap()).is_empty());

        assert_eq!(player.forward(1).await, Err(PlayerError::NoNextTrack));
        assert_eq!(player.state(), PlayerState::Idle);
        assert_eq!(player.current(), None);

        assert_eq!(transport.played(), vec!["A", "C"]);
        assert_eq!(transport.count(&Call::Connect(GUILD, CHANNEL)), 1);
    }

    #[tokio::test]
    async fn forward_one_lands_on_second_in_line() {
        let (player, _) = spawn_default();
        player.enqueue(request(&["A", "B", "C"])).await.unwrap();

        assert_eq!(player.forward(1).await.unwrap().title(), "B");
        assert_eq!(player.current().map(|t| t.title().to_string()), Some("B".to_string()));
    }

    #[tokio::test]
    async fn forward_past_end_goes_idle() {
        let (player, transport) = spawn_default();
        player.enqueue(request(&["A", "B"])).await.unwrap();

        assert_eq!(player.forward(5).await, Err(PlayerError::NoNextTrack));
        assert_eq!(player.state(), PlayerState::Idle);
        assert_eq!(transport.count(&Call::Stop), 1);
    }

    #[tokio::test]
    async fn forward_on_idle_player_has_nothing_to_skip() {
        let (player, _) = spawn_default();
        assert_eq!(player.forward(1).await, Err(PlayerError::NoNextTrack));
        assert_eq!(player.state(), PlayerState::Idle);
    }

    #[tokio::test]
    async fn invalid_arguments_fail_without_state_change() {
        let (player, transport) = spawn_default();
        player.enqueue(request(&["A"])).await.unwrap();

        assert!(matches!(player.forward(0).await, Err(PlayerError::InvalidArgument(_))));
        assert!(matches!(player.forward(-3).await, Err(PlayerError::InvalidArgument(_))));
        assert!(matches!(player.set_volume(150).await, Err(PlayerError::InvalidArgument(_))));
        assert!(matches!(player.set_volume(-1).await, Err(PlayerError::InvalidArgument(_))));
        assert!(matches!(
            player.enqueue(EnqueueRequest::new(CHANNEL, Vec::new())).await,
            Err(PlayerError::InvalidArgument(_))
        ));
        assert!(matches!(player.remove(0).await, Err(PlayerError::InvalidArgument(_))));

        assert_eq!(player.state(), PlayerState::Playing);
        assert_eq!(player.current().map(|t| t.title().to_string()), Some("A".to_string()));

        player.set_volume(0).await.unwrap();
        player.set_volume(100).await.unwrap();
        assert_eq!(transport.volumes(), vec![0, 100]);
        assert_eq!(player.status().volume, 100);
    }

    #[tokio::test]
    async fn oversized_batch_leaves_queue_untouched() {
        let (player, transport, _) = spawn_with(GuildSettings {
            playlist_limit: 2,
            ..GuildSettings::default()
        });

        let result = player.enqueue(request(&["A", "B", "C"])).await;
        assert_eq!(
            result,
            Err(PlayerError::PlaylistTooLarge { requested: 3, limit: 2 })
        );

        let snapshot = player.snapshot().await.unwrap();
        assert_eq!(snapshot.state, PlayerState::Idle);
        assert!(snapshot.queue.current.is_none());
        assert!(snapshot.queue.upcoming.is_empty());
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn append_while_playing_reports_position() {
        let (player, _) = spawn_default();
        player.enqueue(request(&["A", "B"])).await.unwrap();

        let outcome = player.enqueue(request(&["C", "D"])).await.unwrap();
        assert_eq!(outcome.position, 2);
        assert!(outcome.started.is_none());

        let outcome = player.enqueue(request(&["X"]).front()).await.unwrap();
        assert_eq!(outcome.position, 1);
        assert_eq!(upcoming(&player.snapshot().await.unwrap()), vec!["X", "B", "C", "D"]);
    }

    #[tokio::test]
    async fn skip_current_plays_new_batch_immediately() {
        let (player, transport) = spawn_default();
        player.enqueue(request(&["A", "B"])).await.unwrap();

        let outcome = player
            .enqueue(request(&["Fav"]).skipping_current(true))
            .await
            .unwrap();
        assert_eq!(outcome.position, 0);
        assert_eq!(outcome.started.as_ref().map(Track::title), Some("Fav"));
        assert_eq!(upcoming(&player.snapshot().await.unwrap()), vec!["B"]);
        assert_eq!(transport.played(), vec!["A", "Fav"]);
    }

    #[tokio::test]
    async fn skip_while_paused_resumes_into_next_track() {
        let (player, _) = spawn_default();
        player.enqueue(request(&["A", "B"])).await.unwrap();
        player.pause().await.unwrap();
        assert_eq!(player.state(), PlayerState::Paused);

        assert_eq!(player.forward(1).await.unwrap().title(), "B");
        assert_eq!(player.state(), PlayerState::Playing);
    }

    #[tokio::test]
    async fn pause_and_resume() {
        let (player, transport) = spawn_default();
        assert_eq!(player.pause().await, Err(PlayerError::NothingPlaying));
        assert_eq!(player.resume().await, Err(PlayerError::NothingPlaying));

        player.enqueue(request(&["A"])).await.unwrap();
        player.pause().await.unwrap();
        player.pause().await.unwrap();
        assert_eq!(player.state(), PlayerState::Paused);

        player.resume().await.unwrap();
        assert_eq!(player.state(), PlayerState::Playing);
        assert_eq!(transport.count(&Call::Pause), 1);
        assert_eq!(transport.count(&Call::Resume), 1);
    }

    #[tokio::test]
    async fn connection_failure_leaves_player_idle_and_retryable() {
        let (player, transport) = spawn_default();
        transport.fail_connect(true);

        let result = player.enqueue(request(&["A"])).await;
        assert!(matches!(result, Err(PlayerError::ConnectionFailed(_))));
        assert_eq!(player.state(), PlayerState::Idle);
        assert_eq!(player.current(), None);

        transport.fail_connect(false);
        let outcome = player.enqueue(request(&["B"])).await.unwrap();
        assert_eq!(outcome.started.as_ref().map(Track::title), Some("B"));
        assert_eq!(player.state(), PlayerState::Playing);
        assert_eq!(transport.played(), vec!["B"]);
    }

    #[tokio::test]
    async fn unplayable_tracks_are_skipped() {
        let (player, transport) = spawn_default();
        transport.fail_play_for("A");

        let outcome = player.enqueue(request(&["A", "B"])).await.unwrap();
        assert_eq!(outcome.started.as_ref().map(Track::title), Some("B"));
        assert_eq!(transport.played(), vec!["B"]);
    }

    #[tokio::test]
    async fn play_through_advances_and_ignores_stale_reports() {
        let (player, transport) = spawn_default();
        player.enqueue(request(&["A", "B", "C"])).await.unwrap();
        let first = transport.last_playback().unwrap();

        // `forward` reemplaza A; su aviso de fin llega tarde y se ignora
        player.forward(1).await.unwrap();
        player.track_finished(first).await;
        assert_eq!(player.snapshot().await.unwrap().queue.current.unwrap().title(), "B");

        let second = transport.last_playback().unwrap();
        player.track_finished(second).await;
        assert_eq!(player.snapshot().await.unwrap().queue.current.unwrap().title(), "C");

        let third = transport.last_playback().unwrap();
        player.track_finished(third).await;
        let snapshot = player.snapshot().await.unwrap();
        assert_eq!(snapshot.state, PlayerState::Idle);
        assert!(snapshot.queue.current.is_none());
    }

    #[tokio::test]
    async fn remove_and_clear_upcoming() {
        let (player, _) = spawn_default();
        player.enqueue(request(&["A", "B", "C", "D"])).await.unwrap();

        assert_eq!(player.remove(2).await.unwrap().title(), "C");
        assert!(matches!(player.remove(9).await, Err(PlayerError::InvalidArgument(_))));
        assert_eq!(upcoming(&player.snapshot().await.unwrap()), vec!["B", "D"]);

        assert_eq!(player.clear().await.unwrap(), 2);
        let snapshot = player.snapshot().await.unwrap();
        assert_eq!(snapshot.queue.current.unwrap().title(), "A");
        assert!(snapshot.queue.upcoming.is_empty());
    }

    #[tokio::test]
    async fn notices_follow_auto_announce_setting() {
        let (player, _, mut notices) = spawn_with(GuildSettings {
            auto_announce_next_song: false,
            ..GuildSettings::default()
        });
        player.enqueue(request(&["A"])).await.unwrap();

        match notices.recv().await.unwrap() {
            PlayerNotice::TrackStarted { track, announce, .. } => {
                assert_eq!(track.title(), "A");
                assert!(!announce);
            }
            other => panic!("aviso inesperado: {other:?}"),
        }

        player.forward(1).await.unwrap_err();
        assert_eq!(
            notices.recv().await.unwrap(),
            PlayerNotice::QueueFinished { guild_id: GUILD }
        );
    }

    #[tokio::test]
    async fn destroy_releases_everything() {
        let (player, transport, mut notices) = spawn_with(GuildSettings::default());
        player.enqueue(request(&["A", "B"])).await.unwrap();

        player.destroy().await.unwrap();
        assert_eq!(player.state(), PlayerState::Disconnected);
        assert!(!player.is_live());
        assert_eq!(transport.count(&Call::Disconnect(GUILD)), 1);

        // Destruir de nuevo es idempotente y el resto falla con Disconnected
        player.destroy().await.unwrap();
        assert_eq!(player.enqueue(request(&["C"])).await, Err(PlayerError::Disconnected));

        let mut left = None;
        while let Ok(notice) = notices.try_recv() {
            if let PlayerNotice::Left { reason, .. } = notice {
                left = Some(reason);
            }
        }
        assert_eq!(left, Some(LeaveReason::Requested));
    }

    #[tokio::test]
    async fn no_listeners_disconnects_regardless_of_queue() {
        let (player, transport) = spawn_default();
        player.enqueue(request(&["A", "B"])).await.unwrap();

        player.listener_count(2).await;
        assert_eq!(player.snapshot().await.unwrap().state, PlayerState::Playing);

        player.listener_count(0).await;
        player.closed().await;
        assert_eq!(player.state(), PlayerState::Disconnected);
        assert_eq!(transport.count(&Call::Disconnect(GUILD)), 1);
    }

    #[tokio::test]
    async fn listener_leave_can_be_disabled() {
        let (player, _, _) = spawn_with(GuildSettings {
            leave_if_no_listeners: false,
            ..GuildSettings::default()
        });
        player.enqueue(request(&["A"])).await.unwrap();

        player.listener_count(0).await;
        assert_eq!(player.snapshot().await.unwrap().state, PlayerState::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_leave_delay_never_leaves() {
        let (player, _, _) = spawn_with(GuildSettings {
            leave_delay_secs: 0,
            ..GuildSettings::default()
        });
        player.enqueue(request(&["A"])).await.unwrap();
        player.forward(1).await.unwrap_err();

        tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        assert_eq!(player.snapshot().await.unwrap().state, PlayerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn leave_timer_fires_after_delay_and_enqueue_cancels_it() {
        let (player, transport, _) = spawn_with(GuildSettings {
            leave_delay_secs: 5,
            ..GuildSettings::default()
        });
        player.enqueue(request(&["A"])).await.unwrap();
        player.forward(1).await.unwrap_err();

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(player.state(), PlayerState::Idle);

        // Un enqueue antes del plazo cancela la salida
        player.enqueue(request(&["B"])).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(player.state(), PlayerState::Playing);

        player.forward(1).await.unwrap_err();
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(player.state(), PlayerState::Idle);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(player.state(), PlayerState::Disconnected);
        assert_eq!(transport.count(&Call::Connect(GUILD, CHANNEL)), 1);
        assert_eq!(transport.count(&Call::Disconnect(GUILD)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refreshed_settings_rearm_leave_timer() {
        let (player, _, _) = spawn_with(GuildSettings {
            leave_delay_secs: 5,
            ..GuildSettings::default()
        });
        player.enqueue(request(&["A"])).await.unwrap();
        player.forward(1).await.unwrap_err();

        player
            .refresh_settings(GuildSettings {
                leave_delay_secs: 0,
                ..GuildSettings::default()
            })
            .await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(player.snapshot().await.unwrap().state, PlayerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn refreshed_settings_enable_leave_on_idle_player() {
        let (player, transport, _) = spawn_with(GuildSettings {
            leave_delay_secs: 0,
            ..GuildSettings::default()
        });
        player.enqueue(request(&["A"])).await.unwrap();
        player.forward(1).await.unwrap_err();

        player
            .refresh_settings(GuildSettings {
                leave_delay_secs: 5,
                ..GuildSettings::default()
            })
            .await;
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(player.state(), PlayerState::Idle);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(player.state(), PlayerState::Disconnected);
        assert_eq!(transport.count(&Call::Disconnect(GUILD)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_leave_delay_never_fires() {
        let (player, _, _) = spawn_with(GuildSettings {
            leave_delay_secs: u64::MAX,
            ..GuildSettings::default()
        });
        player.enqueue(request(&["A"])).await.unwrap();
        assert_eq!(player.forward(1).await, Err(PlayerError::NoNextTrack));

        tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        assert!(player.is_live());
        assert_eq!(player.snapshot().await.unwrap().state, PlayerState::Idle);

        // Sigue aceptando trabajo
        player.enqueue(request(&["B"])).await.unwrap();
        assert_eq!(player.state(), PlayerState::Playing);
    }

    fn ducking_settings() -> GuildSettings {
        GuildSettings {
            duck_enabled: true,
            duck_target_volume: 30,
            default_volume: 100,
            ..GuildSettings::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn voice_activity_ducks_and_restores_after_grace() {
        let (player, transport, _) = spawn_with(ducking_settings());
        player.enqueue(request(&["A"])).await.unwrap();

        player.voice_activity(true).await;
        let snapshot = player.snapshot().await.unwrap();
        assert!(snapshot.volume.is_ducking());
        assert_eq!(snapshot.volume.effective_volume(), 30);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(transport.volumes().last(), Some(&30));

        player.voice_activity(false).await;
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(player.snapshot().await.unwrap().volume.effective_volume(), 30);

        // Nueva actividad durante el periodo de gracia mantiene el ducking
        player.voice_activity(true).await;
        player.voice_activity(false).await;
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(player.snapshot().await.unwrap().volume.effective_volume(), 30);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(player.snapshot().await.unwrap().volume.effective_volume(), 100);

        tokio::time::sleep(Duration::from_millis(400)).await;
        let volumes = transport.volumes();
        assert_eq!(volumes.last(), Some(&100));
        // La transición pasa por niveles intermedios
        assert!(volumes.iter().any(|level| *level > 30 && *level < 100));
    }

    #[tokio::test(start_paused = true)]
    async fn voice_activity_ignored_when_disabled_or_idle() {
        let (player, _, _) = spawn_with(GuildSettings {
            duck_enabled: false,
            ..ducking_settings()
        });
        player.enqueue(request(&["A"])).await.unwrap();
        player.voice_activity(true).await;
        assert!(!player.snapshot().await.unwrap().volume.is_ducking());

        let (idle, _, _) = spawn_with(ducking_settings());
        idle.voice_activity(true).await;
        assert!(!idle.snapshot().await.unwrap().volume.is_ducking());
    }

    #[tokio::test(start_paused = true)]
    async fn set_volume_while_ducking_applies_after_release() {
        let (player, _, _) = spawn_with(ducking_settings());
        player.enqueue(request(&["A"])).await.unwrap();
        player.voice_activity(true).await;

        player.set_volume(60).await.unwrap();
        assert_eq!(player.status().volume, 30);

        player.voice_activity(false).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(player.snapshot().await.unwrap().volume.effective_volume(), 60);
    }

    #[tokio::test]
    async fn snapshot_pages_with_guild_page_size() {
        let (player, _, _) = spawn_with(GuildSettings {
            default_queue_page_size: 2,
            ..GuildSettings::default()
        });
        player.enqueue(request(&["A", "B", "C", "D", "E"])).await.unwrap();

        let page = player.snapshot().await.unwrap().page(2);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.items.iter().map(Track::title).collect::<Vec<_>>(), vec!["D", "E"]);
    }
}
