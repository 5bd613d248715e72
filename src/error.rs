//! # Error Types
//!
//! Structured failures returned by the playback engine and its collaborators.
//!
//! Every operation on a player returns one of the [`PlayerError`] kinds, so
//! command handlers can always turn a failure into a user-facing message
//! without inspecting opaque error strings.

use thiserror::Error;

/// Fallos devueltos por las operaciones de un player.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlayerError {
    /// Argumento fuera de rango o con forma inválida. Nunca se reintenta.
    #[error("Argumento inválido: {0}")]
    InvalidArgument(String),

    /// `forward`/skip sin ninguna canción a la que saltar.
    #[error("No hay ninguna canción siguiente")]
    NoNextTrack,

    /// El lote supera el límite configurado para la guild.
    #[error("La playlist tiene {requested} canciones (máximo {limit})")]
    PlaylistTooLarge { requested: usize, limit: usize },

    /// No se pudo establecer la conexión de voz. El player queda en `Idle`.
    #[error("No se pudo conectar al canal de voz: {0}")]
    ConnectionFailed(String),

    #[error("No se encontraron resultados para: {0}")]
    NoResultsFound(String),

    #[error("Error al resolver la búsqueda: {0}")]
    ResolutionFailed(String),

    /// Pausa/reanudación sobre un player sin canción actual.
    #[error("No hay nada reproduciéndose")]
    NothingPlaying,

    /// La instancia del player ya terminó; `PlayerRegistry::get` crea una nueva.
    #[error("El player de esta guild ya fue desconectado")]
    Disconnected,
}

/// Fallos del servicio de resolución de búsquedas.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("No se encontraron resultados para: {0}")]
    NoResultsFound(String),

    #[error("Error al resolver la búsqueda: {0}")]
    ResolutionFailed(String),
}

impl From<ResolveError> for PlayerError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NoResultsFound(query) => Self::NoResultsFound(query),
            ResolveError::ResolutionFailed(reason) => Self::ResolutionFailed(reason),
        }
    }
}

/// Fallos del transporte de voz.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Error al unirse al canal de voz: {0}")]
    Join(String),

    #[error("No hay conexión de voz activa")]
    NotConnected,

    #[error("No se pudo crear input de audio: {0}")]
    Input(String),
}

/// Fallos del almacenamiento de configuración por guild.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Error de E/S: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON inválido: {0}")]
    Json(#[from] serde_json::Error),
}

pub type PlayerResult<T> = Result<T, PlayerError>;
