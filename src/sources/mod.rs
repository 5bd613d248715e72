//! # Sources Module
//!
//! Turns what a user typed (a URL or free text) into playable [`Track`]s.
//!
//! Resolution is the only slow step before enqueueing, so it runs outside the
//! player: command handlers resolve first, then hand the finished batch to
//! [`crate::audio::player::Player::enqueue`].

pub mod direct_url;
pub mod youtube;

use async_trait::async_trait;
use serenity::model::id::UserId;
use tracing::debug;

use crate::{audio::track::Track, error::ResolveError};

pub use direct_url::DirectUrlResolver;
pub use youtube::YtDlpResolver;

/// Trait común para todas las fuentes de música
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Resuelve la búsqueda en uno o más tracks, en orden de reproducción.
    async fn resolve(
        &self,
        query: &str,
        split_chapters: bool,
        requested_by: UserId,
    ) -> Result<Vec<Track>, ResolveError>;

    /// Verifica si la búsqueda le corresponde a esta fuente
    fn accepts(&self, query: &str) -> bool;

    fn source_name(&self) -> &'static str;
}

/// Encadena fuentes: la primera que acepta la búsqueda la resuelve.
pub struct SourceResolver {
    sources: Vec<Box<dyn TrackResolver>>,
}

impl SourceResolver {
    pub fn new(sources: Vec<Box<dyn TrackResolver>>) -> Self {
        Self { sources }
    }

    /// URL directa de audio primero, yt-dlp para todo lo demás.
    pub fn with_defaults(max_entries: usize) -> Self {
        Self::new(vec![
            Box::new(DirectUrlResolver::new()),
            Box::new(YtDlpResolver::new(max_entries)),
        ])
    }
}

#[async_trait]
impl TrackResolver for SourceResolver {
    async fn resolve(
        &self,
        query: &str,
        split_chapters: bool,
        requested_by: UserId,
    ) -> Result<Vec<Track>, ResolveError> {
        let source = self
            .sources
            .iter()
            .find(|source| source.accepts(query))
            .ok_or_else(|| ResolveError::NoResultsFound(query.to_string()))?;

        debug!("🔎 Resolviendo '{}' con {}", query, source.source_name());
        source.resolve(query, split_chapters, requested_by).await
    }

    fn accepts(&self, query: &str) -> bool {
        self.sources.iter().any(|source| source.accepts(query))
    }

    fn source_name(&self) -> &'static str {
        "chain"
    }
}
