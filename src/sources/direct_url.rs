use async_trait::async_trait;
use serenity::model::id::UserId;
use url::Url;

use super::TrackResolver;
use crate::{audio::track::Track, error::ResolveError};

const AUDIO_EXTENSIONS: [&str; 6] = [".mp3", ".wav", ".ogg", ".flac", ".m4a", ".opus"];

/// `true` si es una URL http(s) que apunta directamente a un archivo de audio.
pub fn is_audio_file_url(query: &str) -> bool {
    let Ok(url) = Url::parse(query) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }

    let path = url.path().to_lowercase();
    AUDIO_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Fuente para URLs directas de archivos de audio; no consulta ningún servicio.
#[derive(Debug, Default)]
pub struct DirectUrlResolver;

impl DirectUrlResolver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TrackResolver for DirectUrlResolver {
    async fn resolve(
        &self,
        query: &str,
        _split_chapters: bool,
        requested_by: UserId,
    ) -> Result<Vec<Track>, ResolveError> {
        let url = Url::parse(query)
            .map_err(|e| ResolveError::ResolutionFailed(format!("URL inválida: {e}")))?;

        let title = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .map(|name| name.to_string())
            .unwrap_or_else(|| query.to_string());

        Ok(vec![Track::new(query, title, requested_by)])
    }

    fn accepts(&self, query: &str) -> bool {
        is_audio_file_url(query)
    }

    fn source_name(&self) -> &'static str {
        "direct"
    }
}
