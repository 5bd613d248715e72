use async_process::Command;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serenity::model::id::UserId;
use std::{sync::LazyLock, time::Duration};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

use super::TrackResolver;
use crate::{audio::track::Track, error::ResolveError};

static YOUTUBE_URL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^(https?://)?(www\.)?(youtube\.com/(watch\?v=|embed/|v/|playlist\?)|youtu\.be/|music\.youtube\.com/)",
    )
    .ok()
});

/// Información extraída de yt-dlp, una línea JSON por entrada
#[derive(Debug, Deserialize)]
struct YtDlpEntry {
    title: Option<String>,
    duration: Option<f64>,
    webpage_url: Option<String>,
    url: Option<String>,
    #[serde(default)]
    chapters: Option<Vec<Chapter>>,
}

#[derive(Debug, Deserialize)]
struct Chapter {
    start_time: f64,
    end_time: f64,
    title: Option<String>,
}

/// Fuente basada en yt-dlp: búsquedas de texto, videos y playlists.
pub struct YtDlpResolver {
    max_entries: usize,
    // Limitar procesos concurrentes para evitar rate limiting
    rate_limiter: Semaphore,
}

impl YtDlpResolver {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            rate_limiter: Semaphore::new(3),
        }
    }

    /// Verifica si una URL es válida para YouTube
    pub fn is_youtube_url(url: &str) -> bool {
        YOUTUBE_URL
            .as_ref()
            .is_some_and(|regex| regex.is_match(url))
    }

    /// Verifica que el binario de yt-dlp se pueda ejecutar.
    pub async fn check_available() -> Result<String, ResolveError> {
        let output = Command::new("yt-dlp")
            .arg("--version")
            .output()
            .await
            .map_err(|e| ResolveError::ResolutionFailed(format!("yt-dlp no disponible: {e}")))?;

        if !output.status.success() {
            return Err(ResolveError::ResolutionFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn arguments(&self, query: &str) -> Vec<String> {
        let mut args: Vec<String> = vec!["--dump-json".into(), "--no-warnings".into()];

        match Url::parse(query) {
            Ok(url) if is_playlist_url(&url) => {
                args.extend([
                    "--flat-playlist".into(),
                    "--playlist-end".into(),
                    self.max_entries.to_string(),
                ]);
                args.push(query.to_string());
            }
            Ok(_) => {
                args.push("--no-playlist".into());
                args.push(query.to_string());
            }
            Err(_) => {
                args.push("--no-playlist".into());
                args.push(format!("ytsearch1:{query}"));
            }
        }
        args
    }
}

fn is_playlist_url(url: &Url) -> bool {
    url.path().contains("/playlist")
        || url.path().contains("/sets/")
        || url.query_pairs().any(|(key, _)| key == "list")
}

fn seconds(value: f64) -> Option<Duration> {
    (value.is_finite() && value >= 0.0).then(|| Duration::from_secs_f64(value))
}

/// Convierte la salida de yt-dlp en tracks, dividiendo por capítulos si se pide.
fn parse_entries(
    stdout: &str,
    split_chapters: bool,
    requested_by: UserId,
    max_entries: usize,
) -> Vec<Track> {
    let mut tracks = Vec::new();

    for line in stdout.lines().filter(|line| !line.trim().is_empty()) {
        let entry: YtDlpEntry = match serde_json::from_str(line) {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Línea de yt-dlp ignorada: {}", e);
                continue;
            }
        };

        let Some(link) = entry.webpage_url.or(entry.url) else {
            continue;
        };
        let title = entry.title.unwrap_or_else(|| link.clone());

        match entry.chapters.filter(|chapters| split_chapters && !chapters.is_empty()) {
            Some(chapters) => {
                for (index, chapter) in chapters.iter().enumerate() {
                    let Some(start) = seconds(chapter.start_time) else {
                        continue;
                    };
                    let length = seconds(chapter.end_time - chapter.start_time);
                    let name = chapter
                        .title
                        .clone()
                        .unwrap_or_else(|| format!("Capítulo {}", index + 1));

                    tracks.push(
                        Track::new(link.clone(), format!("{title} - {name}"), requested_by)
                            .with_chapter(start, length),
                    );
                }
            }
            None => {
                let mut track =
                    Track::new(link, title, requested_by).with_split_chapters(split_chapters);
                if let Some(duration) = entry.duration.and_then(seconds) {
                    track = track.with_duration(duration);
                }
                tracks.push(track);
            }
        }
    }

    tracks.truncate(max_entries);
    tracks
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    async fn resolve(
        &self,
        query: &str,
        split_chapters: bool,
        requested_by: UserId,
    ) -> Result<Vec<Track>, ResolveError> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| ResolveError::ResolutionFailed(e.to_string()))?;

        info!("🔍 Resolviendo con yt-dlp: {}", query);

        let output = Command::new("yt-dlp")
            .args(self.arguments(query))
            .output()
            .await
            .map_err(|e| ResolveError::ResolutionFailed(format!("Error al ejecutar yt-dlp: {e}")))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            warn!("yt-dlp error: {}", error.trim());
            return Err(ResolveError::ResolutionFailed(error.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let tracks = parse_entries(&stdout, split_chapters, requested_by, self.max_entries);
        if tracks.is_empty() {
            return Err(ResolveError::NoResultsFound(query.to_string()));
        }

        debug!("✅ {} tracks resueltos para '{}'", tracks.len(), query);
        Ok(tracks)
    }

    fn accepts(&self, _query: &str) -> bool {
        true
    }

    fn source_name(&self) -> &'static str {
        "yt-dlp"
    }
}
