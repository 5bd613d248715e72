use chrono::{DateTime, Utc};
use serenity::model::id::UserId;
use std::{fmt, time::Duration};

/// Una unidad reproducible. Inmutable una vez construida.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    query: String,
    title: String,
    duration: Option<Duration>,
    requested_by: UserId,
    split_chapters: bool,
    start_offset: Option<Duration>,
    added_at: DateTime<Utc>,
}

impl Track {
    pub fn new(query: impl Into<String>, title: impl Into<String>, requested_by: UserId) -> Self {
        Self {
            query: query.into(),
            title: title.into(),
            duration: None,
            requested_by,
            split_chapters: false,
            start_offset: None,
            added_at: Utc::now(),
        }
    }

    // Getters
    pub fn query(&self) -> &str {
        &self.query
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }
    pub fn requested_by(&self) -> UserId {
        self.requested_by
    }
    pub fn split_chapters(&self) -> bool {
        self.split_chapters
    }
    /// Offset inicial dentro del stream (capítulos).
    pub fn start_offset(&self) -> Option<Duration> {
        self.start_offset
    }
    pub fn added_at(&self) -> DateTime<Utc> {
        self.added_at
    }

    // Builders
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_chapter(mut self, start: Duration, length: Option<Duration>) -> Self {
        self.split_chapters = true;
        self.start_offset = Some(start);
        self.duration = length;
        self
    }

    pub fn with_split_chapters(mut self, split: bool) -> Self {
        self.split_chapters = split;
        self
    }

    pub fn is_url(&self) -> bool {
        self.query.starts_with("http://") || self.query.starts_with("https://")
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.duration {
            Some(duration) => write!(
                f,
                "{} ({})",
                self.title,
                humantime::format_duration(Duration::from_secs(duration.as_secs()))
            ),
            None => write!(f, "{}", self.title),
        }
    }
}
