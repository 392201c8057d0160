//! Metadata/search service client (YouTube Music innertube API).

pub mod innertube;
pub mod session;

pub use self::innertube::InnertubeClient;
pub use self::session::SessionHandle;

use crate::error::MusicError;
use crate::retry::{Classify, ErrorClass};
use std::sync::OnceLock;

/// What a search should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Songs,
    Videos,
    Albums,
    Artists,
    Playlists,
}

impl SearchKind {
    pub fn label(self) -> &'static str {
        match self {
            SearchKind::Songs => "songs",
            SearchKind::Videos => "videos",
            SearchKind::Albums => "albums",
            SearchKind::Artists => "artists",
            SearchKind::Playlists => "playlists",
        }
    }
}

/// One search result descriptor.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub kind: SearchKind,
    /// Video id for songs/videos, browse id otherwise.
    pub id: String,
    pub title: String,
    pub artists: Vec<String>,
    pub album: Option<String>,
    /// Display duration as the service renders it, e.g. `3:45`.
    pub duration: Option<String>,
}

impl SearchHit {
    pub fn artist_line(&self) -> String {
        if self.artists.is_empty() {
            "Unknown".to_string()
        } else {
            self.artists.join(", ")
        }
    }

    pub fn url(&self) -> String {
        match self.kind {
            SearchKind::Songs | SearchKind::Videos => {
                format!("https://music.youtube.com/watch?v={}", self.id)
            }
            SearchKind::Playlists => {
                format!("https://music.youtube.com/playlist?list={}", self.id)
            }
            SearchKind::Albums | SearchKind::Artists => {
                format!("https://music.youtube.com/browse/{}", self.id)
            }
        }
    }
}

/// Entity kinds addressable by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Song,
    Album,
    Playlist,
    Artist,
}

impl EntityKind {
    pub fn label(self) -> &'static str {
        match self {
            EntityKind::Song => "song",
            EntityKind::Album => "album",
            EntityKind::Playlist => "playlist",
            EntityKind::Artist => "artist",
        }
    }
}

/// A fully resolved entity descriptor.
#[derive(Debug, Clone)]
pub enum Entity {
    Song(TrackRef),
    Album(Collection),
    Playlist(Collection),
    Artist {
        browse_id: String,
        name: String,
        description: Option<String>,
    },
}

/// One downloadable track reference.
#[derive(Debug, Clone)]
pub struct TrackRef {
    pub video_id: String,
    pub title: String,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub duration_secs: Option<u32>,
}

impl TrackRef {
    pub fn url(&self) -> String {
        format!("https://music.youtube.com/watch?v={}", self.video_id)
    }

    pub fn artist_line(&self) -> String {
        if self.artists.is_empty() {
            "Unknown".to_string()
        } else {
            self.artists.join(", ")
        }
    }
}

/// An album or playlist with its track listing.
#[derive(Debug, Clone)]
pub struct Collection {
    pub browse_id: String,
    pub title: String,
    pub artists: Vec<String>,
    pub year: Option<String>,
    pub tracks: Vec<TrackRef>,
}

impl Classify for MusicError {
    fn classify(&self) -> ErrorClass {
        match self {
            MusicError::Unauthorized { .. } => ErrorClass::AuthLost,
            MusicError::Transient(_) => ErrorClass::Transient,
            MusicError::RateLimited => ErrorClass::RateLimited(None),
            MusicError::NotFound(_) | MusicError::Parse(_) | MusicError::Status { .. } => {
                ErrorClass::Fatal
            }
        }
    }
}

fn video_id_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("static pattern"))
}

fn link_patterns() -> &'static [regex::Regex; 3] {
    static PATTERNS: OnceLock<[regex::Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            regex::Regex::new(r"[?&]v=([A-Za-z0-9_-]{11})").expect("static pattern"),
            regex::Regex::new(r"[?&]list=([A-Za-z0-9_-]+)").expect("static pattern"),
            regex::Regex::new(r"(?:browse|channel)/([A-Za-z0-9_-]+)").expect("static pattern"),
        ]
    })
}

/// Extract a video/browse/playlist id from a pasted link or a bare id.
pub fn extract_entity_id(link_or_id: &str) -> Option<String> {
    let trimmed = link_or_id.trim();
    if trimmed.is_empty() {
        return None;
    }
    if !trimmed.contains('/') && !trimmed.contains('?') {
        return Some(trimmed.to_string());
    }
    for pattern in link_patterns() {
        if let Some(captures) = pattern.captures(trimmed) {
            return Some(captures[1].to_string());
        }
    }
    None
}

/// Classify a raw id by its well-known prefix shape.
pub fn classify_entity_id(id: &str) -> EntityKind {
    if id.starts_with("MPRE") {
        EntityKind::Album
    } else if id.starts_with("UC") || id.starts_with("MPLA") {
        EntityKind::Artist
    } else if id.starts_with("PL")
        || id.starts_with("VL")
        || id.starts_with("OLAK")
        || id.starts_with("RDAM")
    {
        EntityKind::Playlist
    } else if video_id_pattern().is_match(id) {
        EntityKind::Song
    } else {
        // Unrecognized shapes go through browse, which answers for most ids.
        EntityKind::Playlist
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_ids_from_links_and_bare_ids() {
        assert_eq!(
            extract_entity_id("https://music.youtube.com/watch?v=dQw4w9WgXcQ&feature=share"),
            Some("dQw4w9WgXcQ".to_string())
        );
        assert_eq!(
            extract_entity_id("https://music.youtube.com/playlist?list=OLAK5uy_abc123"),
            Some("OLAK5uy_abc123".to_string())
        );
        assert_eq!(
            extract_entity_id("https://music.youtube.com/browse/MPREb_abcd1234"),
            Some("MPREb_abcd1234".to_string())
        );
        assert_eq!(
            extract_entity_id("dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
        assert_eq!(extract_entity_id("https://example.com/nothing"), None);
        assert_eq!(extract_entity_id("   "), None);
    }

    #[test]
    fn classifies_well_known_id_shapes() {
        assert_eq!(classify_entity_id("MPREb_abcd1234"), EntityKind::Album);
        assert_eq!(classify_entity_id("UC-abcdefghij"), EntityKind::Artist);
        assert_eq!(classify_entity_id("OLAK5uy_xyz"), EntityKind::Playlist);
        assert_eq!(classify_entity_id("PLabc"), EntityKind::Playlist);
        assert_eq!(classify_entity_id("dQw4w9WgXcQ"), EntityKind::Song);
    }
}
