//! Thin innertube HTTP client with tolerant response navigation.
//!
//! The service's responses are deeply nested renderer trees that get
//! rearranged between client versions, so parsing walks the JSON for the
//! renderer objects it needs instead of hard-coding full paths.

use super::{Collection, Entity, EntityKind, SearchHit, SearchKind, TrackRef};
use crate::error::MusicError;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{Value, json};

const ENDPOINT: &str = "https://music.youtube.com/youtubei/v1";
const ORIGIN: &str = "https://music.youtube.com";
const CLIENT_NAME: &str = "WEB_REMIX";
const CLIENT_VERSION: &str = "1.20250203.01.00";

/// Search filter param for the search endpoint, per result kind.
fn search_params(kind: SearchKind) -> &'static str {
    match kind {
        SearchKind::Songs => "EgWKAQIIAWoMEA4QChADEAQQCRAF",
        SearchKind::Videos => "EgWKAQIQAWoMEA4QChADEAQQCRAF",
        SearchKind::Albums => "EgWKAQIYAWoMEA4QChADEAQQCRAF",
        SearchKind::Artists => "EgWKAQIgAWoMEA4QChADEAQQCRAF",
        SearchKind::Playlists => "EgWKAQIoAWoMEA4QChADEAQQCRAF",
    }
}

/// HTTP client for the metadata service, either anonymous or carrying the
/// headers of an authenticated browser session.
pub struct InnertubeClient {
    http: reqwest::Client,
    headers: HeaderMap,
    authenticated: bool,
}

impl InnertubeClient {
    /// Client without credentials; account-gated endpoints will refuse it.
    pub fn anonymous(http: reqwest::Client) -> Self {
        Self {
            http,
            headers: base_headers(),
            authenticated: false,
        }
    }

    /// Client that replays captured session headers on every request.
    pub fn with_headers(http: reqwest::Client, session_headers: HeaderMap) -> Self {
        let mut headers = base_headers();
        headers.extend(session_headers);
        Self {
            http,
            headers,
            authenticated: true,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    fn context() -> Value {
        json!({
            "client": {
                "clientName": CLIENT_NAME,
                "clientVersion": CLIENT_VERSION,
                "hl": "en",
            }
        })
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, MusicError> {
        let url = format!("{ENDPOINT}/{path}?prettyPrint=false");
        let response = self
            .http
            .post(&url)
            .headers(self.headers.clone())
            .json(&body)
            .send()
            .await
            .map_err(|error| MusicError::Transient(error.to_string()))?;

        let status = response.status();
        match status {
            status if status.is_success() => response
                .json()
                .await
                .map_err(|error| MusicError::Parse(error.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(MusicError::Unauthorized {
                status: status.as_u16(),
            }),
            StatusCode::TOO_MANY_REQUESTS => Err(MusicError::RateLimited),
            StatusCode::NOT_FOUND => Err(MusicError::NotFound(path.to_string())),
            status if status.is_server_error() => {
                Err(MusicError::Transient(format!("HTTP {status}")))
            }
            status => Err(MusicError::Status {
                status: status.as_u16(),
            }),
        }
    }

    /// Probe an account-gated endpoint to confirm the session's
    /// credentials actually work.
    pub async fn verify_credentials(&self) -> Result<(), MusicError> {
        let body = json!({
            "context": Self::context(),
            "browseId": "FEmusic_history",
        });
        self.post("browse", body).await.map(|_| ())
    }

    /// Search the catalog, constrained to one result kind.
    pub async fn search(
        &self,
        query: &str,
        kind: SearchKind,
        limit: usize,
    ) -> Result<Vec<SearchHit>, MusicError> {
        let body = json!({
            "context": Self::context(),
            "query": query,
            "params": search_params(kind),
        });
        let response = self.post("search", body).await?;

        let mut hits = Vec::new();
        for item in find_all(&response, "musicResponsiveListItemRenderer") {
            if hits.len() >= limit {
                break;
            }
            if let Some(hit) = parse_search_hit(item, kind) {
                hits.push(hit);
            }
        }
        tracing::debug!(query, kind = kind.label(), count = hits.len(), "search completed");
        Ok(hits)
    }

    /// Resolve one entity by kind and id.
    pub async fn entity(&self, kind: EntityKind, id: &str) -> Result<Entity, MusicError> {
        match kind {
            EntityKind::Song => self.song(id).await.map(Entity::Song),
            EntityKind::Album => self.collection(id).await.map(Entity::Album),
            EntityKind::Playlist => {
                // Bare playlist ids need the VL browse prefix.
                let browse_id = if id.starts_with("PL") || id.starts_with("OLAK") || id.starts_with("RDAM") {
                    format!("VL{id}")
                } else {
                    id.to_string()
                };
                self.collection(&browse_id).await.map(Entity::Playlist)
            }
            EntityKind::Artist => self.artist(id).await,
        }
    }

    /// Track metadata via the player endpoint.
    pub async fn song(&self, video_id: &str) -> Result<TrackRef, MusicError> {
        let body = json!({
            "context": Self::context(),
            "videoId": video_id,
        });
        let response = self.post("player", body).await?;
        let details = response
            .get("videoDetails")
            .ok_or_else(|| MusicError::Parse("player response missing videoDetails".into()))?;

        let title = details
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or(video_id)
            .to_string();
        let artists = details
            .get("author")
            .and_then(Value::as_str)
            .map(strip_topic_suffix)
            .into_iter()
            .collect();
        let duration_secs = details
            .get("lengthSeconds")
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse().ok());

        Ok(TrackRef {
            video_id: video_id.to_string(),
            title,
            artists,
            album: None,
            duration_secs,
        })
    }

    /// Album or playlist with its track listing, via browse.
    pub async fn collection(&self, browse_id: &str) -> Result<Collection, MusicError> {
        let body = json!({
            "context": Self::context(),
            "browseId": browse_id,
        });
        let response = self.post("browse", body).await?;

        let (title, artists, year) = parse_collection_header(&response);
        let mut tracks = Vec::new();
        for item in find_all(&response, "musicResponsiveListItemRenderer") {
            if let Some(track) = parse_collection_track(item) {
                tracks.push(track);
            }
        }
        if tracks.is_empty() {
            return Err(MusicError::Parse(format!(
                "browse response for {browse_id} carried no tracks"
            )));
        }

        Ok(Collection {
            browse_id: browse_id.to_string(),
            title: title.unwrap_or_else(|| browse_id.to_string()),
            artists,
            year,
            tracks,
        })
    }

    async fn artist(&self, browse_id: &str) -> Result<Entity, MusicError> {
        let body = json!({
            "context": Self::context(),
            "browseId": browse_id,
        });
        let response = self.post("browse", body).await?;
        let name = find_all(&response, "musicImmersiveHeaderRenderer")
            .into_iter()
            .chain(find_all(&response, "musicVisualHeaderRenderer"))
            .find_map(|header| header.get("title").and_then(runs_text))
            .ok_or_else(|| MusicError::Parse("artist page carried no header".into()))?;
        let description = find_all(&response, "musicDescriptionShelfRenderer")
            .into_iter()
            .find_map(|shelf| shelf.get("description").and_then(runs_text));

        Ok(Entity::Artist {
            browse_id: browse_id.to_string(),
            name,
            description,
        })
    }
}

fn base_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(reqwest::header::ORIGIN, HeaderValue::from_static(ORIGIN));
    headers.insert(reqwest::header::REFERER, HeaderValue::from_static(ORIGIN));
    headers
}

fn strip_topic_suffix(author: &str) -> String {
    author.trim_end_matches(" - Topic").trim().to_string()
}

/// Collect every value stored under `key`, anywhere in the tree.
fn find_all<'a>(value: &'a Value, key: &str) -> Vec<&'a Value> {
    let mut found = Vec::new();
    collect(value, key, &mut found);
    found
}

fn collect<'a>(value: &'a Value, key: &str, found: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            for (name, child) in map {
                if name == key {
                    found.push(child);
                }
                collect(child, key, found);
            }
        }
        Value::Array(items) => {
            for child in items {
                collect(child, key, found);
            }
        }
        _ => {}
    }
}

/// Join a `{"runs": [{"text": …}]}` node into one string.
fn runs_text(value: &Value) -> Option<String> {
    let runs = value.get("runs")?.as_array()?;
    let text: String = runs
        .iter()
        .filter_map(|run| run.get("text").and_then(Value::as_str))
        .collect();
    if text.is_empty() { None } else { Some(text) }
}

/// Run texts of one flex column, separators dropped.
fn column_runs(item: &Value, index: usize) -> Vec<String> {
    item.get("flexColumns")
        .and_then(Value::as_array)
        .and_then(|columns| columns.get(index))
        .and_then(|column| column.get("musicResponsiveListItemFlexColumnRenderer"))
        .and_then(|renderer| renderer.get("text"))
        .and_then(|text| text.get("runs"))
        .and_then(Value::as_array)
        .map(|runs| {
            runs.iter()
                .filter_map(|run| run.get("text").and_then(Value::as_str))
                .filter(|text| *text != " • ")
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn looks_like_duration(text: &str) -> bool {
    let mut parts = text.split(':');
    match (parts.next(), parts.next()) {
        (Some(minutes), Some(_)) => minutes.chars().all(|c| c.is_ascii_digit()),
        _ => false,
    }
}

fn parse_duration_secs(text: &str) -> Option<u32> {
    let mut seconds = 0u32;
    for part in text.split(':') {
        seconds = seconds.checked_mul(60)?.checked_add(part.parse().ok()?)?;
    }
    Some(seconds)
}

fn parse_search_hit(item: &Value, kind: SearchKind) -> Option<SearchHit> {
    let id = match kind {
        SearchKind::Songs | SearchKind::Videos => find_all(item, "videoId")
            .into_iter()
            .find_map(Value::as_str)?
            .to_string(),
        SearchKind::Albums | SearchKind::Artists | SearchKind::Playlists => {
            find_all(item, "browseId")
                .into_iter()
                .find_map(Value::as_str)?
                .to_string()
        }
    };

    let title = column_runs(item, 0).into_iter().next()?;
    let details = column_runs(item, 1);

    let duration = details.iter().rev().find(|text| looks_like_duration(text)).cloned();
    let artists: Vec<String> = details
        .iter()
        .filter(|text| !looks_like_duration(text))
        .take(3)
        .cloned()
        .collect();

    // Album name rides in the column run that links to an album page.
    let album = find_all(item, "browseId")
        .into_iter()
        .filter_map(Value::as_str)
        .find(|browse_id| browse_id.starts_with("MPRE"))
        .and_then(|_| details.last().filter(|text| !looks_like_duration(text)).cloned());

    Some(SearchHit {
        kind,
        id,
        title,
        artists,
        album,
        duration,
    })
}

fn parse_collection_track(item: &Value) -> Option<TrackRef> {
    let video_id = find_all(item, "videoId")
        .into_iter()
        .find_map(Value::as_str)?
        .to_string();
    let title = column_runs(item, 0).into_iter().next()?;
    let details = column_runs(item, 1);

    let duration_secs = item
        .get("fixedColumns")
        .and_then(Value::as_array)
        .and_then(|columns| columns.first())
        .and_then(|column| column.get("musicResponsiveListItemFixedColumnRenderer"))
        .and_then(|renderer| renderer.get("text"))
        .and_then(runs_text)
        .as_deref()
        .and_then(parse_duration_secs);

    let artists = details
        .into_iter()
        .filter(|text| !looks_like_duration(text))
        .take(3)
        .collect();

    Some(TrackRef {
        video_id,
        title,
        artists,
        album: None,
        duration_secs,
    })
}

fn parse_collection_header(response: &Value) -> (Option<String>, Vec<String>, Option<String>) {
    let header = find_all(response, "musicDetailHeaderRenderer")
        .into_iter()
        .chain(find_all(response, "musicResponsiveHeaderRenderer"))
        .next();
    let Some(header) = header else {
        return (None, Vec::new(), None);
    };

    let title = header.get("title").and_then(runs_text);
    let subtitle_runs: Vec<String> = header
        .get("subtitle")
        .or_else(|| header.get("straplineTextOne"))
        .and_then(|subtitle| subtitle.get("runs"))
        .and_then(Value::as_array)
        .map(|runs| {
            runs.iter()
                .filter_map(|run| run.get("text").and_then(Value::as_str))
                .filter(|text| *text != " • ")
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let year = subtitle_runs
        .iter()
        .find(|text| text.len() == 4 && text.chars().all(|c| c.is_ascii_digit()))
        .cloned();
    let artists = subtitle_runs
        .into_iter()
        .filter(|text| {
            !(text.len() == 4 && text.chars().all(|c| c.is_ascii_digit()))
                && !text.eq_ignore_ascii_case("album")
                && !text.eq_ignore_ascii_case("playlist")
                && !text.eq_ignore_ascii_case("single")
                && !text.eq_ignore_ascii_case("ep")
        })
        .take(3)
        .collect();

    (title, artists, year)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_item(video_id: &str, title: &str, artist: &str, duration: &str) -> Value {
        json!({
            "playlistItemData": { "videoId": video_id },
            "flexColumns": [
                {
                    "musicResponsiveListItemFlexColumnRenderer": {
                        "text": { "runs": [ { "text": title } ] }
                    }
                },
                {
                    "musicResponsiveListItemFlexColumnRenderer": {
                        "text": { "runs": [
                            { "text": artist },
                            { "text": " • " },
                            { "text": duration }
                        ] }
                    }
                }
            ]
        })
    }

    #[test]
    fn parses_a_song_hit_from_renderer_soup() {
        let item = search_item("dQw4w9WgXcQ", "Never Gonna Give You Up", "Rick Astley", "3:33");
        let hit = parse_search_hit(&item, SearchKind::Songs).expect("hit should parse");
        assert_eq!(hit.id, "dQw4w9WgXcQ");
        assert_eq!(hit.title, "Never Gonna Give You Up");
        assert_eq!(hit.artists, vec!["Rick Astley"]);
        assert_eq!(hit.duration.as_deref(), Some("3:33"));
        assert_eq!(hit.url(), "https://music.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[test]
    fn find_all_reaches_nested_keys() {
        let tree = json!({
            "a": { "b": [ { "videoId": "one" }, { "c": { "videoId": "two" } } ] }
        });
        let ids: Vec<&str> = find_all(&tree, "videoId")
            .into_iter()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(ids, vec!["one", "two"]);
    }

    #[test]
    fn duration_parsing_handles_hours() {
        assert_eq!(parse_duration_secs("3:33"), Some(213));
        assert_eq!(parse_duration_secs("1:02:03"), Some(3723));
        assert_eq!(parse_duration_secs("nope"), None);
    }

    #[test]
    fn collection_track_requires_a_video_id() {
        let item = json!({
            "flexColumns": [
                {
                    "musicResponsiveListItemFlexColumnRenderer": {
                        "text": { "runs": [ { "text": "Unplayable" } ] }
                    }
                }
            ]
        });
        assert!(parse_collection_track(&item).is_none());
    }

    #[test]
    fn topic_suffix_is_stripped_from_authors() {
        assert_eq!(strip_topic_suffix("Rick Astley - Topic"), "Rick Astley");
        assert_eq!(strip_topic_suffix("Rick Astley"), "Rick Astley");
    }
}
