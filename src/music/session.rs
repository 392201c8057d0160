//! Swappable metadata-service session.

use super::InnertubeClient;
use crate::retry::Recovery;
use arc_swap::ArcSwap;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

/// Process-wide handle to the current metadata-service client.
///
/// Re-authentication replaces the inner client atomically. Operations that
/// already loaded a snapshot keep using it; after any call reports an
/// authentication loss they must fetch a fresh one via [`Self::client`].
pub struct SessionHandle {
    current: ArcSwap<InnertubeClient>,
    http: reqwest::Client,
    auth_headers_file: Option<PathBuf>,
}

impl SessionHandle {
    /// Establish the initial session: authenticated when the headers file
    /// is present and passes the account probe, anonymous otherwise.
    pub async fn connect(http: reqwest::Client, auth_headers_file: Option<PathBuf>) -> Self {
        let client = establish(&http, auth_headers_file.as_deref()).await;
        Self {
            current: ArcSwap::from_pointee(client),
            http,
            auth_headers_file,
        }
    }

    /// Current client snapshot.
    pub fn client(&self) -> Arc<InnertubeClient> {
        self.current.load_full()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.load().is_authenticated()
    }

    /// Drop the current credentials and establish a replacement session.
    /// Falls back to an anonymous client when the credentials no longer
    /// verify, so some session always exists afterwards.
    pub async fn reauthenticate(&self) -> bool {
        let client = establish(&self.http, self.auth_headers_file.as_deref()).await;
        let authenticated = client.is_authenticated();
        self.current.store(Arc::new(client));
        tracing::info!(authenticated, "metadata service session replaced");
        true
    }
}

impl Recovery for SessionHandle {
    fn recover(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(self.reauthenticate())
    }
}

async fn establish(http: &reqwest::Client, auth_file: Option<&Path>) -> InnertubeClient {
    let Some(path) = auth_file else {
        tracing::info!("no auth headers file configured; metadata session is anonymous");
        return InnertubeClient::anonymous(http.clone());
    };
    if !path.exists() {
        tracing::warn!(path = %path.display(), "auth headers file not found; metadata session is anonymous");
        return InnertubeClient::anonymous(http.clone());
    }

    let headers = match load_headers(path) {
        Ok(headers) => headers,
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "auth headers file unreadable; metadata session is anonymous");
            return InnertubeClient::anonymous(http.clone());
        }
    };

    let client = InnertubeClient::with_headers(http.clone(), headers);
    match client.verify_credentials().await {
        Ok(()) => {
            tracing::info!("metadata service session authenticated");
            client
        }
        Err(error) => {
            tracing::warn!(%error, "credential check failed; falling back to anonymous session");
            InnertubeClient::anonymous(http.clone())
        }
    }
}

/// Read a JSON map of header name → value captured from a signed-in
/// browser session. Hop-by-hop headers and anything unparsable is skipped.
fn load_headers(path: &Path) -> anyhow::Result<HeaderMap> {
    let raw = std::fs::read_to_string(path)?;
    let parsed: std::collections::HashMap<String, String> = serde_json::from_str(&raw)?;

    let mut headers = HeaderMap::new();
    for (name, value) in parsed {
        let lowered = name.to_lowercase();
        if matches!(
            lowered.as_str(),
            "host" | "content-length" | "accept-encoding" | "connection"
        ) {
            continue;
        }
        let Ok(name) = HeaderName::from_bytes(lowered.as_bytes()) else {
            tracing::debug!(header = %lowered, "skipping invalid header name");
            continue;
        };
        let Ok(value) = HeaderValue::from_str(value.trim()) else {
            tracing::debug!(header = %lowered, "skipping invalid header value");
            continue;
        };
        headers.insert(name, value);
    }

    if !headers.contains_key(reqwest::header::COOKIE) {
        anyhow::bail!("auth headers file carries no cookie header");
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_headers_filters_hop_by_hop_and_requires_cookie() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("headers.json");

        std::fs::write(
            &path,
            r#"{"Cookie": "SID=abc", "Host": "music.youtube.com", "X-Goog-AuthUser": "0"}"#,
        )
        .expect("write headers");
        let headers = load_headers(&path).expect("headers should load");
        assert!(headers.contains_key("cookie"));
        assert!(headers.contains_key("x-goog-authuser"));
        assert!(!headers.contains_key("host"));

        std::fs::write(&path, r#"{"X-Goog-AuthUser": "0"}"#).expect("write headers");
        assert!(load_headers(&path).is_err(), "cookie-less files are rejected");
    }
}
