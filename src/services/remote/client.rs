use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use color_eyre::eyre::{Result, WrapErr};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::ports::remote::{RemoteListing, RemotePlaylists};
use crate::track::TrackId;

/* ---------- Wire types ---------- */

const FOLDER_KIND: &str = "folder";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemotePlaylist {
    pub name: String,
    #[serde(default)]
    pub tracks: Vec<TrackId>,
    /// Absent for user playlists, `"folder"` for folders. Any other value marks a
    /// playlist the service maintains itself.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Names of the playlists inside a folder.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub playlists: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ReplaceTracks<'a> {
    tracks: &'a [TrackId],
}

#[derive(Debug, Serialize)]
struct CreatePlaylist<'a> {
    name: &'a str,
    tracks: &'a [TrackId],
}

/* ---------- Adapter ---------- */

/// JSON/HTTP implementation of [`RemotePlaylists`].
///
/// Transient failures (connection errors, timeouts, 429 and 5xx responses) are
/// retried with exponential backoff before the call is reported as failed.
pub struct RemoteHttpAdapter {
    client: Client,
    base_url: Url,
    token: Option<String>,
    retries: usize,
}

impl RemoteHttpAdapter {
    pub fn new(base_url: Url, token: Option<String>, retries: usize) -> Self {
        Self {
            client: Client::new(),
            base_url: with_trailing_slash(base_url),
            token,
            retries,
        }
    }

    fn playlists_url(&self) -> Result<Url> {
        self.base_url
            .join("playlists")
            .wrap_err("Failed to build playlists URL")
    }

    fn playlist_url(&self, name: &str) -> Result<Url> {
        self.base_url
            .join(&format!("playlists/{}", urlencoding::encode(name)))
            .wrap_err(format!("Failed to build URL for playlist '{}'", name))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("Accept", "application/json");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, build: impl Fn() -> RequestBuilder) -> reqwest::Result<Response> {
        let build = &build;
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(250))
            .with_max_times(self.retries);

        (|| async move { build().send().await?.error_for_status() })
            .retry(backoff)
            .when(is_transient)
            .notify(|e, after| {
                log::warn!("Remote request failed, retrying in {:?}: {}", after, e);
            })
            .await
    }
}

#[async_trait::async_trait]
impl RemotePlaylists for RemoteHttpAdapter {
    async fn list(&self) -> Result<RemoteListing> {
        let url = self.playlists_url()?;
        let playlists = self
            .send(|| self.authorized(self.client.get(url.clone())))
            .await
            .wrap_err("Failed to list remote playlists")?
            .json::<Vec<RemotePlaylist>>()
            .await
            .wrap_err("Failed to deserialize remote playlists response")?;

        log::debug!("Fetched {} remote playlist(s)", playlists.len());
        Ok(into_listing(playlists))
    }

    async fn fetch(&self, name: &str) -> Result<Option<Vec<TrackId>>> {
        let url = self.playlist_url(name)?;
        let response = match self
            .send(|| self.authorized(self.client.get(url.clone())))
            .await
        {
            Ok(response) => response,
            Err(e) if e.status() == Some(StatusCode::NOT_FOUND) => return Ok(None),
            Err(e) => {
                return Err(e).wrap_err(format!("Failed to fetch remote playlist '{}'", name));
            }
        };
        let playlist = response
            .json::<RemotePlaylist>()
            .await
            .wrap_err(format!("Failed to deserialize remote playlist '{}'", name))?;
        Ok(Some(playlist.tracks))
    }

    async fn create(&self, name: &str, tracks: &[TrackId]) -> Result<()> {
        let url = self.playlists_url()?;
        let body = CreatePlaylist { name, tracks };
        self.send(|| self.authorized(self.client.post(url.clone())).json(&body))
            .await
            .wrap_err(format!("Failed to create remote playlist '{}'", name))?;
        Ok(())
    }

    async fn replace(&self, name: &str, tracks: &[TrackId]) -> Result<()> {
        let url = self.playlist_url(name)?;
        let body = ReplaceTracks { tracks };
        self.send(|| self.authorized(self.client.put(url.clone())).json(&body))
            .await
            .wrap_err(format!("Failed to update remote playlist '{}'", name))?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let url = self.playlist_url(name)?;
        self.send(|| self.authorized(self.client.delete(url.clone())))
            .await
            .wrap_err(format!("Failed to delete remote playlist '{}'", name))?;
        Ok(())
    }
}

fn is_transient(error: &reqwest::Error) -> bool {
    if error.is_timeout() || error.is_connect() {
        return true;
    }
    error.status().is_some_and(|status| {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    })
}

// Url::join drops the last path segment unless the base ends with a slash.
fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn into_listing(playlists: Vec<RemotePlaylist>) -> RemoteListing {
    let mut listing = RemoteListing::default();
    for playlist in playlists {
        match playlist.kind.as_deref() {
            None => {
                if !listing.playlists.insert(playlist.name.clone()) {
                    log::warn!(
                        "Remote has more than one playlist named '{}'; using the first",
                        playlist.name
                    );
                }
            }
            Some(FOLDER_KIND) => {
                log::debug!(
                    "Remote folder '{}' holds {} playlist(s)",
                    playlist.name,
                    playlist.playlists.len()
                );
                listing
                    .folders
                    .entry(playlist.name)
                    .or_default()
                    .extend(playlist.playlists);
            }
            Some(kind) => {
                log::debug!("Skipping system playlist '{}' ({})", playlist.name, kind);
            }
        }
    }
    listing
}
