//! NetEase Cloud Music API connector
//!
//! Implements the `CloudMusicService` trait for the NetEase web API.

use async_trait::async_trait;
use bridge_traits::cloud::{
    AccountSession, Association, CloudMusicService, CloudSong, PlacementToken, UploadCheck,
};
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::{describe_code, NeteaseError, CODE_NEEDS_LOGIN};
use crate::types::{
    CloudEntry, CloudInfoResponse, CloudListResponse, Envelope, TokenAllocResponse,
    UploadCheckResponse,
};

const CLOUD_LIST_URL: &str = "https://music.163.com/api/v1/cloud/get";
const UPLOAD_CHECK_URL: &str = "https://interface.music.163.com/api/cloud/upload/check";
const TOKEN_ALLOC_URL: &str = "https://music.163.com/api/nos/token/alloc";
const CLOUD_INFO_URL: &str = "https://music.163.com/api/upload/cloud/info/v2";
const PUBLISH_URL: &str = "https://interface.music.163.com/api/cloud/pub/v2";

/// Songs per listing page
const PAGE_SIZE: usize = 100;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";
const ACCEPT: &str = "application/json, text/plain, */*";
const ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7";

/// NetEase Cloud Music API connector
///
/// Every request is a form-encoded `POST` carrying the session cookie. The
/// connector never retries; callers wrap calls in their own retry policy.
///
/// # Example
///
/// ```ignore
/// use provider_netease::NeteaseCloudConnector;
/// use bridge_traits::CloudMusicService;
///
/// let connector = NeteaseCloudConnector::new(http_client, 2.0, Duration::from_secs(30));
/// let songs = connector.list_cloud_songs(&session).await?;
/// ```
pub struct NeteaseCloudConnector {
    http_client: Arc<dyn HttpClient>,
    rate_limiter: DefaultDirectRateLimiter,
    timeout: Duration,
}

impl NeteaseCloudConnector {
    /// Create a connector
    ///
    /// # Arguments
    ///
    /// * `http_client` - HTTP client implementation
    /// * `requests_per_second` - upper bound on request rate across all calls
    /// * `timeout` - per-request timeout
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        requests_per_second: f64,
        timeout: Duration,
    ) -> Self {
        Self {
            http_client,
            rate_limiter: RateLimiter::direct(quota_for(requests_per_second)),
            timeout,
        }
    }

    /// Fetch one listing page
    ///
    /// Returns the parsed songs with the number of raw entries the server
    /// sent, which still counts entries that failed to parse.
    async fn list_page(
        &self,
        session: &AccountSession,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<CloudSong>, usize)> {
        debug!(limit, offset, "Fetching cloud drive page");

        let page: CloudListResponse = self
            .post(
                session,
                CLOUD_LIST_URL,
                &[("limit", limit.to_string()), ("offset", offset.to_string())],
            )
            .await?;

        let received = page.data.len();
        let songs: Vec<CloudSong> = page
            .data
            .into_iter()
            .filter_map(|entry| match serde_json::from_value::<CloudEntry>(entry) {
                Ok(entry) => Some(convert_entry(entry)),
                Err(e) => {
                    warn!(error = %e, "Skipping unparseable cloud drive entry");
                    None
                }
            })
            .collect();

        debug!(
            count = songs.len(),
            received,
            offset,
            has_more = page.has_more,
            "Fetched page"
        );
        Ok((songs, received))
    }

    /// Send a rate-limited form `POST` and decode the body
    #[instrument(skip(self, session, params), fields(account = session.label()))]
    async fn post<T: DeserializeOwned>(
        &self,
        session: &AccountSession,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        self.rate_limiter.until_ready().await;

        let request = HttpRequest::new(HttpMethod::Post, url)
            .cookie(session.cookie())
            .header("User-Agent", USER_AGENT)
            .header("Accept", ACCEPT)
            .header("Accept-Language", ACCEPT_LANGUAGE)
            .form_encoded(encode_form(params))
            .timeout(self.timeout);

        let response = self
            .http_client
            .execute_with_retry(request, RetryPolicy::none())
            .await?;

        let body = check_response(&response)?;
        serde_json::from_value(body).map_err(|e| {
            NeteaseError::ParseError(format!("Unexpected response shape from {}: {}", url, e))
                .into()
        })
    }
}

#[async_trait]
impl CloudMusicService for NeteaseCloudConnector {
    #[instrument(skip(self, session), fields(account = session.label()))]
    async fn list_cloud_songs(&self, session: &AccountSession) -> Result<Vec<CloudSong>> {
        let mut all_songs = Vec::new();
        let mut offset = 0;

        loop {
            let (batch, received) = self.list_page(session, PAGE_SIZE, offset).await?;
            if received == 0 {
                break;
            }

            let short_page = received < PAGE_SIZE;
            all_songs.extend(batch);
            offset += PAGE_SIZE;

            if short_page {
                break;
            }
        }

        info!(count = all_songs.len(), "Listed cloud drive");
        Ok(all_songs)
    }

    #[instrument(skip(self, session, song), fields(content_hash = %song.content_hash))]
    async fn check_needs_upload(
        &self,
        session: &AccountSession,
        song: &CloudSong,
    ) -> Result<UploadCheck> {
        let response: UploadCheckResponse = self
            .post(
                session,
                UPLOAD_CHECK_URL,
                &[
                    ("bitrate", song.bitrate.to_string()),
                    ("ext", String::new()),
                    ("songId", "0".to_string()),
                    ("version", "1".to_string()),
                    ("md5", song.content_hash.clone()),
                    ("length", song.size.to_string()),
                ],
            )
            .await?;

        debug!(
            needs_upload = response.need_upload,
            server_song_id = %response.song_id,
            "Checked upload"
        );

        Ok(UploadCheck {
            needs_upload: response.need_upload,
            server_song_id: response.song_id.to_string(),
        })
    }

    #[instrument(skip(self, session, song, check), fields(content_hash = %song.content_hash))]
    async fn allocate_token(
        &self,
        session: &AccountSession,
        song: &CloudSong,
        check: &UploadCheck,
    ) -> Result<PlacementToken> {
        let response: TokenAllocResponse = self
            .post(
                session,
                TOKEN_ALLOC_URL,
                &[
                    ("bucket", String::new()),
                    ("local", "false".to_string()),
                    ("nos_product", "3".to_string()),
                    ("type", "audio".to_string()),
                    ("ext", song.extension().to_uppercase()),
                    ("md5", song.content_hash.clone()),
                    ("filename", song.file_name.clone()),
                ],
            )
            .await?;

        Ok(PlacementToken {
            content_hash: song.content_hash.clone(),
            resource_id: response.result.resource_id,
            server_song_id: check.server_song_id.clone(),
        })
    }

    #[instrument(skip(self, session, token, song), fields(content_hash = %song.content_hash))]
    async fn associate_metadata(
        &self,
        session: &AccountSession,
        token: &PlacementToken,
        song: &CloudSong,
    ) -> Result<Association> {
        let response: CloudInfoResponse = self
            .post(
                session,
                CLOUD_INFO_URL,
                &[
                    ("bitrate", song.bitrate.to_string()),
                    ("md5", song.content_hash.clone()),
                    ("songid", token.server_song_id.clone()),
                    ("filename", song.file_name.clone()),
                    ("song", song.title.clone()),
                    ("album", song.album.clone()),
                    ("artist", song.artist.clone()),
                    ("resourceId", token.resource_id.to_string()),
                ],
            )
            .await?;

        let cloud_song_id = response.cloud_song_id().ok_or_else(|| {
            BridgeError::from(NeteaseError::ParseError(
                "cloud info response carries no song id".to_string(),
            ))
        })?;

        Ok(Association {
            content_hash: song.content_hash.clone(),
            cloud_song_id,
        })
    }

    #[instrument(skip(self, session, association), fields(cloud_song_id = association.cloud_song_id))]
    async fn publish(&self, session: &AccountSession, association: &Association) -> Result<()> {
        let _: Envelope = self
            .post(
                session,
                PUBLISH_URL,
                &[("songid", association.cloud_song_id.to_string())],
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self, session), fields(account = session.label()))]
    async fn validate_session(&self, session: &AccountSession) -> Result<bool> {
        match self.list_page(session, 1, 0).await {
            Ok(_) => Ok(true),
            Err(BridgeError::Unauthorized(reason)) => {
                warn!(%reason, "Cookie rejected");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

/// Quota allowing `requests_per_second`, falling back to one per second for
/// non-positive or non-finite rates
fn quota_for(requests_per_second: f64) -> Quota {
    if requests_per_second.is_finite() && requests_per_second > 0.0 {
        if let Some(quota) = Quota::with_period(Duration::from_secs_f64(1.0 / requests_per_second))
        {
            return quota;
        }
    }
    Quota::per_second(NonZeroU32::MIN)
}

fn encode_form(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Classify a response, returning the decoded body for service code 200
fn check_response(response: &HttpResponse) -> Result<serde_json::Value> {
    let status = response.status;

    if status == 401 || status == 403 {
        return Err(NeteaseError::SessionExpired(format!(
            "HTTP {}: {}",
            status,
            describe_code(i64::from(status)).unwrap_or("rejected")
        ))
        .into());
    }

    if !response.is_success() {
        let message = describe_code(i64::from(status))
            .map(str::to_string)
            .or_else(|| response.text().ok())
            .unwrap_or_default();
        return Err(NeteaseError::Http { status, message }.into());
    }

    let body: serde_json::Value = response.json()?;
    let envelope: Envelope = serde_json::from_value(body.clone())
        .map_err(|e| NeteaseError::ParseError(format!("Body has no code: {}", e)))?;

    match envelope.code {
        200 => Ok(body),
        CODE_NEEDS_LOGIN => Err(NeteaseError::SessionExpired(format!(
            "code {}: {}",
            CODE_NEEDS_LOGIN,
            envelope.message().unwrap_or("login required")
        ))
        .into()),
        code => {
            let message = envelope
                .message()
                .or_else(|| describe_code(code))
                .unwrap_or("unknown error")
                .to_string();
            Err(NeteaseError::Service { code, message }.into())
        }
    }
}

fn convert_entry(entry: CloudEntry) -> CloudSong {
    let pc = entry.private_cloud;
    CloudSong {
        content_hash: pc.md5,
        title: pc.song,
        artist: pc.artist,
        album: pc.album,
        file_name: pc.file_name,
        size: pc.file_size,
        bitrate: pc.bitrate,
        server_song_id: Some(pc.song_id),
        needs_upload: None,
    }
}
