//! NetEase API response types
//!
//! Only the fields the association protocol reads are modelled; everything
//! else in the payloads is ignored.

use serde::Deserialize;
use std::fmt;

/// Numeric id the API sometimes sends as a string
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum IdValue {
    Number(i64),
    Text(String),
}

impl IdValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            IdValue::Number(n) => Some(*n),
            IdValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for IdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdValue::Number(n) => write!(f, "{}", n),
            IdValue::Text(s) => f.write_str(s),
        }
    }
}

/// Fields shared by every response body
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
}

impl Envelope {
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref().or(self.msg.as_deref())
    }
}

/// `api/v1/cloud/get` response
///
/// Entries stay raw so one malformed song does not fail the page.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudListResponse {
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
    #[serde(default)]
    pub has_more: bool,
}

/// One cloud-drive entry
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudEntry {
    pub private_cloud: PrivateCloud,
}

/// Server-side record of a cloud-drive song
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateCloud {
    pub song_id: i64,
    pub md5: String,
    pub song: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub bitrate: u32,
    pub file_name: String,
    #[serde(default)]
    pub file_size: u64,
}

/// `api/cloud/upload/check` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadCheckResponse {
    pub song_id: IdValue,
    pub need_upload: bool,
}

/// `api/nos/token/alloc` response
#[derive(Debug, Deserialize)]
pub struct TokenAllocResponse {
    pub result: TokenResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResult {
    pub resource_id: i64,
    #[serde(default)]
    pub object_key: Option<String>,
}

/// `api/upload/cloud/info/v2` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudInfoResponse {
    #[serde(default)]
    pub private_cloud: Option<CloudInfoPrivateCloud>,
    #[serde(default)]
    pub song_id: Option<IdValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudInfoPrivateCloud {
    pub song_id: i64,
}

impl CloudInfoResponse {
    /// Cloud song id, preferring the nested record
    pub fn cloud_song_id(&self) -> Option<i64> {
        self.private_cloud
            .as_ref()
            .map(|pc| pc.song_id)
            .or_else(|| self.song_id.as_ref().and_then(IdValue::as_i64))
    }
}
