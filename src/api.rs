// clipkeeper - HTTP API Types
// Request and response bodies shared by the daemon and its clients

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{ClipItem, Snippet, SnippetFolder};

/// Name the daemon reports in its health response
pub const SERVICE_NAME: &str = "clipkeeperd";

/// Health check response from the daemon
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub pid: u32,
}

impl HealthResponse {
    /// Whether this response came from a clipkeeper daemon
    pub fn is_ours(&self) -> bool {
        self.service == SERVICE_NAME
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status.as_str(), "healthy" | "ok")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_app: Option<String>,
}

/// Create a snippet either from a history clip or from raw content
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct CreateSnippetRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub folder: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MoveSnippetRequest {
    pub to_folder: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CreateFolderRequest {
    pub folder_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RenameFolderRequest {
    pub new_name: String,
}

/// Snippet folders as written by `GET /export` and read by `POST /import`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SnippetExport {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub folders: Vec<SnippetFolder>,
}

impl SnippetExport {
    pub const VERSION: u32 = 1;

    pub fn new(folders: Vec<SnippetFolder>) -> Self {
        Self {
            version: Self::VERSION,
            exported_at: Utc::now(),
            folders,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SearchResponse {
    pub history: Vec<ClipItem>,
    pub snippets: Vec<Snippet>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatsResponse {
    pub history_count: usize,
    pub max_history_size: usize,
    pub folder_count: usize,
    pub snippet_count: usize,
    pub uptime_secs: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

impl SuccessResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// Error body for every non-2xx response
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorBody {
    pub error: String,
    pub detail: String,
}
