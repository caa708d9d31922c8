// clipkeeper - Data Model
// Clips, snippets, and the folders that hold them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of characters in a display preview
pub const DISPLAY_LENGTH: usize = 50;

/// Content classification assigned at capture time
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Text,
    Url,
    Json,
    Code,
}

const URL_PREFIXES: [&str; 3] = ["http://", "https://", "ftp://"];
const CODE_MARKERS: [&str; 8] = [
    "def ", "function ", "class ", "fn ", "=>", "import ", "#include", "const ",
];

impl ContentType {
    /// Classify text content
    pub fn detect(content: &str) -> Self {
        let trimmed = content.trim();
        if URL_PREFIXES.iter().any(|p| trimmed.starts_with(p)) && !trimmed.contains(char::is_whitespace) {
            return ContentType::Url;
        }
        if (trimmed.starts_with('{') || trimmed.starts_with('['))
            && serde_json::from_str::<serde_json::Value>(trimmed).is_ok()
        {
            return ContentType::Json;
        }
        let looks_like_block = trimmed.contains('{') && trimmed.contains('}') && trimmed.contains(';');
        if looks_like_block
            || trimmed
                .lines()
                .any(|line| CODE_MARKERS.iter().any(|m| line.trim_start().starts_with(m)))
        {
            return ContentType::Code;
        }
        ContentType::Text
    }
}

/// Single-line, length-truncated preview of some content
pub fn display_string(content: &str, max_length: usize) -> String {
    let collapsed = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return "(empty)".to_string();
    }
    if collapsed.chars().count() <= max_length {
        return collapsed;
    }
    let keep = max_length.saturating_sub(3);
    let mut preview: String = collapsed.chars().take(keep).collect();
    preview.push_str("...");
    preview
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// A captured piece of clipboard content
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClipItem {
    pub id: String,
    pub content: String,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub source_app: Option<String>,
    #[serde(default)]
    pub display: String,
}

impl ClipItem {
    pub fn new(content: impl Into<String>, source_app: Option<String>) -> Self {
        let content = content.into();
        Self {
            id: new_id(),
            content_type: ContentType::detect(&content),
            display: display_string(&content, DISPLAY_LENGTH),
            captured_at: Utc::now(),
            source_app,
            content,
        }
    }
}

/// A named, folder-organized entry, independent of history once created
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub id: String,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub display: String,
}

impl Snippet {
    pub fn new(content: impl Into<String>, name: impl Into<String>, tags: Vec<String>) -> Self {
        let content = content.into();
        let now = Utc::now();
        Self {
            id: new_id(),
            name: name.into(),
            content_type: ContentType::detect(&content),
            display: display_string(&content, DISPLAY_LENGTH),
            tags,
            created_at: now,
            modified_at: now,
            content,
        }
    }

    /// Replace the content and refresh everything derived from it
    pub fn set_content(&mut self, content: String) {
        self.content_type = ContentType::detect(&content);
        self.display = display_string(&content, DISPLAY_LENGTH);
        self.content = content;
    }
}

/// User-defined snippet folder
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnippetFolder {
    pub name: String,
    #[serde(default)]
    pub snippets: Vec<Snippet>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl SnippetFolder {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            snippets: Vec::new(),
            created_at: now,
            modified_at: now,
        }
    }
}

/// Read-time projection of older history into fixed-size ranges
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryFolder {
    /// 1-based inclusive position range, e.g. "11-20"
    pub name: String,
    /// 0-based index of the first item
    pub start_index: usize,
    /// 0-based index one past the last item
    pub end_index: usize,
    pub items: Vec<ClipItem>,
}
