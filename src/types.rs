use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Column a directory listing can be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Name,
    Size,
    Modified,
}

impl SortKey {
    /// Parses the short query form (`n`, `s`, `m`). Unknown values leave the listing unsorted.
    pub fn from_param(value: &str) -> Option<Self> {
        match value {
            "n" => Some(SortKey::Name),
            "s" => Some(SortKey::Size),
            "m" => Some(SortKey::Modified),
            _ => None,
        }
    }
}

// Query string of the browse endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrowseQuery {
    #[serde(default, deserialize_with = "flag")]
    pub zip: bool,
    #[serde(default, deserialize_with = "flag")]
    pub rec: bool,
    pub s: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    pub r: bool,
    pub p: Option<i64>,
    #[serde(default, deserialize_with = "flag")]
    pub t: bool,
}

/// Accepts `1`, `true`, `t`, `yes`, `on` and a bare key (`?zip`) as true.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(matches!(raw.trim().to_ascii_lowercase().as_str(), "" | "1" | "true" | "t" | "yes" | "on"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub is_dir: bool,
    pub is_link: bool,
    pub modified: Option<DateTime<Utc>>,
    /// Non-hidden children of a directory entry.
    pub num_entries: usize,
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingResponse {
    pub path: String,
    pub components: Vec<Component>,
    pub entries: Vec<FileEntry>,
    pub image_files: Vec<FileEntry>,
    pub readme: Option<String>,
    pub plain_readme: bool,
    pub sort: Option<SortKey>,
    pub reverse: bool,
    pub gallery: bool,
    pub gallery_page: usize,
    pub next_page: usize,
    pub prev_page: usize,
    pub gallery_pages: usize,
}
