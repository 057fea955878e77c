use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "download_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum DownloadStatus {
    Pending,
    Success,
    Failed,
    Paused,
}

impl DownloadStatus {
    /// Statuses that only make sense while a live task backs the item.
    pub const UNFINISHED: [DownloadStatus; 2] = [Self::Pending, Self::Paused];
}

/// Live transfer progress, only present while a task is tracked.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadState {
    pub total_length: u64,
    pub completed_length: u64,
    pub download_speed: u64,
}

impl From<&aria2::Status> for DownloadState {
    fn from(status: &aria2::Status) -> Self {
        Self {
            total_length: status.total_length,
            completed_length: status.completed_length,
            download_speed: status.download_speed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadItem {
    pub id: Uuid,
    pub title: String,
    pub url: String,
    pub hash: String,
    pub status: DownloadStatus,
    pub error: Option<String>,
    pub entry: Option<String>,
    pub source_id: Option<i64>,
    pub rule_id: Option<i64>,
    pub log_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<DownloadState>,
}

/// Fields of a download item supplied by the caller. `hash`, `url` and
/// `status` are always filled in at submission.
#[derive(Debug, Clone, Default)]
pub struct NewDownloadItem {
    /// Reuse an existing row instead of inserting a new one.
    pub id: Option<Uuid>,
    pub title: String,
    pub entry: Option<String>,
    pub source_id: Option<i64>,
    pub rule_id: Option<i64>,
    pub log_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct DownloadQuery {
    pub status: Option<DownloadStatus>,
    pub source_id: Option<i64>,
    pub rule_id: Option<i64>,
    pub page: u32,
    pub size: u32,
}

impl DownloadQuery {
    pub fn limit(&self) -> i64 {
        i64::from(if self.size == 0 { 25 } else { self.size })
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page) * self.limit()
    }
}

/// A parsed feed entry as handed over by the feed crawler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    pub enclosure: Enclosure,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enclosure {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<Value>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FeedEntry {
    pub fn new<T: Into<String>, U: Into<String>>(title: T, url: U) -> Self {
        Self {
            title: title.into(),
            link: None,
            published: None,
            enclosure: Enclosure {
                url: url.into(),
                length: None,
                mime_type: None,
                extra: Map::new(),
            },
            extra: Map::new(),
        }
    }

    /// The serialized form stored alongside download items and error logs.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parses the publish date in the formats feeds commonly use.
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.published.as_deref()?.trim();
        DateTime::parse_from_rfc2822(raw)
            .or_else(|_| DateTime::parse_from_rfc3339(raw))
            .map(|date| date.with_timezone(&Utc))
            .ok()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "file_source", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum FileSource {
    Download,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: Uuid,
    pub name: String,
    pub filename: String,
    pub path: String,
    pub size: i64,
    pub md5: String,
    pub mimetype: Option<String>,
    pub source: FileSource,
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn directory(&self) -> Option<&Path> {
        Path::new(&self.path).parent()
    }
}

#[derive(Debug, Clone)]
pub struct NewFile {
    pub name: String,
    pub filename: String,
    pub path: String,
    pub size: i64,
    pub md5: String,
    pub mimetype: Option<String>,
    pub source: FileSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_public: bool,
    pub download_id: Option<Uuid>,
    pub file_id: Option<Uuid>,
    pub attachment_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMedia {
    pub name: String,
    pub description: Option<String>,
    pub is_public: bool,
    pub download_id: Option<Uuid>,
    pub file_id: Option<Uuid>,
    pub attachment_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Series {
    pub id: i64,
    pub name: String,
    pub season: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub id: i64,
    pub title: Option<String>,
    pub no: Option<String>,
    pub description: Option<String>,
    pub pub_at: Option<DateTime<Utc>>,
    pub media_id: Option<Uuid>,
    pub series_id: i64,
}

/// Column values written on episode insert or overwrite. A `None` publish
/// date leaves the stored value untouched on overwrite.
#[derive(Debug, Clone)]
pub struct EpisodeFields {
    pub title: Option<String>,
    pub no: Option<String>,
    pub description: Option<String>,
    pub pub_at: Option<DateTime<Utc>>,
    pub media_id: Uuid,
    pub series_id: i64,
}

/// A classification rule. Its script lives in a stored code file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: i64,
    pub remark: Option<String>,
    pub code_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleErrorLog {
    pub id: i64,
    pub rule_id: i64,
    pub entry: String,
    pub error: String,
    pub created_at: DateTime<Utc>,
}

/// Output of a rule's `describe` hook.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media: Option<MediaDescriptor>,
    #[serde(default)]
    pub series: Option<SeriesDescriptor>,
    #[serde(default)]
    pub episode: Option<EpisodeDescriptor>,
    #[serde(default)]
    pub save_path: Option<String>,
    #[serde(default)]
    pub overwrite_episode: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDescriptor {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_public: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SeriesDescriptor {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub season: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EpisodeDescriptor {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub no: Option<String>,
    pub description: Option<String>,
}

/// Scripts hand back episode numbers and seasons as either strings or
/// numbers.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a string or number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_feed_entry_keeps_unknown_fields() {
        let raw = json!({
            "title": "Ep 1",
            "enclosure": {"url": "http://x/a.mkv", "type": "application/x-bittorrent"},
            "guid": "abc",
        });
        let entry: FeedEntry = serde_json::from_value(raw).unwrap();
        assert_eq!(entry.enclosure.url, "http://x/a.mkv");
        assert_eq!(entry.extra.get("guid"), Some(&json!("abc")));
        let again: FeedEntry = serde_json::from_str(&entry.to_json()).unwrap();
        assert_eq!(again, entry);
    }

    #[test]
    fn test_enclosure_keeps_unknown_fields() {
        let raw = json!({
            "title": "Ep 1",
            "enclosure": {"url": "http://x/a.torrent", "length": "1", "type": "application/x-bittorrent", "hash": "abc"},
        });
        let entry: FeedEntry = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(entry.enclosure.extra.get("hash"), Some(&json!("abc")));
        let stored: Value = serde_json::from_str(&entry.to_json()).unwrap();
        assert_eq!(stored, raw);
    }

    #[test]
    fn test_published_at_formats() {
        let mut entry = FeedEntry::new("Ep 1", "http://x/a.mkv");
        entry.published = Some("Sun, 06 Oct 2024 18:02:13 +0000".into());
        assert_eq!(
            entry.published_at().unwrap().to_rfc3339(),
            "2024-10-06T18:02:13+00:00"
        );
        entry.published = Some("2024-10-06T20:02:13+02:00".into());
        assert_eq!(
            entry.published_at().unwrap().to_rfc3339(),
            "2024-10-06T18:02:13+00:00"
        );
        entry.published = Some("last tuesday".into());
        assert!(entry.published_at().is_none());
    }

    #[test]
    fn test_descriptor_accepts_numeric_episode_fields() {
        let descriptor: Descriptor = serde_json::from_value(json!({
            "series": {"name": "Frieren", "season": 1},
            "episode": {"no": 12},
            "savePath": "Frieren/S01/E12.mkv",
            "overwriteEpisode": false,
        }))
        .unwrap();
        let series = descriptor.series.unwrap();
        assert_eq!(series.season.as_deref(), Some("1"));
        assert_eq!(descriptor.episode.unwrap().no.as_deref(), Some("12"));
        assert_eq!(descriptor.save_path.as_deref(), Some("Frieren/S01/E12.mkv"));
        assert_eq!(descriptor.overwrite_episode, Some(false));
    }

    #[test]
    fn test_descriptor_rejects_malformed_episode_number() {
        let result: Result<Descriptor, _> =
            serde_json::from_value(json!({"episode": {"no": {"nested": true}}}));
        assert!(result.is_err());
    }

    #[test]
    fn test_query_paging() {
        let query = DownloadQuery {
            page: 2,
            size: 10,
            ..Default::default()
        };
        assert_eq!(query.limit(), 10);
        assert_eq!(query.offset(), 20);
        assert_eq!(DownloadQuery::default().limit(), 25);
    }
}
