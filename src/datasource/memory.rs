use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use ahash::RandomState;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::datasource::repository::{CatalogRepository, DownloadItemRepository, RuleRepository};
use crate::models::{
    DownloadItem, DownloadQuery, DownloadStatus, Episode, EpisodeFields, FileRecord, Media,
    NewDownloadItem, NewFile, NewMedia, Rule, RuleErrorLog, Series,
};

#[derive(Debug, Default)]
struct Tables {
    items: HashMap<Uuid, DownloadItem, RandomState>,
    files: HashMap<Uuid, FileRecord, RandomState>,
    media: HashMap<Uuid, Media, RandomState>,
    series: Vec<Series>,
    episodes: Vec<Episode>,
    rules: HashMap<i64, Rule, RandomState>,
    error_logs: Vec<RuleErrorLog>,
    sequence: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.sequence += 1;
        self.sequence
    }
}

/// Repository implementation backed by process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().expect("RWLock should never be poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().expect("RWLock should never be poisoned")
    }

    pub fn insert_rule(&self, remark: Option<&str>, code_path: Option<&str>) -> Rule {
        let mut tables = self.write();
        let rule = Rule {
            id: tables.next_id(),
            remark: remark.map(Into::into),
            code_path: code_path.map(Into::into),
        };
        tables.rules.insert(rule.id, rule.clone());
        rule
    }

    pub fn files(&self) -> Vec<FileRecord> {
        let mut files: Vec<_> = self.read().files.values().cloned().collect();
        files.sort_by_key(|f| f.created_at);
        files
    }

    pub fn media(&self) -> Vec<Media> {
        let mut media: Vec<_> = self.read().media.values().cloned().collect();
        media.sort_by_key(|m| m.created_at);
        media
    }

    pub fn series(&self) -> Vec<Series> {
        self.read().series.clone()
    }

    pub fn episodes(&self) -> Vec<Episode> {
        self.read().episodes.clone()
    }

    pub fn items(&self) -> Vec<DownloadItem> {
        self.read().items.values().cloned().collect()
    }
}

#[async_trait]
impl DownloadItemRepository for MemoryStore {
    async fn save(&self, item: NewDownloadItem, url: &str, hash: &str) -> Result<DownloadItem> {
        let mut tables = self.write();
        let id = item.id.unwrap_or_else(Uuid::new_v4);
        let created_at = tables.items.get(&id).map_or_else(Utc::now, |i| i.created_at);
        let record = DownloadItem {
            id,
            title: item.title,
            url: url.into(),
            hash: hash.into(),
            status: DownloadStatus::Pending,
            error: None,
            entry: item.entry,
            source_id: item.source_id,
            rule_id: item.rule_id,
            log_id: item.log_id,
            created_at,
            state: None,
        };
        tables.items.insert(id, record.clone());
        Ok(record)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: DownloadStatus,
        error: Option<&str>,
    ) -> Result<()> {
        if let Some(item) = self.write().items.get_mut(&id) {
            item.status = status;
            item.error = error.map(Into::into);
        }
        Ok(())
    }

    async fn update_status_where(
        &self,
        from: &[DownloadStatus],
        to: DownloadStatus,
        error: Option<&str>,
    ) -> Result<u64> {
        let mut count = 0;
        for item in self.write().items.values_mut() {
            if from.contains(&item.status) {
                item.status = to;
                item.error = error.map(Into::into);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<DownloadItem>> {
        Ok(self.read().items.get(&id).cloned())
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<DownloadItem>> {
        let tables = self.read();
        Ok(ids
            .iter()
            .filter_map(|id| tables.items.get(id).cloned())
            .collect())
    }

    async fn find_and_count(&self, query: &DownloadQuery) -> Result<(Vec<DownloadItem>, i64)> {
        let mut matching: Vec<_> = self
            .read()
            .items
            .values()
            .filter(|i| query.status.map_or(true, |s| i.status == s))
            .filter(|i| query.source_id.map_or(true, |s| i.source_id == Some(s)))
            .filter(|i| query.rule_id.map_or(true, |r| i.rule_id == Some(r)))
            .cloned()
            .collect();
        matching.sort_by_key(|i| std::cmp::Reverse(i.created_at));
        let total = i64::try_from(matching.len())?;
        let page = matching
            .into_iter()
            .skip(usize::try_from(query.offset())?)
            .take(usize::try_from(query.limit())?)
            .collect();
        Ok((page, total))
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.write().items.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl CatalogRepository for MemoryStore {
    async fn insert_file(&self, file: NewFile) -> Result<FileRecord> {
        let record = FileRecord {
            id: Uuid::new_v4(),
            name: file.name,
            filename: file.filename,
            path: file.path,
            size: file.size,
            md5: file.md5,
            mimetype: file.mimetype,
            source: file.source,
            created_at: Utc::now(),
        };
        self.write().files.insert(record.id, record.clone());
        Ok(record)
    }

    async fn insert_media(&self, media: NewMedia) -> Result<Media> {
        let record = Media {
            id: Uuid::new_v4(),
            name: media.name,
            description: media.description,
            is_public: media.is_public,
            download_id: media.download_id,
            file_id: media.file_id,
            attachment_ids: media.attachment_ids,
            created_at: Utc::now(),
        };
        self.write().media.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_series(&self, name: &str, season: Option<&str>) -> Result<Option<Series>> {
        Ok(self
            .read()
            .series
            .iter()
            .find(|s| s.name == name && s.season.as_deref() == season)
            .cloned())
    }

    async fn insert_series(&self, name: &str, season: Option<&str>) -> Result<Series> {
        let mut tables = self.write();
        if let Some(existing) = tables
            .series
            .iter()
            .find(|s| s.name == name && s.season.as_deref() == season)
        {
            return Ok(existing.clone());
        }
        let series = Series {
            id: tables.next_id(),
            name: name.into(),
            season: season.map(Into::into),
        };
        tables.series.push(series.clone());
        Ok(series)
    }

    async fn find_episode(
        &self,
        series_id: i64,
        title: Option<&str>,
        no: Option<&str>,
    ) -> Result<Option<Episode>> {
        Ok(self
            .read()
            .episodes
            .iter()
            .find(|e| {
                e.series_id == series_id && e.title.as_deref() == title && e.no.as_deref() == no
            })
            .cloned())
    }

    async fn insert_episode(&self, fields: EpisodeFields) -> Result<Episode> {
        let mut tables = self.write();
        let episode = Episode {
            id: tables.next_id(),
            title: fields.title,
            no: fields.no,
            description: fields.description,
            pub_at: fields.pub_at,
            media_id: Some(fields.media_id),
            series_id: fields.series_id,
        };
        tables.episodes.push(episode.clone());
        Ok(episode)
    }

    async fn update_episode(&self, id: i64, fields: EpisodeFields) -> Result<Episode> {
        let mut tables = self.write();
        let episode = tables
            .episodes
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| anyhow!("episode {id} does not exist"))?;
        episode.title = fields.title;
        episode.no = fields.no;
        if fields.description.is_some() {
            episode.description = fields.description;
        }
        if fields.pub_at.is_some() {
            episode.pub_at = fields.pub_at;
        }
        episode.media_id = Some(fields.media_id);
        episode.series_id = fields.series_id;
        Ok(episode.clone())
    }
}

#[async_trait]
impl RuleRepository for MemoryStore {
    async fn find_rule(&self, id: i64) -> Result<Option<Rule>> {
        Ok(self.read().rules.get(&id).cloned())
    }

    async fn insert_error_log(
        &self,
        rule_id: i64,
        entry: &str,
        error: &str,
    ) -> Result<RuleErrorLog> {
        let mut tables = self.write();
        let log = RuleErrorLog {
            id: tables.next_id(),
            rule_id,
            entry: entry.into(),
            error: error.into(),
            created_at: Utc::now(),
        };
        tables.error_logs.push(log.clone());
        Ok(log)
    }

    async fn error_logs(&self, rule_id: i64) -> Result<Vec<RuleErrorLog>> {
        Ok(self
            .read()
            .error_logs
            .iter()
            .filter(|l| l.rule_id == rule_id)
            .cloned()
            .collect())
    }
}
