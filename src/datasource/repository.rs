use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    DownloadItem, DownloadQuery, DownloadStatus, Episode, EpisodeFields, FileRecord, Media,
    NewDownloadItem, NewFile, NewMedia, Rule, RuleErrorLog, Series,
};
use crate::state::DBPool;

pub mod catalog;
pub mod download_item;
pub mod episode;
pub mod rule;
pub mod series;

#[async_trait]
pub trait DownloadItemRepository: Send + Sync {
    /// Inserts a pending item, or resets the row with `item.id` when given.
    async fn save(&self, item: NewDownloadItem, url: &str, hash: &str) -> Result<DownloadItem>;

    async fn update_status(
        &self,
        id: Uuid,
        status: DownloadStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Moves every item in one of `from` to `to`, returning the number of rows
    /// touched.
    async fn update_status_where(
        &self,
        from: &[DownloadStatus],
        to: DownloadStatus,
        error: Option<&str>,
    ) -> Result<u64>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<DownloadItem>>;

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<DownloadItem>>;

    async fn find_and_count(&self, query: &DownloadQuery) -> Result<(Vec<DownloadItem>, i64)>;

    async fn delete(&self, id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn insert_file(&self, file: NewFile) -> Result<FileRecord>;

    async fn insert_media(&self, media: NewMedia) -> Result<Media>;

    async fn find_series(&self, name: &str, season: Option<&str>) -> Result<Option<Series>>;

    async fn insert_series(&self, name: &str, season: Option<&str>) -> Result<Series>;

    /// Looks up an episode of `series_id` by its title and number.
    async fn find_episode(
        &self,
        series_id: i64,
        title: Option<&str>,
        no: Option<&str>,
    ) -> Result<Option<Episode>>;

    async fn insert_episode(&self, fields: EpisodeFields) -> Result<Episode>;

    async fn update_episode(&self, id: i64, fields: EpisodeFields) -> Result<Episode>;
}

#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn find_rule(&self, id: i64) -> Result<Option<Rule>>;

    async fn insert_error_log(&self, rule_id: i64, entry: &str, error: &str)
        -> Result<RuleErrorLog>;

    async fn error_logs(&self, rule_id: i64) -> Result<Vec<RuleErrorLog>>;
}

/// PostgreSQL implementation of every repository.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DBPool,
}

impl PgStore {
    pub fn new(pool: DBPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DownloadItemRepository for PgStore {
    async fn save(&self, item: NewDownloadItem, url: &str, hash: &str) -> Result<DownloadItem> {
        download_item::upsert(&self.pool, item, url, hash).await
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: DownloadStatus,
        error: Option<&str>,
    ) -> Result<()> {
        download_item::update_status(&self.pool, id, status, error).await
    }

    async fn update_status_where(
        &self,
        from: &[DownloadStatus],
        to: DownloadStatus,
        error: Option<&str>,
    ) -> Result<u64> {
        download_item::update_status_where(&self.pool, from, to, error).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<DownloadItem>> {
        download_item::find_by_id(&self.pool, id).await
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<DownloadItem>> {
        download_item::find_by_ids(&self.pool, ids).await
    }

    async fn find_and_count(&self, query: &DownloadQuery) -> Result<(Vec<DownloadItem>, i64)> {
        download_item::find_and_count(self.pool.clone(), query).await
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        download_item::delete(&self.pool, id).await
    }
}

#[async_trait]
impl CatalogRepository for PgStore {
    async fn insert_file(&self, file: NewFile) -> Result<FileRecord> {
        catalog::insert_file(&self.pool, file).await
    }

    async fn insert_media(&self, media: NewMedia) -> Result<Media> {
        catalog::insert_media(self.pool.clone(), media).await
    }

    async fn find_series(&self, name: &str, season: Option<&str>) -> Result<Option<Series>> {
        series::find_by_unique(&self.pool, name, season).await
    }

    async fn insert_series(&self, name: &str, season: Option<&str>) -> Result<Series> {
        series::insert(&self.pool, name, season).await
    }

    async fn find_episode(
        &self,
        series_id: i64,
        title: Option<&str>,
        no: Option<&str>,
    ) -> Result<Option<Episode>> {
        episode::find_by_unique(&self.pool, series_id, title, no).await
    }

    async fn insert_episode(&self, fields: EpisodeFields) -> Result<Episode> {
        episode::insert(&self.pool, &fields).await
    }

    async fn update_episode(&self, id: i64, fields: EpisodeFields) -> Result<Episode> {
        episode::update(&self.pool, id, &fields).await
    }
}

#[async_trait]
impl RuleRepository for PgStore {
    async fn find_rule(&self, id: i64) -> Result<Option<Rule>> {
        rule::find_by_id(&self.pool, id).await
    }

    async fn insert_error_log(
        &self,
        rule_id: i64,
        entry: &str,
        error: &str,
    ) -> Result<RuleErrorLog> {
        rule::insert_error_log(&self.pool, rule_id, entry, error).await
    }

    async fn error_logs(&self, rule_id: i64) -> Result<Vec<RuleErrorLog>> {
        rule::error_logs(&self.pool, rule_id).await
    }
}
