use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::types::Uuid;
use sqlx::{Executor, FromRow, Postgres, QueryBuilder};

use crate::models::{DownloadItem, DownloadQuery, DownloadStatus, NewDownloadItem};
use crate::state::DBPool;

#[derive(Debug, FromRow)]
struct DownloadItemEntity {
    id: Uuid,
    title: String,
    url: String,
    hash: String,
    status: DownloadStatus,
    error: Option<String>,
    entry: Option<String>,
    source_id: Option<i64>,
    rule_id: Option<i64>,
    log_id: Option<i64>,
    created_at: DateTime<Utc>,
}

impl From<DownloadItemEntity> for DownloadItem {
    fn from(value: DownloadItemEntity) -> Self {
        Self {
            id: value.id,
            title: value.title,
            url: value.url,
            hash: value.hash,
            status: value.status,
            error: value.error,
            entry: value.entry,
            source_id: value.source_id,
            rule_id: value.rule_id,
            log_id: value.log_id,
            created_at: value.created_at,
            state: None,
        }
    }
}

pub(super) async fn upsert<'e, E>(
    executor: E,
    item: NewDownloadItem,
    url: &str,
    hash: &str,
) -> Result<DownloadItem>
where
    E: Executor<'e, Database = Postgres>,
{
    let entity = sqlx::query_as::<_, DownloadItemEntity>(
        "INSERT INTO download_item (id, title, url, hash, status, error, entry, source_id, rule_id, log_id)
         VALUES ($1, $2, $3, $4, $5, NULL, $6, $7, $8, $9)
         ON CONFLICT (id) DO UPDATE SET
            title = EXCLUDED.title,
            url = EXCLUDED.url,
            hash = EXCLUDED.hash,
            status = EXCLUDED.status,
            error = NULL,
            entry = EXCLUDED.entry,
            source_id = EXCLUDED.source_id,
            rule_id = EXCLUDED.rule_id,
            log_id = EXCLUDED.log_id
         RETURNING *",
    )
    .bind(item.id.unwrap_or_else(Uuid::new_v4))
    .bind(item.title)
    .bind(url)
    .bind(hash)
    .bind(DownloadStatus::Pending)
    .bind(item.entry)
    .bind(item.source_id)
    .bind(item.rule_id)
    .bind(item.log_id)
    .fetch_one(executor)
    .await?;
    Ok(entity.into())
}

pub(super) async fn update_status<'e, E>(
    executor: E,
    id: Uuid,
    status: DownloadStatus,
    error: Option<&str>,
) -> Result<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("UPDATE download_item SET status = $2, error = $3 WHERE id = $1")
        .bind(id)
        .bind(status)
        .bind(error)
        .execute(executor)
        .await?;
    Ok(())
}

pub(super) async fn update_status_where<'e, E>(
    executor: E,
    from: &[DownloadStatus],
    to: DownloadStatus,
    error: Option<&str>,
) -> Result<u64>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        "UPDATE download_item SET status = $1, error = $2 WHERE status = ANY($3::download_status[])",
    )
    .bind(to)
    .bind(error)
    .bind(from)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

pub(super) async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<DownloadItem>>
where
    E: Executor<'e, Database = Postgres>,
{
    let entity = sqlx::query_as::<_, DownloadItemEntity>("SELECT * FROM download_item WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(entity.map(Into::into))
}

pub(super) async fn find_by_ids<'e, E>(executor: E, ids: &[Uuid]) -> Result<Vec<DownloadItem>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query_as::<_, DownloadItemEntity>(
        "SELECT * FROM download_item WHERE id = ANY($1) ORDER BY created_at DESC",
    )
    .bind(ids)
    .fetch_all(executor)
    .await?;
    Ok(rows.into_iter().map(Into::into).collect())
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &DownloadQuery) {
    qb.push(" WHERE TRUE");
    if let Some(status) = query.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(source_id) = query.source_id {
        qb.push(" AND source_id = ").push_bind(source_id);
    }
    if let Some(rule_id) = query.rule_id {
        qb.push(" AND rule_id = ").push_bind(rule_id);
    }
}

pub(super) async fn find_and_count(
    pool: DBPool,
    query: &DownloadQuery,
) -> Result<(Vec<DownloadItem>, i64)> {
    let mut transaction = pool.begin().await?;

    let mut qb = QueryBuilder::new("SELECT * FROM download_item");
    push_filters(&mut qb, query);
    qb.push(" ORDER BY created_at DESC")
        .push(" LIMIT ")
        .push_bind(query.limit())
        .push(" OFFSET ")
        .push_bind(query.offset());
    let rows = qb
        .build_query_as::<DownloadItemEntity>()
        .fetch_all(&mut *transaction)
        .await?;

    let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM download_item");
    push_filters(&mut qb, query);
    let (total,): (i64,) = qb.build_query_as().fetch_one(&mut *transaction).await?;

    transaction.commit().await?;
    Ok((rows.into_iter().map(Into::into).collect(), total))
}

pub(super) async fn delete<'e, E>(executor: E, id: Uuid) -> Result<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("DELETE FROM download_item WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}
