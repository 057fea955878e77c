use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::types::Uuid;
use sqlx::{Executor, FromRow, Postgres};

use crate::models::{Episode, EpisodeFields};

#[derive(Debug, FromRow)]
struct EpisodeEntity {
    id: i64,
    title: Option<String>,
    no: Option<String>,
    description: Option<String>,
    pub_at: Option<DateTime<Utc>>,
    media_id: Option<Uuid>,
    series_id: i64,
}

impl From<EpisodeEntity> for Episode {
    fn from(value: EpisodeEntity) -> Self {
        Self {
            id: value.id,
            title: value.title,
            no: value.no,
            description: value.description,
            pub_at: value.pub_at,
            media_id: value.media_id,
            series_id: value.series_id,
        }
    }
}

const COLUMNS: &str = "id, title, no, description, pub_at, media_id, series_id";

pub(super) async fn find_by_unique<'e, E>(
    executor: E,
    series_id: i64,
    title: Option<&str>,
    no: Option<&str>,
) -> Result<Option<Episode>>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!(
        "SELECT {COLUMNS} FROM episode
         WHERE series_id = $1 AND title IS NOT DISTINCT FROM $2 AND no IS NOT DISTINCT FROM $3
         ORDER BY id LIMIT 1"
    );
    let entity = sqlx::query_as::<_, EpisodeEntity>(&sql)
        .bind(series_id)
        .bind(title)
        .bind(no)
        .fetch_optional(executor)
        .await?;
    Ok(entity.map(Into::into))
}

pub(super) async fn insert<'e, E>(executor: E, fields: &EpisodeFields) -> Result<Episode>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!(
        "INSERT INTO episode (title, no, description, pub_at, media_id, series_id)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING {COLUMNS}"
    );
    let entity = sqlx::query_as::<_, EpisodeEntity>(&sql)
        .bind(&fields.title)
        .bind(&fields.no)
        .bind(&fields.description)
        .bind(fields.pub_at)
        .bind(fields.media_id)
        .bind(fields.series_id)
        .fetch_one(executor)
        .await?;
    Ok(entity.into())
}

pub(super) async fn update<'e, E>(executor: E, id: i64, fields: &EpisodeFields) -> Result<Episode>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!(
        "UPDATE episode SET
            title = $2,
            no = $3,
            description = COALESCE($4, description),
            pub_at = COALESCE($5, pub_at),
            media_id = $6,
            series_id = $7
         WHERE id = $1
         RETURNING {COLUMNS}"
    );
    let entity = sqlx::query_as::<_, EpisodeEntity>(&sql)
        .bind(id)
        .bind(&fields.title)
        .bind(&fields.no)
        .bind(&fields.description)
        .bind(fields.pub_at)
        .bind(fields.media_id)
        .bind(fields.series_id)
        .fetch_one(executor)
        .await?;
    Ok(entity.into())
}
