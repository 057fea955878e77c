use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::types::Uuid;
use sqlx::{Executor, FromRow, Postgres, QueryBuilder};

use crate::models::{FileRecord, FileSource, Media, NewFile, NewMedia};
use crate::state::DBPool;

#[derive(Debug, FromRow)]
struct FileEntity {
    id: Uuid,
    name: String,
    filename: String,
    path: String,
    size: i64,
    md5: String,
    mimetype: Option<String>,
    source: FileSource,
    created_at: DateTime<Utc>,
}

impl From<FileEntity> for FileRecord {
    fn from(value: FileEntity) -> Self {
        Self {
            id: value.id,
            name: value.name,
            filename: value.filename,
            path: value.path,
            size: value.size,
            md5: value.md5,
            mimetype: value.mimetype,
            source: value.source,
            created_at: value.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MediaEntity {
    id: Uuid,
    name: String,
    description: Option<String>,
    is_public: bool,
    download_id: Option<Uuid>,
    file_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl MediaEntity {
    fn into_media(self, attachment_ids: Vec<Uuid>) -> Media {
        Media {
            id: self.id,
            name: self.name,
            description: self.description,
            is_public: self.is_public,
            download_id: self.download_id,
            file_id: self.file_id,
            attachment_ids,
            created_at: self.created_at,
        }
    }
}

pub(super) async fn insert_file<'e, E>(executor: E, file: NewFile) -> Result<FileRecord>
where
    E: Executor<'e, Database = Postgres>,
{
    let entity = sqlx::query_as::<_, FileEntity>(
        "INSERT INTO file (id, name, filename, path, size, md5, mimetype, source)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(file.name)
    .bind(file.filename)
    .bind(file.path)
    .bind(file.size)
    .bind(file.md5)
    .bind(file.mimetype)
    .bind(file.source)
    .fetch_one(executor)
    .await?;
    Ok(entity.into())
}

pub(super) async fn insert_media(pool: DBPool, media: NewMedia) -> Result<Media> {
    let mut transaction = pool.begin().await?;
    let entity = sqlx::query_as::<_, MediaEntity>(
        "INSERT INTO media (id, name, description, is_public, download_id, file_id)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(media.name)
    .bind(media.description)
    .bind(media.is_public)
    .bind(media.download_id)
    .bind(media.file_id)
    .fetch_one(&mut *transaction)
    .await?;

    if !media.attachment_ids.is_empty() {
        let mut qb = QueryBuilder::new("INSERT INTO media_attachment (media_id, file_id) ");
        qb.push_values(&media.attachment_ids, |mut row, file_id| {
            row.push_bind(entity.id).push_bind(*file_id);
        });
        qb.build().execute(&mut *transaction).await?;
    }
    transaction.commit().await?;
    Ok(entity.into_media(media.attachment_ids))
}
