use anyhow::Result;
use sqlx::{Executor, FromRow, Postgres};

use crate::models::Series;

#[derive(Debug, FromRow)]
struct SeriesEntity {
    id: i64,
    name: String,
    season: Option<String>,
}

impl From<SeriesEntity> for Series {
    fn from(value: SeriesEntity) -> Self {
        Self {
            id: value.id,
            name: value.name,
            season: value.season,
        }
    }
}

pub(super) async fn find_by_unique<'e, E>(
    executor: E,
    name: &str,
    season: Option<&str>,
) -> Result<Option<Series>>
where
    E: Executor<'e, Database = Postgres>,
{
    let entity = sqlx::query_as::<_, SeriesEntity>(
        "SELECT id, name, season FROM series WHERE name = $1 AND season IS NOT DISTINCT FROM $2",
    )
    .bind(name)
    .bind(season)
    .fetch_optional(executor)
    .await?;
    Ok(entity.map(Into::into))
}

/// Inserts the series, returning the existing row when another writer got
/// there first.
pub(super) async fn insert<'e, E>(executor: E, name: &str, season: Option<&str>) -> Result<Series>
where
    E: Executor<'e, Database = Postgres>,
{
    let entity = sqlx::query_as::<_, SeriesEntity>(
        "INSERT INTO series (name, season) VALUES ($1, $2)
         ON CONFLICT (name, season) DO UPDATE SET name = EXCLUDED.name
         RETURNING id, name, season",
    )
    .bind(name)
    .bind(season)
    .fetch_one(executor)
    .await?;
    Ok(entity.into())
}
