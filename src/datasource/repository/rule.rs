use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Executor, FromRow, Postgres};

use crate::models::{Rule, RuleErrorLog};

#[derive(Debug, FromRow)]
struct RuleEntity {
    id: i64,
    remark: Option<String>,
    code_path: Option<String>,
}

#[derive(Debug, FromRow)]
struct ErrorLogEntity {
    id: i64,
    rule_id: i64,
    entry: String,
    error: String,
    created_at: DateTime<Utc>,
}

impl From<ErrorLogEntity> for RuleErrorLog {
    fn from(value: ErrorLogEntity) -> Self {
        Self {
            id: value.id,
            rule_id: value.rule_id,
            entry: value.entry,
            error: value.error,
            created_at: value.created_at,
        }
    }
}

pub(super) async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<Rule>>
where
    E: Executor<'e, Database = Postgres>,
{
    let entity = sqlx::query_as::<_, RuleEntity>(
        "SELECT r.id, r.remark, f.path AS code_path
         FROM rule r LEFT JOIN file f ON f.id = r.code_file_id
         WHERE r.id = $1",
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;
    Ok(entity.map(|r| Rule {
        id: r.id,
        remark: r.remark,
        code_path: r.code_path,
    }))
}

pub(super) async fn insert_error_log<'e, E>(
    executor: E,
    rule_id: i64,
    entry: &str,
    error: &str,
) -> Result<RuleErrorLog>
where
    E: Executor<'e, Database = Postgres>,
{
    let entity = sqlx::query_as::<_, ErrorLogEntity>(
        "INSERT INTO rule_error_log (rule_id, entry, error) VALUES ($1, $2, $3)
         RETURNING id, rule_id, entry, error, created_at",
    )
    .bind(rule_id)
    .bind(entry)
    .bind(error)
    .fetch_one(executor)
    .await?;
    Ok(entity.into())
}

pub(super) async fn error_logs<'e, E>(executor: E, rule_id: i64) -> Result<Vec<RuleErrorLog>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query_as::<_, ErrorLogEntity>(
        "SELECT id, rule_id, entry, error, created_at FROM rule_error_log
         WHERE rule_id = $1 ORDER BY created_at DESC",
    )
    .bind(rule_id)
    .fetch_all(executor)
    .await?;
    Ok(rows.into_iter().map(Into::into).collect())
}
