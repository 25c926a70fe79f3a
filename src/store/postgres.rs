//! PostgreSQL backend.
//!
//! Each checkpoint runs in one transaction. Inserts and updates bind whole
//! columns as arrays and expand them with `UNNEST`, so a batch costs a single
//! round trip per statement regardless of its size.

use super::{ChangeSet, FetchDescriptor, RecordId, StoredRecord};
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

type RecordRow = (Uuid, String, Vec<String>, DateTime<Utc>);

/// Columnar form of a list of records, ready for `UNNEST` binding.
///
/// Cast lists are ragged, which Postgres arrays cannot hold, so each one travels
/// as a JSON text array and is expanded back into `TEXT[]` server side.
#[derive(Default)]
struct RecordColumns {
    ids: Vec<Uuid>,
    titles: Vec<String>,
    casts: Vec<String>,
}

impl RecordColumns {
    fn build<'a>(
        rows: impl IntoIterator<Item = &'a (RecordId, super::Record)>,
    ) -> Result<Self, StoreError> {
        let mut columns = Self::default();
        for (id, record) in rows {
            columns.ids.push(id.as_uuid());
            columns.titles.push(record.title.clone());
            columns.casts.push(serde_json::to_string(&record.cast)?);
        }
        Ok(columns)
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

pub async fn apply(pool: &PgPool, changes: &ChangeSet) -> Result<usize, StoreError> {
    if changes.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;

    let inserted = insert_records(&mut tx, changes).await?;
    let updated = update_records(&mut tx, changes).await?;
    let deleted = delete_records(&mut tx, changes).await?;

    tx.commit().await?;

    log::trace!(
        "checkpoint committed: {} inserted, {} updated, {} deleted",
        inserted,
        updated,
        deleted
    );
    Ok(inserted + updated + deleted)
}

async fn insert_records(
    tx: &mut Transaction<'_, Postgres>,
    changes: &ChangeSet,
) -> Result<usize, StoreError> {
    if changes.inserts.is_empty() {
        return Ok(0);
    }

    let columns = RecordColumns::build(&changes.inserts)?;

    let result = sqlx::query(
        r#"INSERT INTO records (id, title, cast_members, created_at)
           SELECT t.id,
                  t.title,
                  ARRAY(SELECT jsonb_array_elements_text(t.cast_json::jsonb)),
                  NOW()
           FROM UNNEST($1::uuid[], $2::text[], $3::text[])
                WITH ORDINALITY AS t(id, title, cast_json, ord)
           ORDER BY t.ord"#,
    )
    .bind(&columns.ids)
    .bind(&columns.titles)
    .bind(&columns.casts)
    .execute(&mut **tx)
    .await?;

    log::trace!("bulk inserted {} records", columns.len());
    Ok(result.rows_affected() as usize)
}

async fn update_records(
    tx: &mut Transaction<'_, Postgres>,
    changes: &ChangeSet,
) -> Result<usize, StoreError> {
    if changes.updates.is_empty() {
        return Ok(0);
    }

    let columns = RecordColumns::build(&changes.updates)?;

    let result = sqlx::query(
        r#"UPDATE records AS r
           SET title = t.title,
               cast_members = ARRAY(SELECT jsonb_array_elements_text(t.cast_json::jsonb))
           FROM UNNEST($1::uuid[], $2::text[], $3::text[]) AS t(id, title, cast_json)
           WHERE r.id = t.id"#,
    )
    .bind(&columns.ids)
    .bind(&columns.titles)
    .bind(&columns.casts)
    .execute(&mut **tx)
    .await?;

    let updated = result.rows_affected() as usize;
    if updated < columns.len() {
        // Dropping the transaction rolls back the inserts staged above.
        return Err(StoreError::Stale(columns.len() - updated));
    }

    Ok(updated)
}

async fn delete_records(
    tx: &mut Transaction<'_, Postgres>,
    changes: &ChangeSet,
) -> Result<usize, StoreError> {
    if changes.deletes.is_empty() {
        return Ok(0);
    }

    let ids: Vec<Uuid> = changes.deletes.iter().map(RecordId::as_uuid).collect();

    let result = sqlx::query("DELETE FROM records WHERE id = ANY($1)")
        .bind(&ids)
        .execute(&mut **tx)
        .await?;

    Ok(result.rows_affected() as usize)
}

pub async fn count(pool: &PgPool) -> Result<usize, StoreError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
        .fetch_one(pool)
        .await?;

    Ok(count as usize)
}

pub async fn find(pool: &PgPool, id: RecordId) -> Result<Option<StoredRecord>, StoreError> {
    let row: Option<RecordRow> = sqlx::query_as(
        "SELECT id, title, cast_members, created_at FROM records WHERE id = $1",
    )
    .bind(id.as_uuid())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(to_stored))
}

pub async fn fetch(
    pool: &PgPool,
    descriptor: FetchDescriptor,
) -> Result<Vec<StoredRecord>, StoreError> {
    let offset = to_sql_bound("offset", descriptor.offset)?;
    let limit = descriptor
        .limit
        .map(|limit| to_sql_bound("limit", limit))
        .transpose()?;

    let rows: Vec<RecordRow> = sqlx::query_as(
        r#"SELECT id, title, cast_members, created_at
           FROM records
           ORDER BY seq
           OFFSET $1
           LIMIT $2"#,
    )
    .bind(offset)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(to_stored).collect())
}

fn to_sql_bound(name: &str, value: usize) -> Result<i64, StoreError> {
    i64::try_from(value)
        .map_err(|_| StoreError::validation(format!("{name} {value} is out of range")))
}

fn to_stored((id, title, cast, created_at): RecordRow) -> StoredRecord {
    StoredRecord {
        id: RecordId::from_uuid(id),
        title,
        cast,
        created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_bounds_beyond_i64_are_rejected() {
        assert_eq!(to_sql_bound("offset", 40).unwrap(), 40);
        assert!(to_sql_bound("limit", usize::MAX).unwrap_err().is_validation());
    }
}
