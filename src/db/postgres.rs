use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, types::Json, PgPool, Postgres, QueryBuilder, Row};

use super::{Filter, ItemKey, Page, Query, Record, ResumeKey, SortValue, Store, WriteCondition};
use crate::error::{AppError, AppResult};

const UPSERT_ITEM: &str = r#"
    INSERT INTO items (entity, pk, sk, version, body, gsi_name, gsi_pk, gsi_sort_text, gsi_sort_num)
    VALUES ($1, $2, $3, 1, $4, $5, $6, $7, $8)
    ON CONFLICT (entity, pk, sk) DO UPDATE SET
        version = items.version + 1,
        body = EXCLUDED.body,
        gsi_name = EXCLUDED.gsi_name,
        gsi_pk = EXCLUDED.gsi_pk,
        gsi_sort_text = EXCLUDED.gsi_sort_text,
        gsi_sort_num = EXCLUDED.gsi_sort_num
    RETURNING version
"#;

const INSERT_ITEM: &str = r#"
    INSERT INTO items (entity, pk, sk, version, body, gsi_name, gsi_pk, gsi_sort_text, gsi_sort_num)
    VALUES ($1, $2, $3, 1, $4, $5, $6, $7, $8)
    ON CONFLICT (entity, pk, sk) DO NOTHING
    RETURNING version
"#;

const UPDATE_ITEM_AT_VERSION: &str = r#"
    UPDATE items SET
        version = version + 1,
        body = $4,
        gsi_name = $5,
        gsi_pk = $6,
        gsi_sort_text = $7,
        gsi_sort_num = $8
    WHERE entity = $1 AND pk = $2 AND sk = $3 AND version = $9
    RETURNING version
"#;

/// Creates a PostgreSQL connection pool
///
/// Establishes a pool of database connections for efficient reuse and applies
/// the embedded migrations that create the item table.
pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Store backed by a single PostgreSQL `items` table
///
/// Every entity shares the table; rows are namespaced by `entity` and carry
/// the record as JSONB alongside its secondary-index columns.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

/// Secondary-index columns of a row
struct IndexColumns {
    name: Option<&'static str>,
    partition: Option<String>,
    sort_text: Option<String>,
    sort_num: Option<f64>,
}

impl IndexColumns {
    fn of<T: Record>(record: &T) -> Self {
        match record.secondary_index() {
            Some(entry) => {
                let (sort_text, sort_num) = match entry.sort {
                    SortValue::Text(text) => (Some(text), None),
                    SortValue::Number(number) => (None, Some(number)),
                };
                Self {
                    name: Some(entry.name),
                    partition: Some(entry.partition),
                    sort_text,
                    sort_num,
                }
            }
            None => Self {
                name: None,
                partition: None,
                sort_text: None,
                sort_num: None,
            },
        }
    }
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn decode<T: Record>(body: Json<serde_json::Value>, version: i64) -> AppResult<T> {
        let mut record: T = serde_json::from_value(body.0)?;
        record.set_version(version as u64);
        Ok(record)
    }

    fn conflict<T: Record>(key: &ItemKey, condition: WriteCondition) -> AppError {
        AppError::Conflict(format!(
            "{} item {:?} failed write condition {:?}",
            T::ENTITY,
            key,
            condition
        ))
    }

    fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
        match filter {
            Filter::AtLeast { attribute, value } => {
                builder.push(" AND (body->>");
                builder.push_bind(attribute.to_string());
                builder.push(")::float8 >= ");
                builder.push_bind(*value);
            }
            Filter::Equals { attribute, value } => {
                builder.push(" AND (body->>");
                builder.push_bind(attribute.to_string());
                builder.push(")::boolean = ");
                builder.push_bind(*value);
            }
        }
    }
}

#[async_trait]
impl<T: Record> Store<T> for PgStore {
    async fn get(&self, key: &ItemKey) -> AppResult<Option<T>> {
        let row: Option<(Json<serde_json::Value>, i64)> = sqlx::query_as(
            "SELECT body, version FROM items WHERE entity = $1 AND pk = $2 AND sk = $3",
        )
        .bind(T::ENTITY)
        .bind(&key.partition)
        .bind(key.sort.as_deref().unwrap_or(""))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(body, version)| Self::decode(body, version))
            .transpose()
    }

    async fn put(&self, record: T, condition: WriteCondition) -> AppResult<T> {
        let key = record.key();
        let body = Json(serde_json::to_value(&record)?);
        let index = IndexColumns::of(&record);
        let sk = key.sort.clone().unwrap_or_default();

        let sql = match condition {
            WriteCondition::Always => UPSERT_ITEM,
            WriteCondition::NotExists => INSERT_ITEM,
            WriteCondition::VersionIs(_) => UPDATE_ITEM_AT_VERSION,
        };

        let mut statement = sqlx::query_scalar::<_, i64>(sql)
            .bind(T::ENTITY)
            .bind(&key.partition)
            .bind(&sk)
            .bind(body)
            .bind(index.name)
            .bind(index.partition)
            .bind(index.sort_text)
            .bind(index.sort_num);
        if let WriteCondition::VersionIs(expected) = condition {
            statement = statement.bind(expected as i64);
        }

        let version = statement.fetch_optional(&self.pool).await?;

        let version = version.ok_or_else(|| Self::conflict::<T>(&key, condition))?;
        tracing::debug!(entity = T::ENTITY, ?key, version, "Item written");

        let mut persisted = record;
        persisted.set_version(version as u64);
        Ok(persisted)
    }

    async fn delete(&self, key: &ItemKey) -> AppResult<Option<T>> {
        let row: Option<(Json<serde_json::Value>, i64)> = sqlx::query_as(
            "DELETE FROM items WHERE entity = $1 AND pk = $2 AND sk = $3 RETURNING body, version",
        )
        .bind(T::ENTITY)
        .bind(&key.partition)
        .bind(key.sort.as_deref().unwrap_or(""))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(body, version)| Self::decode(body, version))
            .transpose()
    }

    async fn query(&self, query: Query) -> AppResult<Page<T>> {
        let direction = if query.descending { "DESC" } else { "ASC" };
        let comparison = if query.descending { " < " } else { " > " };

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT body, version, pk, sk, gsi_sort_text, gsi_sort_num FROM items WHERE entity = ",
        );
        builder.push_bind(T::ENTITY);

        match query.index {
            None => {
                builder.push(" AND pk = ");
                builder.push_bind(query.partition.clone());
            }
            Some(name) => {
                builder.push(" AND gsi_name = ");
                builder.push_bind(name);
                builder.push(" AND gsi_pk = ");
                builder.push_bind(query.partition.clone());
            }
        }

        if let Some(filter) = &query.filter {
            Self::push_filter(&mut builder, filter);
        }

        let sort_column = match (&query.index, &query.start_after) {
            (None, _) => "sk",
            (Some(_), Some(ResumeKey { sort: SortValue::Number(_), .. })) => "gsi_sort_num",
            (Some(_), _) => "gsi_sort_text",
        };

        if let Some(start) = &query.start_after {
            builder.push(format!(" AND ({}, pk, sk){}(", sort_column, comparison));
            match &start.sort {
                SortValue::Text(text) => builder.push_bind(text.clone()),
                SortValue::Number(number) => builder.push_bind(*number),
            };
            builder.push(", ");
            builder.push_bind(start.key.partition.clone());
            builder.push(", ");
            builder.push_bind(start.key.sort.clone().unwrap_or_default());
            builder.push(")");
        }

        match query.index {
            None => builder.push(format!(" ORDER BY sk {}", direction)),
            Some(_) => builder.push(format!(
                " ORDER BY gsi_sort_num {d}, gsi_sort_text {d}, pk {d}, sk {d}",
                d = direction
            )),
        };

        // One extra row tells us whether another page exists.
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ");
            builder.push_bind((limit + 1) as i64);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;

        let mut items = Vec::with_capacity(rows.len());
        let mut last = None;
        let mut more = false;

        for row in rows {
            if query.limit.is_some_and(|limit| items.len() >= limit) {
                more = true;
                break;
            }
            let body: Json<serde_json::Value> = row.try_get("body")?;
            let version: i64 = row.try_get("version")?;
            let pk: String = row.try_get("pk")?;
            let sk: String = row.try_get("sk")?;

            let sort = match query.index {
                None => SortValue::Text(sk.clone()),
                Some(_) => match row.try_get::<Option<f64>, _>("gsi_sort_num")? {
                    Some(number) => SortValue::Number(number),
                    None => SortValue::Text(
                        row.try_get::<Option<String>, _>("gsi_sort_text")?
                            .unwrap_or_default(),
                    ),
                },
            };

            last = Some(ResumeKey {
                key: ItemKey {
                    partition: pk,
                    sort: (!sk.is_empty()).then_some(sk),
                },
                sort,
            });
            items.push(Self::decode(body, version)?);
        }

        tracing::debug!(
            entity = T::ENTITY,
            index = ?query.index,
            returned = items.len(),
            more,
            "Query executed"
        );

        Ok(Page {
            items,
            resume_key: if more { last } else { None },
        })
    }

    async fn scan(&self, limit: Option<usize>) -> AppResult<Vec<T>> {
        let rows: Vec<(Json<serde_json::Value>, i64)> = sqlx::query_as(
            "SELECT body, version FROM items WHERE entity = $1 ORDER BY pk, sk LIMIT $2",
        )
        .bind(T::ENTITY)
        .bind(limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(body, version)| Self::decode(body, version))
            .collect()
    }

    async fn batch_write(&self, to_put: Vec<T>, to_delete: Vec<ItemKey>) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        for key in &to_delete {
            sqlx::query("DELETE FROM items WHERE entity = $1 AND pk = $2 AND sk = $3")
                .bind(T::ENTITY)
                .bind(&key.partition)
                .bind(key.sort.as_deref().unwrap_or(""))
                .execute(&mut *tx)
                .await?;
        }

        for record in &to_put {
            let key = record.key();
            let index = IndexColumns::of(record);
            sqlx::query(UPSERT_ITEM)
                .bind(T::ENTITY)
                .bind(&key.partition)
                .bind(key.sort.as_deref().unwrap_or(""))
                .bind(Json(serde_json::to_value(record)?))
                .bind(index.name)
                .bind(index.partition)
                .bind(index.sort_text)
                .bind(index.sort_num)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            entity = T::ENTITY,
            put = to_put.len(),
            deleted = to_delete.len(),
            "Batch write committed"
        );

        Ok(())
    }
}
