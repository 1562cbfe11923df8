//! SQLite-backed storage using sqlx.

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    ctigate_common::{
        ContentBinding,
        entities::{
            Collection, CollectionDefinition, CollectionId, ContentBlock, InboxMessageId,
            InboxMessageRecord, NewContentBlock, PollRequestParameters, ResultSet,
            ServiceDefinition, Subscription,
        },
    },
    sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool, sqlite::SqlitePoolOptions},
    tracing::{debug, info},
};

use crate::{
    error::{Context, Error, Result},
    query::ContentQuery,
    store::Persistence,
};

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or(Error::InvalidTimestamp { micros })
}

fn opt_from_micros(micros: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    micros.map(from_micros).transpose()
}

/// SQLite-backed implementation of [`Persistence`].
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Connect to `database_url` and run migrations.
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        crate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Fresh in-memory database with migrations applied.
    pub async fn in_memory() -> Result<Self> {
        Self::new("sqlite::memory:", 1).await
    }

    /// Use an existing pool. [`crate::run_migrations`] must have been called.
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn recompute_volume(conn: &mut SqliteConnection, collection_id: CollectionId) -> Result<()> {
    sqlx::query(
        "UPDATE collections
         SET volume = (SELECT COUNT(*) FROM collection_content_blocks WHERE collection_id = ?)
         WHERE id = ?",
    )
    .bind(collection_id)
    .bind(collection_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl Persistence for SqlitePersistence {
    async fn get_services(
        &self,
        collection_id: Option<CollectionId>,
    ) -> Result<Vec<ServiceDefinition>> {
        let rows: Vec<ServiceRow> = match collection_id {
            Some(collection_id) => {
                sqlx::query_as(
                    "SELECT s.definition FROM services s
                     JOIN service_collections sc ON sc.service_id = s.id
                     WHERE sc.collection_id = ?
                     ORDER BY s.position, s.rowid",
                )
                .bind(collection_id)
                .fetch_all(&self.pool)
                .await?
            },
            None => {
                sqlx::query_as("SELECT definition FROM services ORDER BY position, rowid")
                    .fetch_all(&self.pool)
                    .await?
            },
        };
        rows.into_iter().map(ServiceDefinition::try_from).collect()
    }

    async fn get_service(&self, id: &str) -> Result<Option<ServiceDefinition>> {
        let row: Option<ServiceRow> = sqlx::query_as("SELECT definition FROM services WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(ServiceDefinition::try_from).transpose()
    }

    async fn save_service(
        &self,
        service: &ServiceDefinition,
        position: i64,
    ) -> Result<ServiceDefinition> {
        let definition = serde_json::to_string(service)?;
        let now = now_ms();
        sqlx::query(
            "INSERT INTO services (id, service_type, definition, position, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                service_type = excluded.service_type,
                definition = excluded.definition,
                position = excluded.position,
                updated_at = excluded.updated_at",
        )
        .bind(&service.id)
        .bind(service.service_type().as_str())
        .bind(&definition)
        .bind(position)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        debug!(service_id = %service.id, service_type = %service.service_type(), "service saved");
        Ok(service.clone())
    }

    async fn get_collections(&self, service_id: Option<&str>) -> Result<Vec<Collection>> {
        let rows: Vec<CollectionRow> = match service_id {
            Some(service_id) => {
                sqlx::query_as(
                    "SELECT c.* FROM collections c
                     JOIN service_collections sc ON sc.collection_id = c.id
                     WHERE sc.service_id = ?
                     ORDER BY c.id",
                )
                .bind(service_id)
                .fetch_all(&self.pool)
                .await?
            },
            None => {
                sqlx::query_as("SELECT * FROM collections ORDER BY id")
                    .fetch_all(&self.pool)
                    .await?
            },
        };
        rows.into_iter().map(Collection::try_from).collect()
    }

    async fn get_collection(&self, id: CollectionId) -> Result<Option<Collection>> {
        let row: Option<CollectionRow> = sqlx::query_as("SELECT * FROM collections WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Collection::try_from).transpose()
    }

    async fn get_collection_by_name(
        &self,
        name: &str,
        service_id: Option<&str>,
    ) -> Result<Option<Collection>> {
        let row: Option<CollectionRow> = match service_id {
            Some(service_id) => {
                sqlx::query_as(
                    "SELECT c.* FROM collections c
                     JOIN service_collections sc ON sc.collection_id = c.id
                     WHERE sc.service_id = ? AND c.name = ?",
                )
                .bind(service_id)
                .bind(name)
                .fetch_optional(&self.pool)
                .await?
            },
            None => {
                sqlx::query_as("SELECT * FROM collections WHERE name = ?")
                    .bind(name)
                    .fetch_optional(&self.pool)
                    .await?
            },
        };
        row.map(Collection::try_from).transpose()
    }

    async fn save_collection(&self, definition: &CollectionDefinition) -> Result<Collection> {
        let bindings = serde_json::to_string(&definition.supported_content)?;
        sqlx::query(
            "INSERT INTO collections
                (name, description, collection_type, available, accept_all_content, bindings)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET
                description = excluded.description,
                collection_type = excluded.collection_type,
                available = excluded.available,
                accept_all_content = excluded.accept_all_content,
                bindings = excluded.bindings",
        )
        .bind(&definition.name)
        .bind(&definition.description)
        .bind(definition.collection_type.as_str())
        .bind(definition.available as i32)
        .bind(definition.accept_all_content as i32)
        .bind(&bindings)
        .execute(&self.pool)
        .await?;
        debug!(collection = %definition.name, "collection saved");
        self.get_collection_by_name(&definition.name, None)
            .await?
            .with_context(|| format!("collection '{}' missing after save", definition.name))
    }

    async fn attach_collection_to_services(
        &self,
        collection_id: CollectionId,
        service_ids: &[String],
    ) -> Result<()> {
        self.get_collection(collection_id)
            .await?
            .with_context(|| format!("collection with id {collection_id} does not exist"))?;

        let mut tx = self.pool.begin().await?;
        for service_id in service_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO service_collections (service_id, collection_id)
                 SELECT id, ? FROM services WHERE id = ?",
            )
            .bind(collection_id)
            .bind(service_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(collection_id, services = ?service_ids, "collection attached");
        Ok(())
    }

    async fn create_inbox_message(&self, record: &InboxMessageRecord) -> Result<InboxMessageId> {
        let destinations = if record.destination_collections.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&record.destination_collections)?)
        };
        let result = sqlx::query(
            "INSERT INTO inbox_messages (
                message_id, original_message, content_block_count, destination_collections,
                service_id, result_id, record_count, partial_count,
                subscription_collection_name, subscription_id,
                exclusive_begin_timestamp_label, inclusive_end_timestamp_label, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.message_id)
        .bind(&record.original_message)
        .bind(record.content_block_count)
        .bind(&destinations)
        .bind(&record.service_id)
        .bind(&record.result_id)
        .bind(record.record_count)
        .bind(record.partial_count as i32)
        .bind(&record.subscription_collection_name)
        .bind(&record.subscription_id)
        .bind(record.exclusive_begin_timestamp_label.map(|t| t.timestamp_micros()))
        .bind(record.inclusive_end_timestamp_label.map(|t| t.timestamp_micros()))
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn create_content_block(
        &self,
        block: &NewContentBlock,
        collection_ids: &[CollectionId],
    ) -> Result<ContentBlock> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "INSERT INTO content_blocks (
                timestamp_label, inbox_message_id, content, binding_id, binding_subtype,
                message, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(block.timestamp_label.timestamp_micros())
        .bind(block.inbox_message_id)
        .bind(&block.content)
        .bind(&block.content_binding.binding)
        .bind(block.content_binding.subtype())
        .bind(&block.message)
        .bind(now_ms())
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();

        for &collection_id in collection_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO collection_content_blocks (collection_id, content_block_id)
                 VALUES (?, ?)",
            )
            .bind(collection_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            recompute_volume(&mut *tx, collection_id).await?;
        }
        tx.commit().await?;

        debug!(content_block = id, collections = ?collection_ids, "content block stored");
        Ok(ContentBlock {
            id,
            content: block.content.clone(),
            content_binding: block.content_binding.clone(),
            timestamp_label: block.timestamp_label,
            message: block.message.clone(),
            inbox_message_id: block.inbox_message_id,
        })
    }

    async fn get_content_blocks(
        &self,
        query: &ContentQuery,
        offset: i64,
        limit: Option<i64>,
    ) -> Result<Vec<ContentBlock>> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT cb.id, cb.timestamp_label, cb.inbox_message_id, cb.content, cb.binding_id, \
             cb.binding_subtype, cb.message FROM content_blocks cb",
        );
        query.push_filters(&mut qb);
        qb.push(" ORDER BY cb.timestamp_label ASC, cb.id ASC LIMIT ")
            .push_bind(limit.unwrap_or(-1))
            .push(" OFFSET ")
            .push_bind(offset.max(0));
        let rows = qb
            .build_query_as::<ContentBlockRow>()
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(ContentBlock::try_from).collect()
    }

    async fn get_content_blocks_count(&self, query: &ContentQuery) -> Result<i64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM content_blocks cb");
        query.push_filters(&mut qb);
        Ok(qb.build_query_scalar::<i64>().fetch_one(&self.pool).await?)
    }

    async fn delete_content_blocks(
        &self,
        collection_name: &str,
        start_time: DateTime<Utc>,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        let collection = self
            .get_collection_by_name(collection_name, None)
            .await?
            .ok_or_else(|| Error::collection_not_found(collection_name))?;
        let start = start_time.timestamp_micros();
        let end = end_time.map(|t| t.timestamp_micros());

        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query(
            "DELETE FROM collection_content_blocks
             WHERE collection_id = ?
               AND content_block_id IN (
                   SELECT id FROM content_blocks
                   WHERE timestamp_label > ? AND (? IS NULL OR timestamp_label <= ?))",
        )
        .bind(collection.id)
        .bind(start)
        .bind(end)
        .bind(end)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(
            "DELETE FROM content_blocks
             WHERE timestamp_label > ? AND (? IS NULL OR timestamp_label <= ?)
               AND NOT EXISTS (
                   SELECT 1 FROM collection_content_blocks ccb
                   WHERE ccb.content_block_id = content_blocks.id)",
        )
        .bind(start)
        .bind(end)
        .bind(end)
        .execute(&mut *tx)
        .await?;

        recompute_volume(&mut *tx, collection.id).await?;
        tx.commit().await?;

        info!(collection = %collection_name, removed, "content blocks deleted");
        Ok(removed)
    }

    async fn create_result_set(&self, result_set: &ResultSet) -> Result<ResultSet> {
        let bindings = serde_json::to_string(&result_set.content_bindings)?;
        sqlx::query(
            "INSERT INTO result_sets (id, collection_id, bindings, begin_time, end_time, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&result_set.id)
        .bind(result_set.collection_id)
        .bind(&bindings)
        .bind(result_set.begin_time.map(|t| t.timestamp_micros()))
        .bind(result_set.end_time.map(|t| t.timestamp_micros()))
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(result_set.clone())
    }

    async fn get_result_set(&self, id: &str) -> Result<Option<ResultSet>> {
        let row: Option<ResultSetRow> = sqlx::query_as(
            "SELECT id, collection_id, bindings, begin_time, end_time FROM result_sets WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ResultSet::try_from).transpose()
    }

    async fn create_subscription(&self, subscription: &Subscription) -> Result<Subscription> {
        let params = serde_json::to_string(&subscription.params)?;
        let now = now_ms();
        sqlx::query(
            "INSERT INTO subscriptions
                (id, service_id, collection_id, status, params, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&subscription.subscription_id)
        .bind(&subscription.service_id)
        .bind(subscription.collection_id)
        .bind(subscription.status.as_str())
        .bind(&params)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        debug!(
            subscription_id = %subscription.subscription_id,
            status = subscription.status.as_str(),
            "subscription created"
        );
        Ok(subscription.clone())
    }

    async fn update_subscription(&self, subscription: &Subscription) -> Result<Subscription> {
        let params = serde_json::to_string(&subscription.params)?;
        let now = now_ms();
        sqlx::query(
            "INSERT INTO subscriptions
                (id, service_id, collection_id, status, params, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                service_id = excluded.service_id,
                collection_id = excluded.collection_id,
                status = excluded.status,
                params = excluded.params,
                updated_at = excluded.updated_at",
        )
        .bind(&subscription.subscription_id)
        .bind(&subscription.service_id)
        .bind(subscription.collection_id)
        .bind(subscription.status.as_str())
        .bind(&params)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        debug!(
            subscription_id = %subscription.subscription_id,
            status = subscription.status.as_str(),
            "subscription updated"
        );
        Ok(subscription.clone())
    }

    async fn get_subscription(&self, id: &str) -> Result<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(
            "SELECT id, service_id, collection_id, status, params FROM subscriptions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Subscription::try_from).transpose()
    }

    async fn get_subscriptions(&self, service_id: &str) -> Result<Vec<Subscription>> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(
            "SELECT id, service_id, collection_id, status, params FROM subscriptions
             WHERE service_id = ?
             ORDER BY created_at, rowid",
        )
        .bind(service_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Subscription::try_from).collect()
    }
}

// ── Row types ────────────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct ServiceRow {
    definition: String,
}

impl TryFrom<ServiceRow> for ServiceDefinition {
    type Error = Error;

    fn try_from(row: ServiceRow) -> Result<Self> {
        Ok(serde_json::from_str(&row.definition)?)
    }
}

#[derive(sqlx::FromRow)]
struct CollectionRow {
    id: i64,
    name: String,
    description: Option<String>,
    collection_type: String,
    available: i32,
    accept_all_content: i32,
    bindings: String,
    volume: i64,
}

impl TryFrom<CollectionRow> for Collection {
    type Error = Error;

    fn try_from(r: CollectionRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            name: r.name,
            description: r.description,
            collection_type: r.collection_type.parse()?,
            available: r.available != 0,
            accept_all_content: r.accept_all_content != 0,
            supported_content: serde_json::from_str(&r.bindings)?,
            volume: r.volume,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ContentBlockRow {
    id: i64,
    timestamp_label: i64,
    inbox_message_id: Option<i64>,
    content: Vec<u8>,
    binding_id: String,
    binding_subtype: Option<String>,
    message: Option<String>,
}

impl TryFrom<ContentBlockRow> for ContentBlock {
    type Error = Error;

    fn try_from(r: ContentBlockRow) -> Result<Self> {
        let content_binding = match r.binding_subtype {
            Some(subtype) => ContentBinding::with_subtypes(r.binding_id, [subtype]),
            None => ContentBinding::new(r.binding_id),
        };
        Ok(Self {
            id: r.id,
            content: r.content,
            content_binding,
            timestamp_label: from_micros(r.timestamp_label)?,
            message: r.message,
            inbox_message_id: r.inbox_message_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ResultSetRow {
    id: String,
    collection_id: i64,
    bindings: String,
    begin_time: Option<i64>,
    end_time: Option<i64>,
}

impl TryFrom<ResultSetRow> for ResultSet {
    type Error = Error;

    fn try_from(r: ResultSetRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            collection_id: r.collection_id,
            content_bindings: serde_json::from_str(&r.bindings)?,
            begin_time: opt_from_micros(r.begin_time)?,
            end_time: opt_from_micros(r.end_time)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    id: String,
    service_id: String,
    collection_id: i64,
    status: String,
    params: String,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = Error;

    fn try_from(r: SubscriptionRow) -> Result<Self> {
        let params: PollRequestParameters = serde_json::from_str(&r.params)?;
        Ok(Self {
            subscription_id: r.id,
            service_id: r.service_id,
            collection_id: r.collection_id,
            status: r.status.parse()?,
            params,
        })
    }
}
