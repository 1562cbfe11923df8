use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    ctigate_common::entities::{
        Collection, CollectionDefinition, CollectionId, ContentBlock, InboxMessageId,
        InboxMessageRecord, NewContentBlock, ResultSet, ServiceDefinition, Subscription,
    },
};

use crate::{error::Result, query::ContentQuery};

/// Storage collaborator for the request pipeline.
///
/// Lookups return `Ok(None)` when the entity does not exist; list operations
/// return an empty vector when nothing matches.
#[async_trait]
pub trait Persistence: Send + Sync {
    // ── Services ─────────────────────────────────────────────────────────────

    /// All services in the order they were first saved, or only those
    /// attached to `collection_id`.
    async fn get_services(&self, collection_id: Option<CollectionId>)
    -> Result<Vec<ServiceDefinition>>;

    async fn get_service(&self, id: &str) -> Result<Option<ServiceDefinition>>;

    /// Insert or replace a service by id.
    ///
    /// `position` is the service's index in the configuration. Services are
    /// listed in ascending position, so a re-save with a new index reorders
    /// them.
    async fn save_service(
        &self,
        service: &ServiceDefinition,
        position: i64,
    ) -> Result<ServiceDefinition>;

    async fn get_services_for_collection(
        &self,
        collection_id: CollectionId,
    ) -> Result<Vec<ServiceDefinition>> {
        self.get_services(Some(collection_id)).await
    }

    // ── Collections ──────────────────────────────────────────────────────────

    /// All collections, or only those attached to `service_id`.
    async fn get_collections(&self, service_id: Option<&str>) -> Result<Vec<Collection>>;

    async fn get_collection(&self, id: CollectionId) -> Result<Option<Collection>>;

    /// Look a collection up by name, optionally restricted to the collections
    /// attached to `service_id`.
    async fn get_collection_by_name(
        &self,
        name: &str,
        service_id: Option<&str>,
    ) -> Result<Option<Collection>>;

    /// Insert or update a collection keyed by name. Volume is preserved.
    async fn save_collection(&self, definition: &CollectionDefinition) -> Result<Collection>;

    /// Link a collection to services. Unknown service ids are ignored.
    async fn attach_collection_to_services(
        &self,
        collection_id: CollectionId,
        service_ids: &[String],
    ) -> Result<()>;

    // ── Content ──────────────────────────────────────────────────────────────

    async fn create_inbox_message(&self, record: &InboxMessageRecord) -> Result<InboxMessageId>;

    /// Store a block and attach it to `collection_ids` atomically. Volumes of
    /// the touched collections are recomputed in the same transaction.
    async fn create_content_block(
        &self,
        block: &NewContentBlock,
        collection_ids: &[CollectionId],
    ) -> Result<ContentBlock>;

    /// Blocks matching `query`, ascending by timestamp label.
    async fn get_content_blocks(
        &self,
        query: &ContentQuery,
        offset: i64,
        limit: Option<i64>,
    ) -> Result<Vec<ContentBlock>>;

    async fn get_content_blocks_count(&self, query: &ContentQuery) -> Result<i64>;

    /// Remove blocks labelled within `(start_time, end_time]` from the named
    /// collection and return how many were removed. Blocks left without any
    /// collection are deleted and the collection volume is recomputed.
    async fn delete_content_blocks(
        &self,
        collection_name: &str,
        start_time: DateTime<Utc>,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<u64>;

    // ── Result sets ──────────────────────────────────────────────────────────

    async fn create_result_set(&self, result_set: &ResultSet) -> Result<ResultSet>;

    async fn get_result_set(&self, id: &str) -> Result<Option<ResultSet>>;

    // ── Subscriptions ────────────────────────────────────────────────────────

    async fn create_subscription(&self, subscription: &Subscription) -> Result<Subscription>;

    /// Insert or replace a subscription by id.
    async fn update_subscription(&self, subscription: &Subscription) -> Result<Subscription>;

    async fn get_subscription(&self, id: &str) -> Result<Option<Subscription>>;

    async fn get_subscriptions(&self, service_id: &str) -> Result<Vec<Subscription>>;
}
