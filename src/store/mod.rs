//! Storage interface for the dispatch, broadcast, webhook and segment paths.
//!
//! Handlers that only do plain CRUD query the pool directly; everything that
//! carries delivery state goes through [`Store`] so it can be exercised
//! without a database.

#[cfg(test)]
pub mod memory;
pub mod postgres;

pub use self::postgres::PgStore;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::types::{
    Broadcast, BroadcastRecipient, Conversation, ConversationParticipant, Credentials, Customer,
    DeliveryStatus, Message, MessageLog, Segment, SegmentSummary, SubscriptionLimits,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("row".to_string()),
            other => Self::Database(other),
        }
    }
}

/// Final state written back to a message log row.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub status: DeliveryStatus,
    pub wamid: Option<String>,
    pub error: Option<String>,
    pub at: String,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn integration_credentials(
        &self,
        integration_config_id: &str,
    ) -> Result<Option<Credentials>, StoreError>;

    async fn set_integration_status(
        &self,
        integration_config_id: &str,
        status: &str,
        at: &str,
    ) -> Result<(), StoreError>;

    async fn subscription_limits(&self, user_id: &str) -> Result<SubscriptionLimits, StoreError>;

    async fn messages_sent(&self, user_id: &str, period: &str) -> Result<i64, StoreError>;

    async fn increment_messages_sent(
        &self,
        user_id: &str,
        period: &str,
        by: i64,
    ) -> Result<(), StoreError>;

    async fn insert_message_log(&self, log: &MessageLog) -> Result<(), StoreError>;

    async fn finish_message_log(
        &self,
        log_id: &str,
        outcome: &DeliveryOutcome,
    ) -> Result<(), StoreError>;

    /// Match on any of `candidates` or on the digits-only form of the stored number.
    async fn find_customer_by_phone(
        &self,
        user_id: &str,
        candidates: &[String],
    ) -> Result<Option<Customer>, StoreError>;

    async fn customers_by_ids(
        &self,
        user_id: &str,
        ids: &[String],
    ) -> Result<Vec<Customer>, StoreError>;

    async fn insert_customer(&self, customer: &Customer) -> Result<(), StoreError>;

    async fn update_customer(&self, customer: &Customer) -> Result<(), StoreError>;

    /// Member participant of one of `user_id`'s conversations, by customer id first
    /// and external identifier second.
    async fn find_contact_participant(
        &self,
        user_id: &str,
        customer_id: Option<&str>,
        identifiers: &[String],
    ) -> Result<Option<ConversationParticipant>, StoreError>;

    async fn find_user_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Option<ConversationParticipant>, StoreError>;

    async fn insert_conversation(&self, conversation: &Conversation) -> Result<(), StoreError>;

    async fn insert_participant(
        &self,
        participant: &ConversationParticipant,
    ) -> Result<(), StoreError>;

    async fn insert_message(&self, message: &Message) -> Result<(), StoreError>;

    async fn touch_conversation(&self, conversation_id: &str, at: &str) -> Result<(), StoreError>;

    async fn insert_broadcast(&self, broadcast: &Broadcast) -> Result<(), StoreError>;

    async fn get_broadcast(&self, broadcast_id: &str) -> Result<Option<Broadcast>, StoreError>;

    async fn list_broadcasts(&self, user_id: &str) -> Result<Vec<Broadcast>, StoreError>;

    /// Writes status, counters, error and timestamps.
    async fn update_broadcast(&self, broadcast: &Broadcast) -> Result<(), StoreError>;

    async fn insert_recipients(&self, recipients: &[BroadcastRecipient])
        -> Result<(), StoreError>;

    async fn update_recipient(&self, recipient: &BroadcastRecipient) -> Result<(), StoreError>;

    /// Recipients in insertion order.
    async fn broadcast_recipients(
        &self,
        broadcast_id: &str,
    ) -> Result<Vec<BroadcastRecipient>, StoreError>;

    /// Digits-only numbers from `phones` that `user_id` has blacklisted.
    async fn blacklisted_numbers(
        &self,
        user_id: &str,
        phones: &[String],
    ) -> Result<HashSet<String>, StoreError>;

    async fn list_segments(&self, user_id: &str) -> Result<Vec<SegmentSummary>, StoreError>;

    async fn get_segment(
        &self,
        user_id: &str,
        segment_id: &str,
    ) -> Result<Option<Segment>, StoreError>;

    async fn insert_segment(&self, segment: &Segment) -> Result<(), StoreError>;

    async fn delete_segment(&self, user_id: &str, segment_id: &str) -> Result<bool, StoreError>;

    async fn segment_customers(&self, segment_id: &str) -> Result<Vec<Customer>, StoreError>;

    /// Returns `false` when the customer already belonged to the segment.
    async fn link_segment_customer(
        &self,
        segment_id: &str,
        customer_id: &str,
        at: &str,
    ) -> Result<bool, StoreError>;

    async fn unlink_segment_customer(
        &self,
        segment_id: &str,
        customer_id: &str,
    ) -> Result<bool, StoreError>;
}
