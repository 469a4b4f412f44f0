//! In-memory [`Store`] used by unit tests.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use async_trait::async_trait;

use super::{DeliveryOutcome, Store, StoreError};
use crate::{
    phone::normalize_phone,
    types::{
        Broadcast, BroadcastRecipient, Conversation, ConversationParticipant, Credentials,
        Customer, Message, MessageLog, ParticipantRole, Segment, SegmentSummary,
        SubscriptionLimits,
    },
};

#[derive(Default)]
pub struct MemoryData {
    pub credentials: Vec<Credentials>,
    pub integration_status: HashMap<String, String>,
    pub limits: HashMap<String, SubscriptionLimits>,
    pub usage: HashMap<(String, String), i64>,
    pub message_logs: Vec<MessageLog>,
    pub customers: Vec<Customer>,
    pub conversations: Vec<Conversation>,
    pub participants: Vec<ConversationParticipant>,
    pub messages: Vec<Message>,
    pub broadcasts: Vec<Broadcast>,
    pub recipients: Vec<BroadcastRecipient>,
    pub blacklist: Vec<(String, String)>,
    pub segments: Vec<Segment>,
    pub segment_links: Vec<(String, String)>,
    /// Store operations that return an error instead of running.
    pub failing: HashSet<&'static str>,
}

#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<MemoryData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the raw tables, for seeding and assertions.
    pub fn with<R>(&self, f: impl FnOnce(&mut MemoryData) -> R) -> R {
        let mut data = self.data.lock().expect("memory store poisoned");
        f(&mut data)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryData> {
        self.data.lock().expect("memory store poisoned")
    }

    fn injected(&self, operation: &'static str) -> Result<(), StoreError> {
        if self.lock().failing.contains(operation) {
            return Err(StoreError::Corrupt(format!("{operation} unavailable")));
        }
        Ok(())
    }
}

fn phone_matches(stored: &str, candidates: &[String]) -> bool {
    if candidates.iter().any(|c| c == stored) {
        return true;
    }
    match normalize_phone(stored) {
        Some(digits) => candidates.iter().any(|c| c == &digits),
        None => false,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn integration_credentials(
        &self,
        integration_config_id: &str,
    ) -> Result<Option<Credentials>, StoreError> {
        Ok(self
            .lock()
            .credentials
            .iter()
            .find(|c| c.integration_config_id == integration_config_id)
            .cloned())
    }

    async fn set_integration_status(
        &self,
        integration_config_id: &str,
        status: &str,
        _at: &str,
    ) -> Result<(), StoreError> {
        self.lock()
            .integration_status
            .insert(integration_config_id.to_string(), status.to_string());
        Ok(())
    }

    async fn subscription_limits(&self, user_id: &str) -> Result<SubscriptionLimits, StoreError> {
        Ok(self.lock().limits.get(user_id).copied().unwrap_or_default())
    }

    async fn messages_sent(&self, user_id: &str, period: &str) -> Result<i64, StoreError> {
        Ok(self
            .lock()
            .usage
            .get(&(user_id.to_string(), period.to_string()))
            .copied()
            .unwrap_or(0))
    }

    async fn increment_messages_sent(
        &self,
        user_id: &str,
        period: &str,
        by: i64,
    ) -> Result<(), StoreError> {
        *self
            .lock()
            .usage
            .entry((user_id.to_string(), period.to_string()))
            .or_insert(0) += by;
        Ok(())
    }

    async fn insert_message_log(&self, log: &MessageLog) -> Result<(), StoreError> {
        self.lock().message_logs.push(log.clone());
        Ok(())
    }

    async fn finish_message_log(
        &self,
        log_id: &str,
        outcome: &DeliveryOutcome,
    ) -> Result<(), StoreError> {
        let mut data = self.lock();
        let log = data
            .message_logs
            .iter_mut()
            .find(|l| l.id == log_id)
            .ok_or_else(|| StoreError::NotFound(format!("message log {log_id}")))?;
        log.status = outcome.status;
        log.wamid = outcome.wamid.clone();
        log.error_message = outcome.error.clone();
        log.updated_at = outcome.at.clone();
        Ok(())
    }

    async fn find_customer_by_phone(
        &self,
        user_id: &str,
        candidates: &[String],
    ) -> Result<Option<Customer>, StoreError> {
        Ok(self
            .lock()
            .customers
            .iter()
            .find(|c| c.user_id == user_id && phone_matches(&c.phone_number, candidates))
            .cloned())
    }

    async fn customers_by_ids(
        &self,
        user_id: &str,
        ids: &[String],
    ) -> Result<Vec<Customer>, StoreError> {
        Ok(self
            .lock()
            .customers
            .iter()
            .filter(|c| c.user_id == user_id && ids.contains(&c.id))
            .cloned()
            .collect())
    }

    async fn insert_customer(&self, customer: &Customer) -> Result<(), StoreError> {
        self.lock().customers.push(customer.clone());
        Ok(())
    }

    async fn update_customer(&self, customer: &Customer) -> Result<(), StoreError> {
        let mut data = self.lock();
        let existing = data
            .customers
            .iter_mut()
            .find(|c| c.id == customer.id)
            .ok_or_else(|| StoreError::NotFound(format!("customer {}", customer.id)))?;
        *existing = customer.clone();
        Ok(())
    }

    async fn find_contact_participant(
        &self,
        user_id: &str,
        customer_id: Option<&str>,
        identifiers: &[String],
    ) -> Result<Option<ConversationParticipant>, StoreError> {
        let data = self.lock();
        let owned = |p: &&ConversationParticipant| {
            p.role == ParticipantRole::Member
                && data
                    .conversations
                    .iter()
                    .any(|c| c.id == p.conversation_id && c.user_id == user_id)
        };
        if let Some(customer_id) = customer_id {
            if let Some(found) = data
                .participants
                .iter()
                .filter(owned)
                .find(|p| p.customer_id.as_deref() == Some(customer_id))
            {
                return Ok(Some(found.clone()));
            }
        }
        Ok(data
            .participants
            .iter()
            .filter(owned)
            .find(|p| {
                p.external_user_identifier
                    .as_ref()
                    .is_some_and(|ext| identifiers.contains(ext))
            })
            .cloned())
    }

    async fn find_user_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Option<ConversationParticipant>, StoreError> {
        Ok(self
            .lock()
            .participants
            .iter()
            .find(|p| {
                p.conversation_id == conversation_id && p.user_id.as_deref() == Some(user_id)
            })
            .cloned())
    }

    async fn insert_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        self.lock().conversations.push(conversation.clone());
        Ok(())
    }

    async fn insert_participant(
        &self,
        participant: &ConversationParticipant,
    ) -> Result<(), StoreError> {
        self.lock().participants.push(participant.clone());
        Ok(())
    }

    async fn insert_message(&self, message: &Message) -> Result<(), StoreError> {
        self.lock().messages.push(message.clone());
        Ok(())
    }

    async fn touch_conversation(&self, conversation_id: &str, at: &str) -> Result<(), StoreError> {
        if let Some(conversation) = self
            .lock()
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            conversation.updated_at = at.to_string();
        }
        Ok(())
    }

    async fn insert_broadcast(&self, broadcast: &Broadcast) -> Result<(), StoreError> {
        self.lock().broadcasts.push(broadcast.clone());
        Ok(())
    }

    async fn get_broadcast(&self, broadcast_id: &str) -> Result<Option<Broadcast>, StoreError> {
        Ok(self
            .lock()
            .broadcasts
            .iter()
            .find(|b| b.id == broadcast_id)
            .cloned())
    }

    async fn list_broadcasts(&self, user_id: &str) -> Result<Vec<Broadcast>, StoreError> {
        let mut list = self
            .lock()
            .broadcasts
            .iter()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect::<Vec<_>>();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn update_broadcast(&self, broadcast: &Broadcast) -> Result<(), StoreError> {
        let mut data = self.lock();
        let existing = data
            .broadcasts
            .iter_mut()
            .find(|b| b.id == broadcast.id)
            .ok_or_else(|| StoreError::NotFound(format!("broadcast {}", broadcast.id)))?;
        *existing = broadcast.clone();
        Ok(())
    }

    async fn insert_recipients(
        &self,
        recipients: &[BroadcastRecipient],
    ) -> Result<(), StoreError> {
        self.injected("insert_recipients")?;
        self.lock().recipients.extend(recipients.iter().cloned());
        Ok(())
    }

    async fn update_recipient(&self, recipient: &BroadcastRecipient) -> Result<(), StoreError> {
        let mut data = self.lock();
        let existing = data
            .recipients
            .iter_mut()
            .find(|r| r.id == recipient.id)
            .ok_or_else(|| StoreError::NotFound(format!("recipient {}", recipient.id)))?;
        *existing = recipient.clone();
        Ok(())
    }

    async fn broadcast_recipients(
        &self,
        broadcast_id: &str,
    ) -> Result<Vec<BroadcastRecipient>, StoreError> {
        Ok(self
            .lock()
            .recipients
            .iter()
            .filter(|r| r.broadcast_id == broadcast_id)
            .cloned()
            .collect())
    }

    async fn blacklisted_numbers(
        &self,
        user_id: &str,
        phones: &[String],
    ) -> Result<HashSet<String>, StoreError> {
        self.injected("blacklisted_numbers")?;
        Ok(self
            .lock()
            .blacklist
            .iter()
            .filter(|(owner, _)| owner == user_id)
            .filter_map(|(_, phone)| normalize_phone(phone))
            .filter(|digits| phones.contains(digits))
            .collect())
    }

    async fn list_segments(&self, user_id: &str) -> Result<Vec<SegmentSummary>, StoreError> {
        let data = self.lock();
        Ok(data
            .segments
            .iter()
            .filter(|s| s.user_id == user_id)
            .map(|s| SegmentSummary {
                segment: s.clone(),
                contact_count: data
                    .segment_links
                    .iter()
                    .filter(|(segment_id, _)| segment_id == &s.id)
                    .count() as i64,
            })
            .collect())
    }

    async fn get_segment(
        &self,
        user_id: &str,
        segment_id: &str,
    ) -> Result<Option<Segment>, StoreError> {
        Ok(self
            .lock()
            .segments
            .iter()
            .find(|s| s.id == segment_id && s.user_id == user_id)
            .cloned())
    }

    async fn insert_segment(&self, segment: &Segment) -> Result<(), StoreError> {
        self.lock().segments.push(segment.clone());
        Ok(())
    }

    async fn delete_segment(&self, user_id: &str, segment_id: &str) -> Result<bool, StoreError> {
        let mut data = self.lock();
        let before = data.segments.len();
        data.segments
            .retain(|s| !(s.id == segment_id && s.user_id == user_id));
        let removed = data.segments.len() != before;
        if removed {
            data.segment_links.retain(|(sid, _)| sid != segment_id);
        }
        Ok(removed)
    }

    async fn segment_customers(&self, segment_id: &str) -> Result<Vec<Customer>, StoreError> {
        let data = self.lock();
        Ok(data
            .segment_links
            .iter()
            .filter(|(sid, _)| sid == segment_id)
            .filter_map(|(_, cid)| data.customers.iter().find(|c| &c.id == cid).cloned())
            .collect())
    }

    async fn link_segment_customer(
        &self,
        segment_id: &str,
        customer_id: &str,
        _at: &str,
    ) -> Result<bool, StoreError> {
        let mut data = self.lock();
        let link = (segment_id.to_string(), customer_id.to_string());
        if data.segment_links.contains(&link) {
            return Ok(false);
        }
        data.segment_links.push(link);
        Ok(true)
    }

    async fn unlink_segment_customer(
        &self,
        segment_id: &str,
        customer_id: &str,
    ) -> Result<bool, StoreError> {
        let mut data = self.lock();
        let before = data.segment_links.len();
        data.segment_links
            .retain(|(sid, cid)| !(sid == segment_id && cid == customer_id));
        Ok(data.segment_links.len() != before)
    }
}
