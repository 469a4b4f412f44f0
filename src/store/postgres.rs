use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};

use super::{DeliveryOutcome, Store, StoreError};
use crate::types::{
    Broadcast, BroadcastRecipient, Conversation, ConversationParticipant, Credentials, Customer,
    Message, MessageLog, Segment, SegmentSummary, SubscriptionLimits,
};

const CUSTOMER_COLUMNS: &str =
    "id, user_id, name, phone_number, email, company, created_at, updated_at";
const PARTICIPANT_COLUMNS: &str =
    "p.id, p.conversation_id, p.role, p.customer_id, p.user_id, p.external_user_identifier, p.created_at";
const BROADCAST_COLUMNS: &str = "id, user_id, name, message, media_url, media_type, file_name, \
     integration_id, integration_config_id, target_mode, segment_id, status, total_recipients, \
     sent_count, failed_count, error_message, created_at, updated_at, completed_at";
const RECIPIENT_COLUMNS: &str = "id, broadcast_id, customer_id, name, phone_number, status, \
     error_message, wamid, sent_at, created_at, updated_at";
const SEGMENT_COLUMNS: &str = "id, user_id, name, description, created_at, updated_at";

pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

pub(crate) fn parse_text<T>(row: &PgRow, column: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr<Err = String>,
{
    row.try_get::<String, _>(column)?
        .parse()
        .map_err(StoreError::Corrupt)
}

fn parse_customer_row(row: &PgRow) -> Result<Customer, StoreError> {
    Ok(Customer {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        phone_number: row.try_get("phone_number")?,
        email: row.try_get("email")?,
        company: row.try_get("company")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn parse_participant_row(row: &PgRow) -> Result<ConversationParticipant, StoreError> {
    Ok(ConversationParticipant {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        role: parse_text(row, "role")?,
        customer_id: row.try_get("customer_id")?,
        user_id: row.try_get("user_id")?,
        external_user_identifier: row.try_get("external_user_identifier")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_participant_id, content, media_type, \
     media_url, media_thumbnail, wamid, direction, created_at";

pub(crate) fn parse_message_row(row: &PgRow) -> Result<Message, StoreError> {
    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        sender_participant_id: row.try_get("sender_participant_id")?,
        content: row.try_get("content")?,
        media_type: row.try_get("media_type")?,
        media_url: row.try_get("media_url")?,
        media_thumbnail: row.try_get("media_thumbnail")?,
        wamid: row.try_get("wamid")?,
        direction: parse_text(row, "direction")?,
        created_at: row.try_get("created_at")?,
    })
}

fn parse_broadcast_row(row: &PgRow) -> Result<Broadcast, StoreError> {
    Ok(Broadcast {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        message: row.try_get("message")?,
        media_url: row.try_get("media_url")?,
        media_type: row.try_get("media_type")?,
        file_name: row.try_get("file_name")?,
        integration_id: row.try_get("integration_id")?,
        integration_config_id: row.try_get("integration_config_id")?,
        target_mode: row.try_get("target_mode")?,
        segment_id: row.try_get("segment_id")?,
        status: parse_text(row, "status")?,
        total_recipients: row.try_get("total_recipients")?,
        sent_count: row.try_get("sent_count")?,
        failed_count: row.try_get("failed_count")?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn parse_recipient_row(row: &PgRow) -> Result<BroadcastRecipient, StoreError> {
    Ok(BroadcastRecipient {
        id: row.try_get("id")?,
        broadcast_id: row.try_get("broadcast_id")?,
        customer_id: row.try_get("customer_id")?,
        name: row.try_get("name")?,
        phone_number: row.try_get("phone_number")?,
        status: parse_text(row, "status")?,
        error_message: row.try_get("error_message")?,
        wamid: row.try_get("wamid")?,
        sent_at: row.try_get("sent_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn parse_segment_row(row: &PgRow) -> Result<Segment, StoreError> {
    Ok(Segment {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn integration_credentials(
        &self,
        integration_config_id: &str,
    ) -> Result<Option<Credentials>, StoreError> {
        let row = sqlx::query(
            "SELECT c.id AS config_id, c.instance_name, c.token, i.id AS integration_id, \
                    i.user_id, i.api_key, i.base_url \
             FROM integration_configs c \
             JOIN integrations i ON i.id = c.integration_id \
             WHERE c.id = $1",
        )
        .bind(integration_config_id)
        .fetch_optional(&self.db)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Credentials {
            user_id: row.try_get("user_id")?,
            integration_id: row.try_get("integration_id")?,
            integration_config_id: row.try_get("config_id")?,
            api_key: row.try_get("api_key")?,
            base_url: row.try_get("base_url")?,
            instance_name: row.try_get("instance_name")?,
            instance_token: row.try_get("token")?,
        }))
    }

    async fn set_integration_status(
        &self,
        integration_config_id: &str,
        status: &str,
        at: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE integration_configs SET status = $1, updated_at = $2 WHERE id = $3")
            .bind(status)
            .bind(at)
            .bind(integration_config_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn subscription_limits(&self, user_id: &str) -> Result<SubscriptionLimits, StoreError> {
        let row = sqlx::query(
            "SELECT message_limit, blast_limit FROM subscriptions WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;
        let Some(row) = row else {
            return Ok(SubscriptionLimits::default());
        };
        Ok(SubscriptionLimits {
            message_limit: row.try_get("message_limit")?,
            blast_limit: row.try_get("blast_limit")?,
        })
    }

    async fn messages_sent(&self, user_id: &str, period: &str) -> Result<i64, StoreError> {
        let sent = sqlx::query_scalar::<_, i64>(
            "SELECT messages_sent FROM usage_counters WHERE user_id = $1 AND period = $2",
        )
        .bind(user_id)
        .bind(period)
        .fetch_optional(&self.db)
        .await?;
        Ok(sent.unwrap_or(0))
    }

    async fn increment_messages_sent(
        &self,
        user_id: &str,
        period: &str,
        by: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO usage_counters (user_id, period, messages_sent) VALUES ($1,$2,$3) \
             ON CONFLICT (user_id, period) \
             DO UPDATE SET messages_sent = usage_counters.messages_sent + EXCLUDED.messages_sent",
        )
        .bind(user_id)
        .bind(period)
        .bind(by)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn insert_message_log(&self, log: &MessageLog) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO message_logs \
             (id, user_id, integration_config_id, recipient, message_type, content, media_url, \
              status, error_message, wamid, broadcast_id, created_at, updated_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)",
        )
        .bind(&log.id)
        .bind(&log.user_id)
        .bind(&log.integration_config_id)
        .bind(&log.recipient)
        .bind(&log.message_type)
        .bind(&log.content)
        .bind(&log.media_url)
        .bind(log.status.as_str())
        .bind(&log.error_message)
        .bind(&log.wamid)
        .bind(&log.broadcast_id)
        .bind(&log.created_at)
        .bind(&log.updated_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn finish_message_log(
        &self,
        log_id: &str,
        outcome: &DeliveryOutcome,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE message_logs SET status = $1, wamid = $2, error_message = $3, updated_at = $4 \
             WHERE id = $5",
        )
        .bind(outcome.status.as_str())
        .bind(&outcome.wamid)
        .bind(&outcome.error)
        .bind(&outcome.at)
        .bind(log_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn find_customer_by_phone(
        &self,
        user_id: &str,
        candidates: &[String],
    ) -> Result<Option<Customer>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers \
             WHERE user_id = $1 \
               AND (phone_number = ANY($2) \
                    OR regexp_replace(phone_number, '[^0-9]', '', 'g') = ANY($2)) \
             ORDER BY created_at ASC LIMIT 1"
        ))
        .bind(user_id)
        .bind(candidates)
        .fetch_optional(&self.db)
        .await?;
        row.as_ref().map(parse_customer_row).transpose()
    }

    async fn customers_by_ids(
        &self,
        user_id: &str,
        ids: &[String],
    ) -> Result<Vec<Customer>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE user_id = $1 AND id = ANY($2) \
             ORDER BY created_at ASC"
        ))
        .bind(user_id)
        .bind(ids)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(parse_customer_row).collect()
    }

    async fn insert_customer(&self, customer: &Customer) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO customers (id, user_id, name, phone_number, email, company, created_at, updated_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8)",
        )
        .bind(&customer.id)
        .bind(&customer.user_id)
        .bind(&customer.name)
        .bind(&customer.phone_number)
        .bind(&customer.email)
        .bind(&customer.company)
        .bind(&customer.created_at)
        .bind(&customer.updated_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn update_customer(&self, customer: &Customer) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE customers SET name = $1, phone_number = $2, email = $3, company = $4, updated_at = $5 \
             WHERE id = $6 AND user_id = $7",
        )
        .bind(&customer.name)
        .bind(&customer.phone_number)
        .bind(&customer.email)
        .bind(&customer.company)
        .bind(&customer.updated_at)
        .bind(&customer.id)
        .bind(&customer.user_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn find_contact_participant(
        &self,
        user_id: &str,
        customer_id: Option<&str>,
        identifiers: &[String],
    ) -> Result<Option<ConversationParticipant>, StoreError> {
        if let Some(customer_id) = customer_id {
            let row = sqlx::query(&format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM conversation_participants p \
                 JOIN conversations c ON c.id = p.conversation_id \
                 WHERE c.user_id = $1 AND p.role = 'member' AND p.customer_id = $2 \
                 ORDER BY c.updated_at DESC LIMIT 1"
            ))
            .bind(user_id)
            .bind(customer_id)
            .fetch_optional(&self.db)
            .await?;
            if let Some(row) = row {
                return parse_participant_row(&row).map(Some);
            }
        }
        if identifiers.is_empty() {
            return Ok(None);
        }
        let row = sqlx::query(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM conversation_participants p \
             JOIN conversations c ON c.id = p.conversation_id \
             WHERE c.user_id = $1 AND p.role = 'member' AND p.external_user_identifier = ANY($2) \
             ORDER BY c.updated_at DESC LIMIT 1"
        ))
        .bind(user_id)
        .bind(identifiers)
        .fetch_optional(&self.db)
        .await?;
        row.as_ref().map(parse_participant_row).transpose()
    }

    async fn find_user_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Option<ConversationParticipant>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM conversation_participants p \
             WHERE p.conversation_id = $1 AND p.user_id = $2 LIMIT 1"
        ))
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;
        row.as_ref().map(parse_participant_row).transpose()
    }

    async fn insert_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO conversations (id, user_id, lead_id, integration_config_id, created_at, updated_at) \
             VALUES ($1,$2,$3,$4,$5,$6)",
        )
        .bind(&conversation.id)
        .bind(&conversation.user_id)
        .bind(&conversation.lead_id)
        .bind(&conversation.integration_config_id)
        .bind(&conversation.created_at)
        .bind(&conversation.updated_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn insert_participant(
        &self,
        participant: &ConversationParticipant,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO conversation_participants \
             (id, conversation_id, role, customer_id, user_id, external_user_identifier, created_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7)",
        )
        .bind(&participant.id)
        .bind(&participant.conversation_id)
        .bind(participant.role.as_str())
        .bind(&participant.customer_id)
        .bind(&participant.user_id)
        .bind(&participant.external_user_identifier)
        .bind(&participant.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn insert_message(&self, message: &Message) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO messages \
             (id, conversation_id, sender_participant_id, content, media_type, media_url, \
              media_thumbnail, wamid, direction, created_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)",
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(&message.sender_participant_id)
        .bind(&message.content)
        .bind(&message.media_type)
        .bind(&message.media_url)
        .bind(&message.media_thumbnail)
        .bind(&message.wamid)
        .bind(message.direction.as_str())
        .bind(&message.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn touch_conversation(&self, conversation_id: &str, at: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE conversations SET updated_at = $1 WHERE id = $2")
            .bind(at)
            .bind(conversation_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn insert_broadcast(&self, broadcast: &Broadcast) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO broadcasts ({BROADCAST_COLUMNS}) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19)"
        ))
        .bind(&broadcast.id)
        .bind(&broadcast.user_id)
        .bind(&broadcast.name)
        .bind(&broadcast.message)
        .bind(&broadcast.media_url)
        .bind(&broadcast.media_type)
        .bind(&broadcast.file_name)
        .bind(&broadcast.integration_id)
        .bind(&broadcast.integration_config_id)
        .bind(&broadcast.target_mode)
        .bind(&broadcast.segment_id)
        .bind(broadcast.status.as_str())
        .bind(broadcast.total_recipients)
        .bind(broadcast.sent_count)
        .bind(broadcast.failed_count)
        .bind(&broadcast.error_message)
        .bind(&broadcast.created_at)
        .bind(&broadcast.updated_at)
        .bind(&broadcast.completed_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn get_broadcast(&self, broadcast_id: &str) -> Result<Option<Broadcast>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {BROADCAST_COLUMNS} FROM broadcasts WHERE id = $1"
        ))
        .bind(broadcast_id)
        .fetch_optional(&self.db)
        .await?;
        row.as_ref().map(parse_broadcast_row).transpose()
    }

    async fn list_broadcasts(&self, user_id: &str) -> Result<Vec<Broadcast>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {BROADCAST_COLUMNS} FROM broadcasts WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(parse_broadcast_row).collect()
    }

    async fn update_broadcast(&self, broadcast: &Broadcast) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE broadcasts SET status = $1, total_recipients = $2, sent_count = $3, \
             failed_count = $4, error_message = $5, updated_at = $6, completed_at = $7 \
             WHERE id = $8",
        )
        .bind(broadcast.status.as_str())
        .bind(broadcast.total_recipients)
        .bind(broadcast.sent_count)
        .bind(broadcast.failed_count)
        .bind(&broadcast.error_message)
        .bind(&broadcast.updated_at)
        .bind(&broadcast.completed_at)
        .bind(&broadcast.id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn insert_recipients(
        &self,
        recipients: &[BroadcastRecipient],
    ) -> Result<(), StoreError> {
        for (position, recipient) in recipients.iter().enumerate() {
            sqlx::query(&format!(
                "INSERT INTO broadcast_recipients ({RECIPIENT_COLUMNS}, position) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)"
            ))
            .bind(&recipient.id)
            .bind(&recipient.broadcast_id)
            .bind(&recipient.customer_id)
            .bind(&recipient.name)
            .bind(&recipient.phone_number)
            .bind(recipient.status.as_str())
            .bind(&recipient.error_message)
            .bind(&recipient.wamid)
            .bind(&recipient.sent_at)
            .bind(&recipient.created_at)
            .bind(&recipient.updated_at)
            .bind(position as i32)
            .execute(&self.db)
            .await?;
        }
        Ok(())
    }

    async fn update_recipient(&self, recipient: &BroadcastRecipient) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE broadcast_recipients SET status = $1, error_message = $2, wamid = $3, \
             sent_at = $4, updated_at = $5 WHERE id = $6",
        )
        .bind(recipient.status.as_str())
        .bind(&recipient.error_message)
        .bind(&recipient.wamid)
        .bind(&recipient.sent_at)
        .bind(&recipient.updated_at)
        .bind(&recipient.id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn broadcast_recipients(
        &self,
        broadcast_id: &str,
    ) -> Result<Vec<BroadcastRecipient>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RECIPIENT_COLUMNS} FROM broadcast_recipients WHERE broadcast_id = $1 \
             ORDER BY position ASC"
        ))
        .bind(broadcast_id)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(parse_recipient_row).collect()
    }

    async fn blacklisted_numbers(
        &self,
        user_id: &str,
        phones: &[String],
    ) -> Result<HashSet<String>, StoreError> {
        if phones.is_empty() {
            return Ok(HashSet::new());
        }
        let digits = sqlx::query_scalar::<_, String>(
            "SELECT regexp_replace(phone_number, '[^0-9]', '', 'g') FROM blacklist \
             WHERE user_id = $1 AND regexp_replace(phone_number, '[^0-9]', '', 'g') = ANY($2)",
        )
        .bind(user_id)
        .bind(phones)
        .fetch_all(&self.db)
        .await?;
        Ok(digits.into_iter().collect())
    }

    async fn list_segments(&self, user_id: &str) -> Result<Vec<SegmentSummary>, StoreError> {
        let rows = sqlx::query(
            "SELECT s.id, s.user_id, s.name, s.description, s.created_at, s.updated_at, \
                    (SELECT COUNT(*) FROM segment_contacts sc WHERE sc.segment_id = s.id) AS contact_count \
             FROM segments s WHERE s.user_id = $1 ORDER BY s.created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(SegmentSummary {
                    segment: parse_segment_row(row)?,
                    contact_count: row.try_get("contact_count")?,
                })
            })
            .collect()
    }

    async fn get_segment(
        &self,
        user_id: &str,
        segment_id: &str,
    ) -> Result<Option<Segment>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SEGMENT_COLUMNS} FROM segments WHERE id = $1 AND user_id = $2"
        ))
        .bind(segment_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;
        row.as_ref().map(parse_segment_row).transpose()
    }

    async fn insert_segment(&self, segment: &Segment) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO segments ({SEGMENT_COLUMNS}) VALUES ($1,$2,$3,$4,$5,$6)"
        ))
        .bind(&segment.id)
        .bind(&segment.user_id)
        .bind(&segment.name)
        .bind(&segment.description)
        .bind(&segment.created_at)
        .bind(&segment.updated_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn delete_segment(&self, user_id: &str, segment_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM segments WHERE id = $1 AND user_id = $2")
            .bind(segment_id)
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn segment_customers(&self, segment_id: &str) -> Result<Vec<Customer>, StoreError> {
        let rows = sqlx::query(
            "SELECT c.id, c.user_id, c.name, c.phone_number, c.email, c.company, c.created_at, c.updated_at \
             FROM segment_contacts sc JOIN customers c ON c.id = sc.customer_id \
             WHERE sc.segment_id = $1 ORDER BY sc.created_at ASC, c.id ASC",
        )
        .bind(segment_id)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(parse_customer_row).collect()
    }

    async fn link_segment_customer(
        &self,
        segment_id: &str,
        customer_id: &str,
        at: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO segment_contacts (segment_id, customer_id, created_at) VALUES ($1,$2,$3) \
             ON CONFLICT (segment_id, customer_id) DO NOTHING",
        )
        .bind(segment_id)
        .bind(customer_id)
        .bind(at)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn unlink_segment_customer(
        &self,
        segment_id: &str,
        customer_id: &str,
    ) -> Result<bool, StoreError> {
        let result =
            sqlx::query("DELETE FROM segment_contacts WHERE segment_id = $1 AND customer_id = $2")
                .bind(segment_id)
                .bind(customer_id)
                .execute(&self.db)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}
