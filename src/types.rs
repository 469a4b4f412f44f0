use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub phone_number: String,
    pub email: String,
    pub company: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub lead_id: Option<String>,
    pub integration_config_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Admin,
    Member,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationParticipant {
    pub id: String,
    pub conversation_id: String,
    pub role: ParticipantRole,
    pub customer_id: Option<String>,
    pub user_id: Option<String>,
    /// Phone number or WhatsApp JID of a contact that has no customer row.
    pub external_user_identifier: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_participant_id: String,
    pub content: String,
    pub media_type: Option<String>,
    pub media_url: Option<String>,
    pub media_thumbnail: Option<String>,
    pub wamid: Option<String>,
    pub direction: MessageDirection,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

/// One outbound send attempt, kept apart from the conversation view for billing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageLog {
    pub id: String,
    pub user_id: String,
    pub integration_config_id: String,
    pub recipient: String,
    pub message_type: String,
    pub content: String,
    pub media_url: Option<String>,
    pub status: DeliveryStatus,
    pub error_message: Option<String>,
    pub wamid: Option<String>,
    pub broadcast_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastStatus {
    Pending,
    Sending,
    Completed,
    PartialCompletion,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Broadcast {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub message: String,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
    pub file_name: Option<String>,
    pub integration_id: String,
    pub integration_config_id: String,
    pub target_mode: String,
    pub segment_id: Option<String>,
    pub status: BroadcastStatus,
    pub total_recipients: i64,
    pub sent_count: i64,
    pub failed_count: i64,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRecipient {
    pub id: String,
    pub broadcast_id: String,
    pub customer_id: Option<String>,
    pub name: String,
    pub phone_number: String,
    pub status: DeliveryStatus,
    pub error_message: Option<String>,
    pub wamid: Option<String>,
    pub sent_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentSummary {
    #[serde(flatten)]
    pub segment: Segment,
    pub contact_count: i64,
}

/// Plan limits for one account. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionLimits {
    pub message_limit: Option<i64>,
    pub blast_limit: Option<i64>,
}

/// Gateway connection details resolved from an integration config id.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user_id: String,
    pub integration_id: String,
    pub integration_config_id: String,
    pub api_key: String,
    pub base_url: String,
    pub instance_name: String,
    pub instance_token: String,
}

macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!(
                        "unknown {} '{}'",
                        stringify!($ty),
                        other
                    )),
                }
            }
        }
    };
}

text_enum!(ParticipantRole { Admin => "admin", Member => "member" });
text_enum!(MessageDirection { Inbound => "inbound", Outbound => "outbound" });
text_enum!(DeliveryStatus { Pending => "pending", Sent => "sent", Failed => "failed" });
text_enum!(BroadcastStatus {
    Pending => "pending",
    Sending => "sending",
    Completed => "completed",
    PartialCompletion => "partial_completion",
    Failed => "failed",
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text_round_trips_through_database_form() {
        for status in [
            BroadcastStatus::Pending,
            BroadcastStatus::Sending,
            BroadcastStatus::Completed,
            BroadcastStatus::PartialCompletion,
            BroadcastStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<BroadcastStatus>(), Ok(status));
        }
        assert!("done".parse::<DeliveryStatus>().is_err());
    }

    #[test]
    fn test_serde_matches_database_text() {
        let json = serde_json::to_value(BroadcastStatus::PartialCompletion).unwrap();
        assert_eq!(json, serde_json::json!("partial_completion"));
    }
}
