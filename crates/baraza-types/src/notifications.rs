use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Closed set of notification origins. Adding a variant forces every
/// exhaustive match below to be revisited at compile time — no stringly
/// typed fallthrough to a default icon or category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    ChatMessage,
    ChatMention,
    ChatReply,
    BlogComment,
    BlogMention,
    VolunteerOpportunity,
    VolunteerApplication,
    BillUpdate,
    CampaignUpdate,
    DiscussionReply,
    System,
    Moderation,
}

impl SourceType {
    /// Stable column value, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChatMessage => "chat_message",
            Self::ChatMention => "chat_mention",
            Self::ChatReply => "chat_reply",
            Self::BlogComment => "blog_comment",
            Self::BlogMention => "blog_mention",
            Self::VolunteerOpportunity => "volunteer_opportunity",
            Self::VolunteerApplication => "volunteer_application",
            Self::BillUpdate => "bill_update",
            Self::CampaignUpdate => "campaign_update",
            Self::DiscussionReply => "discussion_reply",
            Self::System => "system",
            Self::Moderation => "moderation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "chat_message" => Self::ChatMessage,
            "chat_mention" => Self::ChatMention,
            "chat_reply" => Self::ChatReply,
            "blog_comment" => Self::BlogComment,
            "blog_mention" => Self::BlogMention,
            "volunteer_opportunity" => Self::VolunteerOpportunity,
            "volunteer_application" => Self::VolunteerApplication,
            "bill_update" => Self::BillUpdate,
            "campaign_update" => Self::CampaignUpdate,
            "discussion_reply" => Self::DiscussionReply,
            "system" => Self::System,
            "moderation" => Self::Moderation,
            _ => return None,
        })
    }

    /// Icon name for the rendering layer.
    pub fn icon(self) -> &'static str {
        match self {
            Self::ChatMessage | Self::ChatMention | Self::ChatReply => "MessageSquare",
            Self::BlogComment | Self::BlogMention => "PenTool",
            Self::VolunteerOpportunity | Self::VolunteerApplication => "Heart",
            Self::BillUpdate => "FileText",
            Self::CampaignUpdate => "TrendingUp",
            Self::DiscussionReply => "MessageCircle",
            Self::Moderation => "Shield",
            Self::System => "Bell",
        }
    }

    /// Category a notification lands in when the creator does not pick one.
    pub fn default_category(self) -> &'static str {
        match self {
            Self::ChatMessage | Self::ChatMention | Self::ChatReply => "chat",
            Self::BlogComment | Self::BlogMention => "content",
            Self::VolunteerOpportunity | Self::VolunteerApplication => "volunteer",
            Self::BillUpdate | Self::CampaignUpdate => "civic",
            Self::DiscussionReply => "discussion",
            Self::System | Self::Moderation => "system",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "low" => Self::Low,
            "normal" => Self::Normal,
            "high" => Self::High,
            "urgent" => Self::Urgent,
            _ => return None,
        })
    }

    /// Accent color for the rendering layer.
    pub fn color(self) -> &'static str {
        match self {
            Self::Urgent => "red",
            Self::High => "amber",
            Self::Normal => "primary",
            Self::Low => "muted",
        }
    }
}

/// A persisted user notification. Created in the unread/active state and
/// mutated only through the read / archive / dismiss transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub source_type: SourceType,
    pub source_id: Option<String>,
    pub actor_id: Option<Uuid>,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub image_url: Option<String>,
    pub metadata: Value,
    pub priority: Priority,
    pub category: String,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub is_archived: bool,
    pub archived_at: Option<DateTime<Utc>>,
    pub is_dismissed: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Optional fields accepted by `create`. Everything not set here gets the
/// initial-state defaults.
#[derive(Debug, Clone, Default)]
pub struct NotificationDraft {
    pub source_id: Option<String>,
    pub actor_id: Option<Uuid>,
    pub link: Option<String>,
    pub image_url: Option<String>,
    pub priority: Priority,
    pub metadata: Option<Value>,
    pub category: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Filters accepted by `list`. Archived notifications are always excluded;
/// these narrow the remainder.
#[derive(Debug, Clone, Default)]
pub struct NotificationFilters {
    pub is_read: Option<bool>,
    pub source_type: Option<SourceType>,
    pub priority: Option<Priority>,
    pub category: Option<String>,
    pub limit: Option<u32>,
}
