//! Twitch payloads as strimertul publishes them.
//!
//! Chat messages keep the PascalCase field names of strimertul's chat
//! bridge.  EventSub notifications follow Twitch's snake_case schema and
//! share one envelope, [`EventSubNotification`], generic over the event body.
//!
//! Timestamps are kept as the strings the server sent.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Chat ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TwitchUser {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub color: String,
    #[serde(default)]
    pub badges: HashMap<String, u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TwitchEmote {
    pub name: String,
    #[serde(rename = "ID")]
    pub id: String,
    pub count: u32,
}

/// One chat message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TwitchChatMessage {
    pub user: TwitchUser,
    /// The raw IRC line.
    pub raw: String,
    #[serde(rename = "Type")]
    pub kind: i64,
    pub raw_type: String,
    pub tags: HashMap<String, String>,
    pub message: String,
    pub channel: String,
    #[serde(rename = "RoomID")]
    pub room_id: String,
    #[serde(rename = "ID")]
    pub id: String,
    pub time: String,
    pub emotes: Vec<TwitchEmote>,
    pub bits: u64,
    /// `/me` message.
    pub action: bool,
}

// ── EventSub envelope ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSubscription {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub created_at: String,
}

/// An EventSub notification carrying an event body of type `E`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSubNotification<E = Map<String, Value>> {
    pub subscription: EventSubscription,
    pub event: E,
}

/// Any EventSub notification, with the body left untyped.
pub type EventSubUnknownEvent = EventSubNotification;

/// An event body with a known EventSub subscription type.
pub trait EventSubKind {
    const TYPE: &'static str;
}

// ── Event bodies ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelUpdate {
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    pub broadcaster_user_name: String,
    pub title: String,
    pub language: String,
    pub category_id: String,
    pub category_name: String,
    pub is_mature: bool,
}

impl EventSubKind for ChannelUpdate {
    const TYPE: &'static str = "channel.update";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Follow {
    pub user_id: String,
    pub user_login: String,
    pub user_name: String,
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    pub broadcaster_user_name: String,
    pub followed_at: String,
}

impl EventSubKind for Follow {
    const TYPE: &'static str = "channel.follow";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: String,
    pub user_login: String,
    pub user_name: String,
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    pub broadcaster_user_name: String,
    pub tier: String,
    pub is_gift: bool,
}

impl EventSubKind for Subscription {
    const TYPE: &'static str = "channel.subscribe";
}

/// Gifted subscriptions.  The gifter is absent when anonymous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionGift {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_login: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    pub broadcaster_user_name: String,
    pub total: u32,
    pub tier: String,
    #[serde(default)]
    pub cumulative_total: Option<u32>,
    pub is_anonymous: bool,
}

impl EventSubKind for SubscriptionGift {
    const TYPE: &'static str = "channel.subscription.gift";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionMessageEmote {
    pub begin: u32,
    pub end: u32,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionMessage {
    pub text: String,
    #[serde(default)]
    pub emotes: Vec<SubscriptionMessageEmote>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resubscription {
    pub user_id: String,
    pub user_login: String,
    pub user_name: String,
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    pub broadcaster_user_name: String,
    pub tier: String,
    pub message: SubscriptionMessage,
    pub cumulative_months: u32,
    #[serde(default)]
    pub streak_months: Option<u32>,
    pub duration_months: u32,
}

impl EventSubKind for Resubscription {
    const TYPE: &'static str = "channel.subscription.message";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedeemedReward {
    pub id: String,
    pub title: String,
    pub cost: u64,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomRewardRedemption {
    pub id: String,
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    pub broadcaster_user_name: String,
    pub user_id: String,
    pub user_login: String,
    pub user_name: String,
    #[serde(default)]
    pub user_input: String,
    pub status: String,
    pub reward: RedeemedReward,
    pub redeemed_at: String,
}

impl EventSubKind for CustomRewardRedemption {
    const TYPE: &'static str = "channel.channel_points_custom_reward_redemption.add";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Raid {
    pub from_broadcaster_user_id: String,
    pub from_broadcaster_user_login: String,
    pub from_broadcaster_user_name: String,
    pub to_broadcaster_user_id: String,
    pub to_broadcaster_user_login: String,
    pub to_broadcaster_user_name: String,
    pub viewers: u64,
}

impl EventSubKind for Raid {
    const TYPE: &'static str = "channel.raid";
}

/// Bits cheered.  The cheerer is absent when anonymous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cheer {
    pub is_anonymous: bool,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_login: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    pub broadcaster_user_name: String,
    pub message: String,
    pub bits: u64,
}

impl EventSubKind for Cheer {
    const TYPE: &'static str = "channel.cheer";
}

pub type ChannelUpdateEvent = EventSubNotification<ChannelUpdate>;
pub type FollowEvent = EventSubNotification<Follow>;
pub type SubscriptionEvent = EventSubNotification<Subscription>;
pub type SubscriptionGiftEvent = EventSubNotification<SubscriptionGift>;
pub type ResubscriptionEvent = EventSubNotification<Resubscription>;
pub type CustomRewardRedemptionEvent = EventSubNotification<CustomRewardRedemption>;
pub type RaidEvent = EventSubNotification<Raid>;
pub type CheerEvent = EventSubNotification<Cheer>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_message_uses_pascal_case_fields() {
        // Arrange
        let raw = json!({
            "User": {"ID": "42", "Name": "viewer", "DisplayName": "Viewer", "Color": "#FF0000",
                     "Badges": {"subscriber": 12}},
            "Message": "hello chat",
            "Channel": "streamer",
            "RoomID": "1001",
            "ID": "msg-1",
            "Type": 1,
            "Emotes": [{"Name": "Kappa", "ID": "25", "Count": 2}],
            "Action": true
        });

        // Act
        let msg: TwitchChatMessage = serde_json::from_value(raw).unwrap();

        // Assert
        assert_eq!(msg.user.display_name, "Viewer");
        assert_eq!(msg.user.badges.get("subscriber"), Some(&12));
        assert_eq!(msg.room_id, "1001");
        assert_eq!(msg.kind, 1);
        assert_eq!(msg.emotes[0].count, 2);
        assert!(msg.action);
        assert_eq!(msg.bits, 0, "absent fields fall back to defaults");
    }

    #[test]
    fn test_anonymous_cheer_has_no_user() {
        let raw = json!({
            "subscription": {"type": "channel.cheer", "created_at": "2024-01-01T00:00:00Z"},
            "event": {
                "is_anonymous": true,
                "broadcaster_user_id": "1", "broadcaster_user_login": "s", "broadcaster_user_name": "S",
                "message": "Cheer100", "bits": 100
            }
        });

        let ev: CheerEvent = serde_json::from_value(raw).unwrap();

        assert_eq!(ev.subscription.kind, Cheer::TYPE);
        assert!(ev.event.user_id.is_none());
        assert_eq!(ev.event.bits, 100);
    }

    #[test]
    fn test_unknown_event_keeps_body_untyped() {
        let raw = json!({
            "subscription": {"type": "channel.hype_train.begin", "created_at": ""},
            "event": {"level": 2}
        });

        let ev: EventSubUnknownEvent = serde_json::from_value(raw).unwrap();

        assert_eq!(ev.subscription.kind, "channel.hype_train.begin");
        assert_eq!(ev.event.get("level"), Some(&json!(2)));
    }
}
