//! Twitch chat and EventSub accessors.
//!
//! Every `on_*` method subscribes a typed listener and returns the
//! registered [`PushHandler`]; pass it to [`Kilovolt::unsubscribe_key`]
//! to stop listening.

pub mod types;

use serde::de::DeserializeOwned;

use kilovolt::{Kilovolt, PushHandler, Result};

use crate::listener::{event_sub_handler, json_handler, listen};
use types::{
    ChannelUpdateEvent, CheerEvent, CustomRewardRedemptionEvent, EventSubKind, EventSubNotification,
    EventSubUnknownEvent, FollowEvent, RaidEvent, ResubscriptionEvent, SubscriptionEvent,
    SubscriptionGiftEvent, TwitchChatMessage,
};

/// Key carrying every chat message.
pub const CHAT_MESSAGE_KEY: &str = "twitch/ev/chat-message";
/// Writing to this key makes the bot send a chat message.
pub const SEND_CHAT_MESSAGE_KEY: &str = "twitch/@send-chat-message";
/// Key carrying every EventSub notification.
pub const EVENTSUB_EVENT_KEY: &str = "twitch/ev/eventsub-event";

/// Twitch-related functions.
#[derive(Clone)]
pub struct Twitch {
    pub chat: Chat,
    pub event: EventSub,
}

impl Twitch {
    pub fn new(kv: Kilovolt) -> Self {
        Self {
            chat: Chat { kv: kv.clone() },
            event: EventSub { kv },
        }
    }
}

// ── Chat ──────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Chat {
    kv: Kilovolt,
}

impl Chat {
    /// Calls `callback` for each new chat message.
    pub async fn on_message<F>(&self, callback: F) -> Result<PushHandler>
    where
        F: Fn(TwitchChatMessage) + Send + Sync + 'static,
    {
        listen(&self.kv, CHAT_MESSAGE_KEY, json_handler(callback)).await
    }

    /// Writes a plain text message to chat.  Emotes are supported.
    pub async fn write_message(&self, message: &str) -> Result<()> {
        self.kv.put_key(SEND_CHAT_MESSAGE_KEY, message).await
    }
}

// ── EventSub ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct EventSub {
    kv: Kilovolt,
}

impl EventSub {
    /// Catch-all listener for every EventSub notification.
    pub async fn on_event_sub_event<F>(&self, callback: F) -> Result<PushHandler>
    where
        F: Fn(EventSubUnknownEvent) + Send + Sync + 'static,
    {
        listen(&self.kv, EVENTSUB_EVENT_KEY, json_handler(callback)).await
    }

    async fn on_kind<E, F>(&self, callback: F) -> Result<PushHandler>
    where
        E: EventSubKind + DeserializeOwned,
        F: Fn(EventSubNotification<E>) + Send + Sync + 'static,
    {
        listen(
            &self.kv,
            EVENTSUB_EVENT_KEY,
            event_sub_handler(E::TYPE, callback),
        )
        .await
    }

    /// Channel point rewards being redeemed.
    pub async fn on_redeem<F>(&self, callback: F) -> Result<PushHandler>
    where
        F: Fn(CustomRewardRedemptionEvent) + Send + Sync + 'static,
    {
        self.on_kind(callback).await
    }

    pub async fn on_new_follow<F>(&self, callback: F) -> Result<PushHandler>
    where
        F: Fn(FollowEvent) + Send + Sync + 'static,
    {
        self.on_kind(callback).await
    }

    /// First-time subscriptions.
    pub async fn on_new_subscription<F>(&self, callback: F) -> Result<PushHandler>
    where
        F: Fn(SubscriptionEvent) + Send + Sync + 'static,
    {
        self.on_kind(callback).await
    }

    pub async fn on_gifted_subscription<F>(&self, callback: F) -> Result<PushHandler>
    where
        F: Fn(SubscriptionGiftEvent) + Send + Sync + 'static,
    {
        self.on_kind(callback).await
    }

    /// Renewed subscriptions shared in chat.
    pub async fn on_resubscription<F>(&self, callback: F) -> Result<PushHandler>
    where
        F: Fn(ResubscriptionEvent) + Send + Sync + 'static,
    {
        self.on_kind(callback).await
    }

    /// Title or category changes.
    pub async fn on_channel_update<F>(&self, callback: F) -> Result<PushHandler>
    where
        F: Fn(ChannelUpdateEvent) + Send + Sync + 'static,
    {
        self.on_kind(callback).await
    }

    pub async fn on_cheer<F>(&self, callback: F) -> Result<PushHandler>
    where
        F: Fn(CheerEvent) + Send + Sync + 'static,
    {
        self.on_kind(callback).await
    }

    /// Incoming raids.
    pub async fn on_raid<F>(&self, callback: F) -> Result<PushHandler>
    where
        F: Fn(RaidEvent) + Send + Sync + 'static,
    {
        self.on_kind(callback).await
    }
}
