//! Loyalty system accessor.

pub mod types;

use kilovolt::{Kilovolt, PushHandler, Result};

use crate::listener::{json_handler, listen};
use types::Redeem;

/// Key carrying every loyalty redeem.
pub const NEW_REDEEM_KEY: &str = "loyalty/ev/new-redeem";

#[derive(Clone)]
pub struct Loyalty {
    kv: Kilovolt,
}

impl Loyalty {
    pub fn new(kv: Kilovolt) -> Self {
        Self { kv }
    }

    /// Calls `callback` whenever someone redeems a reward.
    pub async fn on_redeem<F>(&self, callback: F) -> Result<PushHandler>
    where
        F: Fn(Redeem) + Send + Sync + 'static,
    {
        listen(&self.kv, NEW_REDEEM_KEY, json_handler(callback)).await
    }
}
