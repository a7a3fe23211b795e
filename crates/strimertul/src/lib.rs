//! # strimertul
//!
//! Typed access to a strimertul instance over Kilovolt.
//!
//! ```text
//! Strimertul
//!   ├── twitch.chat     chat messages in, chat messages out
//!   ├── twitch.event    EventSub notifications (follows, subs, raids, ...)
//!   ├── loyalty         loyalty reward redeems
//!   └── kv()            the raw kilovolt::Kilovolt client
//! ```
//!
//! ```rust,no_run
//! use strimertul::{Strimertul, StrimertulOptions};
//!
//! # async fn demo() -> kilovolt::Result<()> {
//! let client = Strimertul::new(StrimertulOptions::default());
//! client.connect().await?;
//! client
//!     .twitch
//!     .chat
//!     .on_message(|msg| println!("{}: {}", msg.user.display_name, msg.message))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
mod listener;
pub mod loyalty;
pub mod twitch;

pub use client::{Strimertul, StrimertulOptions};
pub use loyalty::Loyalty;
pub use twitch::{Chat, EventSub, Twitch};
