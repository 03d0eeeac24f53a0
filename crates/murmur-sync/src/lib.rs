//! # murmur-sync
//!
//! The reconciliation half of the realtime core: an observable
//! in-memory cache, the typed event dispatcher, and the reconcilers
//! that merge server-pushed chat/notification/counter events into the
//! cache without clobbering unrelated local state.

pub mod chat;
pub mod counters;
pub mod dispatcher;
pub mod models;
pub mod scroll;
pub mod store;

mod error;

pub use chat::{Applied, ChatReconciler};
pub use counters::NotificationReconciler;
pub use dispatcher::{EventDispatcher, HandlerId};
pub use error::SyncError;
pub use models::*;
pub use scroll::{ScrollAction, ScrollController};
pub use store::{CacheStore, StoreTopic, SubscriptionId};
