//! Notification and aggregate-counter reconciliation.
//!
//! Every recognized event applies a narrow patch to exactly the cached
//! entity it concerns. Nothing here ever refetches or replaces a whole
//! collection: a full refetch would clobber concurrently-held local
//! edits elsewhere in the cache (a half-written draft, an open form).

use tracing::{debug, trace};

use murmur_shared::protocol::{
    AvatarPurchase, CoinBalance, CoinPurchase, KarmaUpdate, NotificationPayload, PaymentCompleted,
    ProfileUpdate, StatusChange, SubscriptionChange, SubthreadDeleted, SubthreadInfo,
    SubthreadMembership, ThemeChange,
};
use murmur_shared::ServerEvent;

use crate::models::{Notification, SubthreadSummary};
use crate::store::{CacheStore, StoreTopic};

pub struct NotificationReconciler;

impl NotificationReconciler {
    pub fn new() -> Self {
        Self
    }

    /// Route one event to its patch. Events this reconciler does not
    /// recognize fall through silently.
    pub fn apply(&self, store: &mut CacheStore, event: &ServerEvent) {
        match event {
            ServerEvent::Notification(payload) => self.push_notification(store, payload),
            ServerEvent::ProfileUpdated(update) => self.patch_profile(store, update),
            ServerEvent::UserStatusChanged(change) => self.patch_status(store, change),
            ServerEvent::ThemeChanged(change) => self.patch_theme(store, change),
            ServerEvent::KarmaUpdated(update) => self.patch_karma(store, update),
            ServerEvent::CoinBalanceUpdated(balance) => self.patch_balance(store, balance),
            ServerEvent::CoinPurchaseComplete(purchase) => self.apply_purchase(store, purchase),
            ServerEvent::AvatarPurchased(purchase) => self.apply_avatar(store, purchase),
            ServerEvent::SubthreadJoined(membership) => {
                self.bump_subscribers(store, membership, 1)
            }
            ServerEvent::SubthreadLeft(membership) => {
                self.bump_subscribers(store, membership, -1)
            }
            ServerEvent::SubthreadCreated(info) | ServerEvent::SubthreadUpdated(info) => {
                self.upsert_subthread(store, info)
            }
            ServerEvent::SubthreadDeleted(deleted) => self.remove_subthread(store, deleted),
            ServerEvent::UserSubscriptionChanged(change)
            | ServerEvent::SubscriptionPurchased(change) => self.patch_subscription(store, change),
            ServerEvent::PaymentCompleted(payment) => self.apply_payment(store, payment),
            other => trace!(kind = ?other.kind(), "Not a notification/counter event, ignoring"),
        }
    }

    fn push_notification(&self, store: &mut CacheStore, payload: &NotificationPayload) {
        store.push_notification(Notification {
            kind: payload.kind.clone(),
            title: payload.title.clone(),
            body: payload.body.clone(),
            link: payload.link.clone(),
            sender: payload.sender.clone(),
            created_at: payload.created_at,
            read: false,
        });
        store.notify(StoreTopic::Notifications);
    }

    /// Mark the whole ring read (the user opened the notification tray).
    pub fn mark_all_read(&self, store: &mut CacheStore) {
        store.mark_notifications_read();
        store.notify(StoreTopic::Notifications);
    }

    fn patch_profile(&self, store: &mut CacheStore, update: &ProfileUpdate) {
        let profile = store.profile_entry(&update.user);
        if let Some(avatar) = &update.avatar {
            profile.avatar = Some(avatar.clone());
        }
        if let Some(bio) = &update.bio {
            profile.bio = Some(bio.clone());
        }
        store.notify(StoreTopic::Profile(update.user.clone()));
    }

    fn patch_status(&self, store: &mut CacheStore, change: &StatusChange) {
        store.profile_entry(&change.user).online = Some(change.online);
        store.notify(StoreTopic::Profile(change.user.clone()));
    }

    fn patch_theme(&self, store: &mut CacheStore, change: &ThemeChange) {
        store.profile_entry(&change.user).theme = Some(change.theme.clone());
        store.notify(StoreTopic::Profile(change.user.clone()));
    }

    fn patch_karma(&self, store: &mut CacheStore, update: &KarmaUpdate) {
        store.profile_entry(&update.user).karma = Some(update.karma);
        store.notify(StoreTopic::Profile(update.user.clone()));
    }

    fn patch_balance(&self, store: &mut CacheStore, balance: &CoinBalance) {
        store.profile_entry(&balance.user).coin_balance = Some(balance.balance);
        store.notify(StoreTopic::Profile(balance.user.clone()));
    }

    fn apply_purchase(&self, store: &mut CacheStore, purchase: &CoinPurchase) {
        debug!(user = %purchase.user, amount = purchase.amount, "Coin purchase complete");
        store.profile_entry(&purchase.user).coin_balance = Some(purchase.balance);
        store.notify(StoreTopic::Profile(purchase.user.clone()));
    }

    fn apply_avatar(&self, store: &mut CacheStore, purchase: &AvatarPurchase) {
        let profile = store.profile_entry(&purchase.user);
        profile.avatar = Some(purchase.avatar_id.to_string());
        if let Some(balance) = purchase.balance {
            profile.coin_balance = Some(balance);
        }
        store.notify(StoreTopic::Profile(purchase.user.clone()));
    }

    /// Adjust a subthread's subscriber count in place, clamped at zero.
    /// Unknown subthreads are a no-op (the sidebar never loaded them).
    fn bump_subscribers(&self, store: &mut CacheStore, membership: &SubthreadMembership, delta: i64) {
        let Some(subthread) = store.subthread_mut(membership.subthread_id) else {
            trace!(
                subthread = membership.subthread_id,
                "Membership event for unloaded subthread, ignoring"
            );
            return;
        };
        subthread.subscriber_count = if delta >= 0 {
            subthread.subscriber_count.saturating_add(delta as u64)
        } else {
            subthread.subscriber_count.saturating_sub(delta.unsigned_abs())
        };
        store.notify(StoreTopic::Subthread(membership.subthread_id));
    }

    fn upsert_subthread(&self, store: &mut CacheStore, info: &SubthreadInfo) {
        // Preserve the live count on updates that do not carry one.
        let existing_count = store
            .subthread(info.subthread_id)
            .map(|s| s.subscriber_count);
        store.upsert_subthread(SubthreadSummary {
            subthread_id: info.subthread_id,
            name: info.name.clone(),
            description: info.description.clone(),
            subscriber_count: info
                .subscriber_count
                .or(existing_count)
                .unwrap_or(0),
        });
        store.notify(StoreTopic::Subthread(info.subthread_id));
    }

    fn remove_subthread(&self, store: &mut CacheStore, deleted: &SubthreadDeleted) {
        if store.remove_subthread(deleted.subthread_id) {
            store.notify(StoreTopic::Subthread(deleted.subthread_id));
        }
    }

    fn patch_subscription(&self, store: &mut CacheStore, change: &SubscriptionChange) {
        store.profile_entry(&change.user).premium = Some(change.active);
        store.notify(StoreTopic::Profile(change.user.clone()));
    }

    fn apply_payment(&self, store: &mut CacheStore, payment: &PaymentCompleted) {
        if let Some(balance) = payment.balance {
            store.profile_entry(&payment.user).coin_balance = Some(balance);
            store.notify(StoreTopic::Profile(payment.user.clone()));
        }
    }
}

impl Default for NotificationReconciler {
    fn default() -> Self {
        Self::new()
    }
}
