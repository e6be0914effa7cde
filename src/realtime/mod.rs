pub mod feeds;
pub mod hub;
pub mod lifecycle;

pub use hub::{Cancel, Health, Live, LiveQueryHub, MergedSubscription, Snapshot, Subscription};
pub use lifecycle::SubscriptionManager;
