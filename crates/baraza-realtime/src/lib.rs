pub mod backend;
pub mod broker;
pub mod error;
pub mod guard;
pub mod notify;
pub mod presence;
pub mod registry;
pub mod resolver;
pub mod room;

pub use backend::Backend;
pub use broker::Broker;
pub use error::RealtimeError;
pub use notify::{NotificationDispatcher, NotificationFeed};
pub use presence::PresenceTracker;
pub use registry::{ChannelRegistry, DeliveryToken, SubscriptionHandle};
pub use resolver::ProfileResolver;
pub use room::RoomSession;
