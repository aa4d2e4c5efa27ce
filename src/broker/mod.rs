pub mod meta;
pub mod router;
pub mod session;

pub use meta::{MetaSurface, TopicRole};
pub use router::{MessageRouter, RoutedMessage};
pub use session::{BrokerEvent, BrokerSession, ConnectionState};
