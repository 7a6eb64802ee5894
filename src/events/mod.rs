//! Job event registration and delivery

pub mod bus;

pub use bus::{DeliveryStatus, EventBus, EventHandler, EventPublisher, ListenerRegistry};
