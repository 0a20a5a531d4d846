pub mod message;
pub mod provider;

pub use message::{DeliveryOutcome, EdgeMessage, HubMessage};
pub use provider::ProviderType;
