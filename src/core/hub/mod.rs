mod client;
#[allow(clippy::module_inception)]
mod hub;
mod message;

pub use hub::{Hub, HubHandle, MAX_INBOUND_FRAME};
pub use message::{Envelope, HeartbeatData, MessageType, PingData, PongData, SubscribeData};
