//! Chat platform boundary: the outbound trait, its Discord implementation,
//! the inbound gateway and the rate-limit aware outbound wrapper.

pub mod discord;
pub mod discord_gateway;
pub mod error;
pub mod outbound;
pub mod retry;
#[cfg(test)]
pub(crate) mod testing;
pub mod traits;

pub use discord::DiscordClient;
pub use discord_gateway::DiscordGateway;
pub use error::{PlatformError, RateLimitScope};
pub use outbound::Outbound;
pub use retry::{RateLimitHint, RateLimitSignal, RetryPolicy, SuspendGate};
pub use traits::{ChatPlatform, GuildRole, InboundMessage};
