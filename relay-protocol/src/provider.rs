use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Which third-party provider a webhook endpoint expects callbacks from.
///
/// Drives which verifier `edge::signature` picks for an inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProviderType {
    Stripe,
    Github,
    Telegram,
    Generic,
    Custom,
}
