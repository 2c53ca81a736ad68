//! Messaging channels: the personal-account bot and the Official Account
//! webhook.

mod bot;
mod bridge;
mod handler;
mod zalo_oa;

pub use bot::*;
pub use bridge::*;
pub use handler::*;
pub use zalo_oa::*;
