//! Shared media queue with admission control, a playback clock, chat and
//! moderation, all observed through live fan-out topics.

pub mod bans;
pub mod chat;
pub mod config;
pub mod error;
pub mod fanout;
pub mod gate;
pub mod model;
pub mod moderation;
pub mod playback;
pub mod queue;
pub mod resolver;
pub mod routes;
pub mod state;
pub mod store;
pub mod utils {
    pub mod jwt;
    pub mod sweep;
}
