//! taroko-telegram
//!
//! The operator command surface. The transport (teloxide) stays behind two
//! narrow seams — [`taroko_engine::Notifier`] outbound and the dispatcher
//! inbound — so every command handler is testable without Telegram.

mod dispatcher;
mod transport;

pub use dispatcher::{
    CommandContext, CommandDispatcher, LlmSink, PgSimStats, SimStatsProvider,
};
pub use transport::{spawn_chat_loop, TelegramNotifier};
