//! Teloxide transport.
//!
//! Outbound: [`TelegramNotifier`] implements the engine's `Notifier` seam.
//! Inbound: [`spawn_chat_loop`] runs the long-polling loop, filters to the
//! configured chat, and feeds message text through the dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use taroko_engine::Notifier;
use teloxide::prelude::*;
use tracing::{info, warn};

use crate::dispatcher::{CommandContext, CommandDispatcher};

/// Sends engine notifications into the configured chat.
pub struct TelegramNotifier {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, chat_id: i64) -> Self {
        Self {
            bot: Bot::new(bot_token),
            chat_id: ChatId(chat_id),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) {
        // Chat delivery failures are logged, never propagated — a Telegram
        // outage must not stall the engine loop.
        if let Err(e) = self.bot.send_message(self.chat_id, text).await {
            warn!("telegram send failed: {e}");
        }
    }
}

/// Run the inbound command loop until the process exits.
///
/// Messages from other chats are ignored; replies go back to the sender's
/// chat. The dispatcher guarantees every handled command produces a reply.
pub fn spawn_chat_loop(
    bot_token: &str,
    allowed_chat_id: i64,
    dispatcher: Arc<CommandDispatcher>,
    ctx: CommandContext,
) -> tokio::task::JoinHandle<()> {
    let bot = Bot::new(bot_token);
    info!("telegram command loop starting");

    tokio::spawn(async move {
        teloxide::repl(bot, move |bot: Bot, msg: Message| {
            let dispatcher = Arc::clone(&dispatcher);
            let ctx = ctx.clone();
            async move {
                if msg.chat.id.0 != allowed_chat_id {
                    return respond(());
                }
                let Some(text) = msg.text() else {
                    return respond(());
                };
                let reply = dispatcher.dispatch(&ctx, text).await;
                if let Err(e) = bot.send_message(msg.chat.id, reply).await {
                    warn!("telegram reply failed: {e}");
                }
                respond(())
            }
        })
        .await;
    })
}
