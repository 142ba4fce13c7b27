mod config;
mod messages;
mod router;
mod store;
mod subscription;

use std::sync::Arc;

use config::Config;
use dptree::deps;
use router::{fallback_handle, AdminCheck, Context, Router, Sender};
use store::{JsonStore, Store};
use teloxide::macros::BotCommands;
use teloxide::prelude::*;
use teloxide::types::{
    ChatId, ChatMemberKind, MessageEntity, MessageEntityKind, ReplyParameters, UserId,
};

type SharedRouter = Arc<Router<JsonStore, Bot>>;

#[derive(BotCommands, Clone, Debug)]
#[command(
    rename_rule = "lowercase",
    description = "These commands are supported:"
)]
pub enum Command {
    #[command(description = "show the welcome message.")]
    Start,
    #[command(description = "show this text.")]
    Help,
    #[command(description = "create a subscription: /add <name> <total cost>")]
    Add(String),
    #[command(description = "list the subscriptions of this group.")]
    List,
    #[command(description = "mark your share as paid: /paid <name>")]
    Paid(String),
    #[command(description = "remove a subscription: /delete <name>")]
    Delete(String),
    #[command(hide)]
    Debug,
}

impl AdminCheck for Bot {
    async fn is_admin(&self, chat_id: ChatId, user_id: UserId) -> bool {
        match self.get_chat_member(chat_id, user_id).await {
            Ok(member) => matches!(
                member.kind,
                ChatMemberKind::Owner(_) | ChatMemberKind::Administrator(_)
            ),
            Err(e) => {
                log::warn!("Couldn't check admin status of {} in {chat_id}: {e}", user_id.0);
                false
            }
        }
    }
}

fn context(msg: &Message) -> Option<Context> {
    let user = msg.from.as_ref()?;
    Some(Context {
        chat_id: msg.chat.id,
        is_group: msg.chat.is_group() || msg.chat.is_supergroup(),
        sender: Sender {
            id: user.id,
            username: user.username.clone(),
            first_name: user.first_name.clone(),
        },
    })
}

/// Members mentioned by tapping a user that has no username.
fn text_mentions(entities: &[MessageEntity]) -> Vec<String> {
    entities
        .iter()
        .filter_map(|entity| match &entity.kind {
            MessageEntityKind::TextMention { user } => Some(match &user.username {
                Some(username) => username.clone(),
                None => fallback_handle(&user.first_name, user.id),
            }),
            _ => None,
        })
        .collect()
}

async fn reply(bot: &Bot, msg: &Message, text: String) {
    let result = bot
        .send_message(msg.chat.id, text)
        .reply_parameters(ReplyParameters::new(msg.id))
        .await;

    if let Err(e) = result {
        log::warn!("Couldn't send message to {}: {e}", msg.chat.id)
    }
}

async fn answer_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    router: SharedRouter,
) -> ResponseResult<()> {
    let Some(ctx) = context(&msg) else {
        return Ok(());
    };

    if let Some(text) = router.handle_command(&ctx, cmd).await {
        reply(&bot, &msg, text).await;
    }
    Ok(())
}

async fn answer_text(bot: Bot, msg: Message, router: SharedRouter) -> ResponseResult<()> {
    let (Some(ctx), Some(text)) = (context(&msg), msg.text()) else {
        return Ok(());
    };

    let mentioned = text_mentions(msg.entities().unwrap_or_default());
    if let Some(answer) = router.handle_text(&ctx, text, &mentioned).await {
        reply(&bot, &msg, answer).await;
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e}");
            eprintln!("Error: {e}. Set it in the environment or in a .env file.");
            std::process::exit(1);
        }
    };

    log::info!("Starting bot...");
    let bot = Bot::new(&config.token);
    let store = JsonStore::open(&config.data_file);
    log::info!(
        "Using {} ({} subscriptions)",
        store.path().display(),
        store.total()
    );
    let router: SharedRouter = Arc::new(Router::new(store, bot.clone()));

    let handler = Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(answer_command),
        )
        .branch(dptree::endpoint(answer_text));

    Dispatcher::builder(bot, handler)
        .dependencies(deps![router])
        .default_handler(|_| async {})
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn text_mentions_use_username_or_fallback() {
        let entities: Vec<MessageEntity> = serde_json::from_value(json!([
            {"type": "mention", "offset": 0, "length": 5},
            {
                "type": "text_mention", "offset": 6, "length": 4,
                "user": {"id": 55, "is_bot": false, "first_name": "Mary"}
            },
            {
                "type": "text_mention", "offset": 11, "length": 3,
                "user": {"id": 56, "is_bot": false, "first_name": "Tom", "username": "tom_t"}
            },
            {"type": "bold", "offset": 15, "length": 2}
        ]))
        .unwrap();

        assert_eq!(text_mentions(&entities), vec!["Mary_55", "tom_t"]);
        assert!(text_mentions(&[]).is_empty());
    }
}
