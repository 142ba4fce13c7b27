use std::collections::HashMap;
use std::future::Future;

use lazy_static::lazy_static;
use regex::Regex;
use teloxide::types::{ChatId, UserId};
use teloxide::utils::command::BotCommands;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::messages;
use crate::store::{Store, StoreError};
use crate::subscription::{normalize_members, MarkPaid, Subscription};
use crate::Command;

lazy_static! {
    static ref MENTION_REGEX: Regex = Regex::new(r"(?:^|[^\w@])@(\w{1,32})").unwrap();
}

/// Answers whether a user administers a chat. Supplied by the transport.
pub trait AdminCheck: Sync {
    fn is_admin(&self, chat_id: ChatId, user_id: UserId) -> impl Future<Output = bool> + Send;
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("bad arguments")]
    Usage(&'static str),
    #[error("invalid cost {0:?}")]
    InvalidCost(String),
    #[error("subscription {0:?} already exists")]
    NameTaken(String),
    #[error("command is only available in groups")]
    GroupOnly,
    #[error("subscription {0:?} not found")]
    NotFound(String),
    #[error("{member} is not a member of {subscription}")]
    NotAMember {
        subscription: String,
        member: String,
        members: Vec<String>,
    },
    #[error("not authorized to delete {0:?}")]
    NotAuthorized(String),
    #[error("couldn't save subscriptions: {0}")]
    Persistence(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct Sender {
    pub id: UserId,
    pub username: Option<String>,
    pub first_name: String,
}

impl Sender {
    /// The identifier this user goes by in member lists.
    pub fn handle(&self) -> String {
        match &self.username {
            Some(username) => username.clone(),
            None => fallback_handle(&self.first_name, self.id),
        }
    }

    fn identities(&self) -> Vec<String> {
        let mut ids = Vec::with_capacity(2);
        if let Some(username) = &self.username {
            ids.push(username.clone());
        }
        ids.push(fallback_handle(&self.first_name, self.id));
        ids
    }
}

/// Identifier for users mentioned without a username.
pub fn fallback_handle(first_name: &str, id: UserId) -> String {
    format!("{first_name}_{}", id.0)
}

#[derive(Debug, Clone)]
pub struct Context {
    pub chat_id: ChatId,
    pub is_group: bool,
    pub sender: Sender,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingCreation {
    pub name: String,
    pub total_cost: f64,
    pub creator: UserId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CreationState {
    Idle,
    AwaitingMembers(PendingCreation),
}

struct State<S> {
    store: S,
    pending: HashMap<ChatId, PendingCreation>,
}

/// Routes commands to their handlers. All store access goes through one lock,
/// so every command is a complete read-modify-write.
pub struct Router<S, A> {
    state: Mutex<State<S>>,
    admins: A,
}

impl<S: Store, A: AdminCheck> Router<S, A> {
    pub fn new(store: S, admins: A) -> Self {
        Self {
            state: Mutex::new(State {
                store,
                pending: HashMap::new(),
            }),
            admins,
        }
    }

    /// Handles a command and returns the reply, if any.
    pub async fn handle_command(&self, ctx: &Context, command: Command) -> Option<String> {
        log::info!("{}: {:?} from {}", ctx.chat_id, command, ctx.sender.handle());

        let result = match command {
            Command::Start => Ok(messages::welcome(&ctx.sender.first_name)),
            Command::Help => Ok(Command::descriptions().to_string()),
            Command::Add(args) => self.add(ctx, &args).await,
            Command::List => self.list(ctx).await,
            Command::Paid(args) => self.paid(ctx, &args).await,
            Command::Delete(args) => self.delete(ctx, &args).await,
            Command::Debug => return self.debug(ctx).await,
        };

        Some(result.unwrap_or_else(|e| {
            log::info!("{}: command rejected: {e}", ctx.chat_id);
            messages::command_error(&e)
        }))
    }

    /// Handles a plain text message. Only the creator of a pending
    /// subscription gets an answer; everything else, including commands
    /// meant for other bots, is ignored.
    pub async fn handle_text(
        &self,
        ctx: &Context,
        text: &str,
        text_mentions: &[String],
    ) -> Option<String> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let creator = state.pending.get(&ctx.chat_id)?.creator;
        if creator != ctx.sender.id || text.starts_with('/') {
            return None;
        }

        let members = normalize_members(
            extract_mentions(text).chain(text_mentions.iter().map(String::as_str)),
        );
        if members.is_empty() {
            return Some(messages::no_members_found());
        }

        let pending = state.pending.remove(&ctx.chat_id)?;
        let reply = create(&mut state.store, ctx.chat_id, pending, members)
            .unwrap_or_else(|e| messages::command_error(&e));
        Some(reply)
    }

    pub async fn creation_state(&self, chat_id: ChatId) -> CreationState {
        match self.state.lock().await.pending.get(&chat_id) {
            Some(pending) => CreationState::AwaitingMembers(pending.clone()),
            None => CreationState::Idle,
        }
    }

    async fn add(&self, ctx: &Context, args: &str) -> Result<String, CommandError> {
        require_group(ctx)?;

        let mut args = split_args(args);
        let Some(cost) = args.pop() else {
            return Err(CommandError::Usage(messages::ADD_USAGE));
        };
        if args.is_empty() {
            return Err(CommandError::Usage(messages::ADD_USAGE));
        }
        let name = args.join(" ");
        let total_cost = parse_cost(&cost)?;

        let mut state = self.state.lock().await;
        if state.store.get(ctx.chat_id, &name).is_some() {
            return Err(CommandError::NameTaken(name));
        }

        let reply = messages::awaiting_members(&name, total_cost);
        let pending = PendingCreation {
            name,
            total_cost,
            creator: ctx.sender.id,
        };
        if let Some(previous) = state.pending.insert(ctx.chat_id, pending) {
            log::info!(
                "{}: pending creation of {:?} superseded",
                ctx.chat_id,
                previous.name
            );
        }

        Ok(reply)
    }

    async fn list(&self, ctx: &Context) -> Result<String, CommandError> {
        require_group(ctx)?;

        let state = self.state.lock().await;
        Ok(messages::list_subscriptions(state.store.list(ctx.chat_id)))
    }

    async fn paid(&self, ctx: &Context, args: &str) -> Result<String, CommandError> {
        require_group(ctx)?;
        let name = name_arg(args, messages::PAID_USAGE)?;

        let mut state = self.state.lock().await;
        let sub = state
            .store
            .get_mut(ctx.chat_id, &name)
            .ok_or(CommandError::NotFound(name))?;

        let member = sub.find_member(&ctx.sender.identities()).map(str::to_string);
        let outcome = match member {
            Some(member) => sub.mark_paid(&member),
            None => MarkPaid::NotAMember,
        };

        let reply = match outcome {
            MarkPaid::NotAMember => {
                return Err(CommandError::NotAMember {
                    subscription: sub.name.clone(),
                    member: ctx.sender.handle(),
                    members: sub.members.clone(),
                })
            }
            MarkPaid::AlreadyPaid => return Ok(messages::already_paid(sub)),
            MarkPaid::Marked => messages::payment_confirmed(&ctx.sender.first_name, sub),
        };

        log::info!(
            "{}: {} paid for {}",
            ctx.chat_id,
            ctx.sender.handle(),
            sub.name
        );
        persist(&state.store)?;
        Ok(reply)
    }

    async fn delete(&self, ctx: &Context, args: &str) -> Result<String, CommandError> {
        require_group(ctx)?;
        let name = name_arg(args, messages::DELETE_USAGE)?;

        let created_by = {
            let state = self.state.lock().await;
            match state.store.get(ctx.chat_id, &name) {
                Some(sub) => sub.created_by,
                None => return Err(CommandError::NotFound(name)),
            }
        };

        if created_by != ctx.sender.id && !self.admins.is_admin(ctx.chat_id, ctx.sender.id).await
        {
            return Err(CommandError::NotAuthorized(name));
        }

        let mut state = self.state.lock().await;
        let Some(removed) = state.store.remove(ctx.chat_id, &name) else {
            return Err(CommandError::NotFound(name));
        };

        log::info!("{}: deleted {}", ctx.chat_id, removed.name);
        persist(&state.store)?;
        Ok(messages::deleted(&removed.name))
    }

    async fn debug(&self, ctx: &Context) -> Option<String> {
        if !self.admins.is_admin(ctx.chat_id, ctx.sender.id).await {
            return None;
        }

        let creation = self.creation_state(ctx.chat_id).await;
        let state = self.state.lock().await;
        Some(messages::debug_info(
            ctx,
            state.store.list(ctx.chat_id),
            state.store.total(),
            &creation,
        ))
    }
}

fn create<S: Store>(
    store: &mut S,
    chat_id: ChatId,
    pending: PendingCreation,
    members: Vec<String>,
) -> Result<String, CommandError> {
    if store.get(chat_id, &pending.name).is_some() {
        return Err(CommandError::NameTaken(pending.name));
    }

    let sub = Subscription::new(pending.name, pending.total_cost, members, pending.creator);
    let reply = messages::created(&sub);
    log::info!(
        "{chat_id}: created {} ({}) for {:?}",
        sub.name,
        sub.total_cost,
        sub.members
    );
    store.put(chat_id, sub);

    persist(store)?;
    Ok(reply)
}

fn persist<S: Store>(store: &S) -> Result<(), CommandError> {
    store.save().map_err(|e| {
        log::error!("Couldn't save subscriptions: {e}");
        CommandError::Persistence(e)
    })
}

fn require_group(ctx: &Context) -> Result<(), CommandError> {
    if ctx.is_group {
        Ok(())
    } else {
        Err(CommandError::GroupOnly)
    }
}

/// Splits shell style. Unbalanced quotes, as in `Dad's`, fall back to
/// plain whitespace splitting.
fn split_args(args: &str) -> Vec<String> {
    shlex::split(args).unwrap_or_else(|| args.split_whitespace().map(str::to_string).collect())
}

fn name_arg(args: &str, usage: &'static str) -> Result<String, CommandError> {
    let name = match shlex::split(args) {
        Some(parts) => parts.join(" "),
        None => args.trim().to_string(),
    };
    if name.is_empty() {
        return Err(CommandError::Usage(usage));
    }
    Ok(name)
}

fn parse_cost(raw: &str) -> Result<f64, CommandError> {
    let invalid = || CommandError::InvalidCost(raw.to_string());
    let cost: f64 = raw
        .strip_prefix('$')
        .unwrap_or(raw)
        .parse()
        .map_err(|_| invalid())?;

    if !cost.is_finite() || cost <= 0.0 {
        return Err(invalid());
    }
    Ok(cost)
}

fn extract_mentions(text: &str) -> impl Iterator<Item = &str> {
    MENTION_REGEX
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
}
