use crate::router::{CommandError, Context, CreationState};
use crate::subscription::Subscription;

pub const ADD_USAGE: &str = "Usage: /add <name> <total_cost>\n\nExample: /add Netflix 15.99\n\n\
     Names with spaces work too: /add \"Disney Plus\" 12";
pub const PAID_USAGE: &str =
    "Usage: /paid <subscription_name>\n\nExample: /paid Netflix\n\nUse /list to see all subscriptions.";
pub const DELETE_USAGE: &str =
    "Usage: /delete <subscription_name>\n\nExample: /delete Netflix\n\nUse /list to see all subscriptions.";

const LIST_PENDING_SHOWN: usize = 3;

pub fn money(amount: f64) -> String {
    format!("${amount:.2}")
}

fn mentions<'a>(members: impl IntoIterator<Item = &'a str>) -> String {
    members
        .into_iter()
        .map(|m| format!("@{m}"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn welcome(first_name: &str) -> String {
    format!(
        "👋 Welcome {first_name}!

I help you manage shared subscriptions and split costs with your group.

COMMANDS:
/add - Create a subscription
/list - View all subscriptions
/paid - Mark payment as done
/delete - Remove a subscription

Add me to your group and use /add to get started! 🚀

💡 I work with usernames - just mention people with @username!"
    )
}

pub fn awaiting_members(name: &str, total_cost: f64) -> String {
    format!(
        "📝 Creating subscription: {name}\n💰 Total cost: {}\n\n\
         Now mention the members (including yourself if needed).\n\n\
         Example: @john @alice @bob",
        money(total_cost)
    )
}

pub fn no_members_found() -> String {
    "❌ No members found!\n\nPlease mention the members of the subscription, e.g. @john @alice @bob"
        .to_string()
}

pub fn created(sub: &Subscription) -> String {
    let mut result = format!(
        "✅ SUBSCRIPTION CREATED!\n\n{}\n💰 Total: {}\n👥 Members ({}): {}\n💵 Per person: {}",
        sub.name,
        money(sub.total_cost),
        sub.members.len(),
        mentions(sub.members.iter().map(String::as_str)),
        money(sub.per_person())
    );

    if let Some(date) = sub.next_payment() {
        result += &format!("\n📅 Next payment: {date}");
    }

    result += &format!("\n\nMembers can mark payments: /paid {}", sub.name);
    result
}

pub fn list_subscriptions(list: &[Subscription]) -> String {
    if list.is_empty() {
        return "📭 No subscriptions yet.\n\nCreate one with: /add Netflix 15.99".to_string();
    }

    let mut result = String::from("📋 SUBSCRIPTIONS\n\n");
    for (i, sub) in list.iter().enumerate() {
        let paid = sub.members.iter().filter(|m| sub.has_paid(m)).count();

        result += &format!(
            "{}. {}\n   💰 {}/person ({} total)\n   👥 {} members | ",
            i + 1,
            sub.name,
            money(sub.per_person()),
            money(sub.total_cost),
            sub.members.len()
        );

        if sub.all_paid() {
            result += "✅ All paid\n";
        } else {
            let pending = sub.members.len() - paid;
            result += &format!(
                "⏳ {paid}/{} paid\n   Pending: {}",
                sub.members.len(),
                mentions(sub.pending().take(LIST_PENDING_SHOWN))
            );
            if pending > LIST_PENDING_SHOWN {
                result += &format!(" +{} more", pending - LIST_PENDING_SHOWN);
            }
            result += "\n";
        }

        if let Some(date) = sub.next_payment() {
            result += &format!("   📅 Next: {date}\n");
        }
        result += "\n";
    }

    let total: f64 = list.iter().map(|s| s.total_cost).sum();
    result += &format!("💳 TOTAL: {}/month", money(total));
    result
}

pub fn already_paid(sub: &Subscription) -> String {
    format!(
        "ℹ️ You have already paid for {}. Nothing changed.",
        sub.name
    )
}

pub fn payment_confirmed(first_name: &str, sub: &Subscription) -> String {
    let mut result = format!(
        "✅ PAYMENT CONFIRMED!\n\nThank you {first_name}!\n\
         Your payment for {} ({}) has been marked as paid.",
        sub.name,
        money(sub.per_person())
    );

    if sub.all_paid() {
        result += "\n\n🎉 Everyone has paid!";
    } else {
        let paid = sub.paid_by.len();
        result += &format!(
            "\n\n⏳ {paid}/{} paid. Still pending: {}",
            sub.members.len(),
            mentions(sub.pending())
        );
    }

    result
}

pub fn deleted(name: &str) -> String {
    format!(
        "🗑️ SUBSCRIPTION DELETED\n\nThe {name} subscription has been removed.\n\
         All payment records have been cleared.\n\nUse /list to see remaining subscriptions."
    )
}

pub fn debug_info(
    ctx: &Context,
    subs: &[Subscription],
    total: usize,
    creation: &CreationState,
) -> String {
    let mut result = format!(
        "DEBUG INFO:\n\nChat ID: {}\nChat Type: {}\n\nSTORED SUBSCRIPTIONS:\n",
        ctx.chat_id,
        if ctx.is_group { "group" } else { "private" }
    );

    if subs.is_empty() {
        result += "None\n";
    }
    for sub in subs {
        result += &format!("• {} (created by {})\n", sub.name, sub.created_by.0);
    }

    if let CreationState::AwaitingMembers(pending) = creation {
        result += &format!(
            "\nPending creation: {} ({})\n",
            pending.name,
            money(pending.total_cost)
        );
    }

    result += &format!("\nTotal subscriptions in DB: {total}");
    result
}

pub fn command_error(error: &CommandError) -> String {
    match error {
        CommandError::Usage(usage) => usage.to_string(),
        CommandError::InvalidCost(raw) => {
            format!("❌ Invalid cost \"{raw}\". Please enter a positive number, e.g. 15.99")
        }
        CommandError::NameTaken(name) => format!(
            "❌ A subscription named {name} already exists.\n\nPick another name or /delete {name} first."
        ),
        CommandError::GroupOnly => {
            "⚠️ This command only works in groups!\nPlease add me to a group first.".to_string()
        }
        CommandError::NotFound(name) => {
            format!("❌ Subscription '{name}' not found.\n\nUse /list to see all subscriptions.")
        }
        CommandError::NotAMember {
            subscription,
            member,
            members,
        } => format!(
            "⚠️ You're not a member of the {subscription} subscription.\n\n\
             Your username: @{member}\nMembers: {}",
            mentions(members.iter().map(String::as_str))
        ),
        CommandError::NotAuthorized(name) => format!(
            "⚠️ Only the creator of {name} or a group admin can delete it."
        ),
        CommandError::Persistence(_) => "❌ Could not save, try again.".to_string(),
    }
}
