use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use teloxide::types::UserId;

pub const BILLING_PERIOD_DAYS: u64 = 30;

/// A shared cost record within one chat.
///
/// `name` is not part of the serialized record: the store keys records by
/// name and fills it in when loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(skip)]
    pub name: String,
    pub total_cost: f64,
    pub members: Vec<String>,
    #[serde(default)]
    pub paid_by: Vec<String>,
    pub created_by: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkPaid {
    Marked,
    AlreadyPaid,
    NotAMember,
}

impl Subscription {
    pub fn new(name: String, total_cost: f64, members: Vec<String>, created_by: UserId) -> Self {
        Self {
            name,
            total_cost,
            members,
            paid_by: Vec::new(),
            created_by,
            created_at: Some(Utc::now()),
        }
    }

    pub fn per_person(&self) -> f64 {
        if self.members.is_empty() {
            return round_cents(self.total_cost);
        }
        round_cents(self.total_cost / self.members.len() as f64)
    }

    /// Checks the record invariants: at least one member, a positive total,
    /// and only members in `paid_by`.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.members.is_empty() {
            return Err("no members");
        }
        if !self.total_cost.is_finite() || self.total_cost <= 0.0 {
            return Err("total cost is not positive");
        }
        if !self.paid_by.iter().all(|p| self.members.iter().any(|m| same_member(m, p))) {
            return Err("paid_by lists non-members");
        }
        Ok(())
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.to_lowercase()
    }

    /// Returns the stored spelling of the first member matching any of `ids`.
    pub fn find_member<'a>(&'a self, ids: &[String]) -> Option<&'a str> {
        self.members
            .iter()
            .find(|m| ids.iter().any(|id| same_member(m, id)))
            .map(String::as_str)
    }

    pub fn has_paid(&self, id: &str) -> bool {
        self.paid_by.iter().any(|m| same_member(m, id))
    }

    pub fn mark_paid(&mut self, id: &str) -> MarkPaid {
        let Some(member) = self.members.iter().find(|m| same_member(m, id)).cloned() else {
            return MarkPaid::NotAMember;
        };

        if self.has_paid(&member) {
            return MarkPaid::AlreadyPaid;
        }

        self.paid_by.push(member);
        MarkPaid::Marked
    }

    pub fn all_paid(&self) -> bool {
        self.members.iter().all(|m| self.has_paid(m))
    }

    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.members
            .iter()
            .filter(|m| !self.has_paid(m))
            .map(String::as_str)
    }

    pub fn next_payment(&self) -> Option<NaiveDate> {
        self.created_at?
            .date_naive()
            .checked_add_days(Days::new(BILLING_PERIOD_DAYS))
    }
}

/// Usernames are case-insensitive and may be written with a leading `@`.
pub fn same_member(a: &str, b: &str) -> bool {
    a.trim_start_matches('@')
        .eq_ignore_ascii_case(b.trim_start_matches('@'))
}

/// Strips `@`, drops empties and removes duplicates, keeping first occurrences.
pub fn normalize_members<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut members: Vec<String> = Vec::new();
    for m in raw {
        let m = m.as_ref().trim().trim_start_matches('@');
        if m.is_empty() || members.iter().any(|x| same_member(x, m)) {
            continue;
        }
        members.push(m.to_string());
    }
    members
}

/// Rounds to cents, ties to even.
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round_ties_even() / 100.0
}
