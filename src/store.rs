use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use teloxide::types::ChatId;
use thiserror::Error;

use crate::subscription::Subscription;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Chat-scoped subscription storage.
///
/// Lookups by name are case-insensitive. `list` yields subscriptions in
/// insertion order.
pub trait Store: Send {
    /// Replaces the in-memory state with the persisted one. Never fails:
    /// missing or unreadable data yields an empty store.
    fn load(&mut self);
    fn save(&self) -> Result<(), StoreError>;
    fn get(&self, chat_id: ChatId, name: &str) -> Option<&Subscription>;
    fn get_mut(&mut self, chat_id: ChatId, name: &str) -> Option<&mut Subscription>;
    /// Inserts, or overwrites a subscription with the same name in place.
    fn put(&mut self, chat_id: ChatId, subscription: Subscription);
    fn remove(&mut self, chat_id: ChatId, name: &str) -> Option<Subscription>;
    fn list(&self, chat_id: ChatId) -> &[Subscription];
    /// Number of subscriptions across all chats.
    fn total(&self) -> usize;
}

/// Subscriptions of one chat, serialized as a JSON object keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatSubscriptions(Vec<Subscription>);

impl ChatSubscriptions {
    fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|s| s.has_name(name))
    }

    fn put(&mut self, subscription: Subscription) {
        match self.position(&subscription.name) {
            Some(i) => self.0[i] = subscription,
            None => self.0.push(subscription),
        }
    }
}

impl Serialize for ChatSubscriptions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for sub in &self.0 {
            map.serialize_entry(&sub.name, sub)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ChatSubscriptions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SubscriptionsVisitor;

        impl<'de> Visitor<'de> for SubscriptionsVisitor {
            type Value = ChatSubscriptions;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of subscription names to subscriptions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut subs = ChatSubscriptions::default();
                while let Some((name, mut sub)) = access.next_entry::<String, Subscription>()? {
                    if let Err(reason) = sub.validate() {
                        log::warn!("Skipping stored subscription {name:?}: {reason}");
                        continue;
                    }
                    sub.name = name;
                    subs.put(sub);
                }
                Ok(subs)
            }
        }

        deserializer.deserialize_map(SubscriptionsVisitor)
    }
}

/// The full persisted state: chat id → subscription name → subscription.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    chats: BTreeMap<i64, ChatSubscriptions>,
}

impl Snapshot {
    fn chat(&self, chat_id: ChatId) -> Option<&ChatSubscriptions> {
        self.chats.get(&chat_id.0)
    }

    fn chat_mut(&mut self, chat_id: ChatId) -> Option<&mut ChatSubscriptions> {
        self.chats.get_mut(&chat_id.0)
    }
}

impl Store for Snapshot {
    fn load(&mut self) {}

    fn save(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn get(&self, chat_id: ChatId, name: &str) -> Option<&Subscription> {
        let chat = self.chat(chat_id)?;
        chat.position(name).map(|i| &chat.0[i])
    }

    fn get_mut(&mut self, chat_id: ChatId, name: &str) -> Option<&mut Subscription> {
        let chat = self.chat_mut(chat_id)?;
        let i = chat.position(name)?;
        Some(&mut chat.0[i])
    }

    fn put(&mut self, chat_id: ChatId, subscription: Subscription) {
        self.chats.entry(chat_id.0).or_default().put(subscription)
    }

    fn remove(&mut self, chat_id: ChatId, name: &str) -> Option<Subscription> {
        let chat = self.chat_mut(chat_id)?;
        let i = chat.position(name)?;
        let removed = chat.0.remove(i);
        if chat.0.is_empty() {
            self.chats.remove(&chat_id.0);
        }
        Some(removed)
    }

    fn list(&self, chat_id: ChatId) -> &[Subscription] {
        self.chat(chat_id).map(|c| c.0.as_slice()).unwrap_or_default()
    }

    fn total(&self) -> usize {
        self.chats.values().map(|c| c.0.len()).sum()
    }
}

/// A [`Snapshot`] backed by a single JSON file, rewritten in full on save.
pub struct JsonStore {
    path: PathBuf,
    snapshot: Snapshot,
}

impl JsonStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let mut store = Self {
            path: path.into(),
            snapshot: Snapshot::default(),
        };
        store.load();
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Option<Snapshot>, StoreError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&data)?))
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl Store for JsonStore {
    fn load(&mut self) {
        self.snapshot = match self.read() {
            Ok(Some(snapshot)) => {
                log::info!(
                    "Loaded {} subscriptions from {}",
                    snapshot.total(),
                    self.path.display()
                );
                snapshot
            }
            Ok(None) => {
                log::info!("{} not found, starting empty", self.path.display());
                Snapshot::default()
            }
            Err(e) => {
                log::warn!(
                    "Couldn't load {}, starting empty: {e}",
                    self.path.display()
                );
                Snapshot::default()
            }
        };
    }

    fn save(&self) -> Result<(), StoreError> {
        let data = serde_json::to_string_pretty(&self.snapshot)?;
        let temp = self.temp_path();
        fs::write(&temp, data)?;
        if let Err(e) = fs::rename(&temp, &self.path) {
            if let Err(cleanup) = fs::remove_file(&temp) {
                log::warn!("Couldn't remove {}: {cleanup}", temp.display());
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn get(&self, chat_id: ChatId, name: &str) -> Option<&Subscription> {
        self.snapshot.get(chat_id, name)
    }

    fn get_mut(&mut self, chat_id: ChatId, name: &str) -> Option<&mut Subscription> {
        self.snapshot.get_mut(chat_id, name)
    }

    fn put(&mut self, chat_id: ChatId, subscription: Subscription) {
        self.snapshot.put(chat_id, subscription)
    }

    fn remove(&mut self, chat_id: ChatId, name: &str) -> Option<Subscription> {
        self.snapshot.remove(chat_id, name)
    }

    fn list(&self, chat_id: ChatId) -> &[Subscription] {
        self.snapshot.list(chat_id)
    }

    fn total(&self) -> usize {
        self.snapshot.total()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use teloxide::types::UserId;

    use super::*;
    use crate::subscription::normalize_members;

    const CHAT: ChatId = ChatId(-1001);
    const OTHER_CHAT: ChatId = ChatId(-1002);

    fn sub(name: &str, cost: f64, members: &[&str]) -> Subscription {
        Subscription::new(name.to_string(), cost, normalize_members(members), UserId(7))
    }

    #[test]
    fn lookup_is_case_insensitive_and_chat_scoped() {
        let mut store = Snapshot::default();
        store.put(CHAT, sub("Netflix", 15.99, &["john"]));

        assert_eq!(store.get(CHAT, "netflix").map(|s| s.name.as_str()), Some("Netflix"));
        assert!(store.get(CHAT, "NETFLIX").is_some());
        assert!(store.get(OTHER_CHAT, "Netflix").is_none());
        assert!(store.list(OTHER_CHAT).is_empty());
    }

    #[test]
    fn put_overwrites_in_place() {
        let mut store = Snapshot::default();
        store.put(CHAT, sub("Netflix", 15.99, &["john"]));
        store.put(CHAT, sub("Spotify", 9.99, &["john"]));
        store.put(CHAT, sub("netflix", 20.0, &["alice"]));

        let names: Vec<_> = store.list(CHAT).iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["netflix", "Spotify"]);
        assert_eq!(store.get(CHAT, "Netflix").unwrap().total_cost, 20.0);
        assert_eq!(store.total(), 2);
    }

    #[test]
    fn list_keeps_insertion_order() {
        let mut store = Snapshot::default();
        for name in ["Zeta", "Alpha", "Mid"] {
            store.put(CHAT, sub(name, 1.0, &["john"]));
        }
        let names: Vec<_> = store.list(CHAT).iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Zeta", "Alpha", "Mid"]);
    }

    #[test]
    fn remove_signals_not_found() {
        let mut store = Snapshot::default();
        store.put(CHAT, sub("Netflix", 15.99, &["john"]));

        assert!(store.remove(CHAT, "hulu").is_none());
        assert!(store.remove(OTHER_CHAT, "netflix").is_none());
        assert_eq!(store.remove(CHAT, "NETFLIX").unwrap().name, "Netflix");
        assert!(store.get(CHAT, "Netflix").is_none());
        assert_eq!(store.total(), 0);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subscriptions.json");

        let mut store = JsonStore::open(&path);
        store.put(CHAT, sub("Netflix", 15.99, &["john", "alice", "bob"]));
        store.put(CHAT, sub("Gym", 40.0, &["alice"]));
        store.put(OTHER_CHAT, sub("Rent", 10.0, &["a", "b", "c"]));
        store.get_mut(CHAT, "netflix").unwrap().mark_paid("alice");
        store.save().unwrap();

        let reloaded = JsonStore::open(&path);
        assert_eq!(reloaded.snapshot, store.snapshot);
        assert_eq!(reloaded.get(CHAT, "Netflix").unwrap().paid_by, vec!["alice"]);
        let names: Vec<_> = reloaded.list(CHAT).iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Netflix", "Gym"]);
        assert!(!dir.path().join("subscriptions.json.tmp").exists());
    }

    #[test]
    fn file_layout_is_chat_then_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");

        let mut store = JsonStore::open(&path);
        store.put(CHAT, sub("Netflix", 15.99, &["john"]));
        store.save().unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let record = &json["-1001"]["Netflix"];
        assert_eq!(record["total_cost"], 15.99);
        assert_eq!(record["members"], serde_json::json!(["john"]));
        assert_eq!(record["paid_by"], serde_json::json!([]));
        assert_eq!(record["created_by"], 7);
    }

    #[test]
    fn load_accepts_records_without_optional_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        fs::write(
            &path,
            r#"{"42": {"Rent": {"total_cost": 10, "members": ["a", "b"], "created_by": 3}}}"#,
        )
        .unwrap();

        let store = JsonStore::open(&path);
        let rent = store.get(ChatId(42), "rent").unwrap();
        assert_eq!(rent.name, "Rent");
        assert_eq!(rent.total_cost, 10.0);
        assert!(rent.paid_by.is_empty());
        assert_eq!(rent.created_by, UserId(3));
        assert_eq!(rent.created_at, None);
    }

    #[test]
    fn load_skips_records_breaking_invariants() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        fs::write(
            &path,
            r#"{"42": {
                "Empty": {"total_cost": 10, "members": [], "created_by": 3},
                "Free": {"total_cost": 0, "members": ["a"], "created_by": 3},
                "Stranger": {"total_cost": 5, "members": ["a"], "paid_by": ["z"], "created_by": 3},
                "Rent": {"total_cost": 10, "members": ["a", "b"], "paid_by": ["A"], "created_by": 3}
            }}"#,
        )
        .unwrap();

        let store = JsonStore::open(&path);
        let names: Vec<_> = store.list(ChatId(42)).iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Rent"]);
        assert_eq!(store.total(), 1);
    }

    #[test]
    fn load_fails_soft() {
        let dir = tempfile::tempdir().unwrap();

        let missing = JsonStore::open(dir.path().join("missing.json"));
        assert_eq!(missing.total(), 0);

        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        let broken = JsonStore::open(&path);
        assert_eq!(broken.total(), 0);
    }

    #[test]
    fn failed_rename_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("occupied"), "").unwrap();

        let store = JsonStore::open(&path);
        assert!(matches!(store.save(), Err(StoreError::Io(_))));
        assert!(!dir.path().join("data.json.tmp").exists());
    }

    #[test]
    fn save_reports_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path().join("no_such_dir").join("data.json"));
        assert!(matches!(store.save(), Err(StoreError::Io(_))));
    }
}
