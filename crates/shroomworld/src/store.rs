use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context;
use serde::Deserialize;
use serde::Serialize;

use crate::ids::AccountId;
use crate::ids::CharacterId;
use crate::ids::MapId;

/// Character names are capped at 12 Latin-1 bytes on the wire.
pub const MAX_NAME_LEN: usize = 12;

/// Where newly created characters spawn.
pub const DEFAULT_MAP: MapId = MapId(100_000_000);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
    pub created_unix: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Character {
    pub id: CharacterId,
    pub account: AccountId,
    pub name: String,
    pub level: u8,
    pub map: MapId,
    pub created_unix: u64,
}

/// The opaque character store the server collaborates with. Accounts are
/// unique by username; characters belong to exactly one account.
pub trait CharacterStore: Send + Sync {
    fn get_or_create_account(&self, username: &str) -> anyhow::Result<Account>;
    fn create_guest_account(&self) -> anyhow::Result<Account>;
    fn ensure_default_character(&self, account: AccountId) -> anyhow::Result<Character>;
    fn load_character(&self, id: CharacterId) -> anyhow::Result<Option<Character>>;
    fn characters_of(&self, account: AccountId) -> anyhow::Result<Vec<Character>>;
}

#[derive(Default, Serialize, Deserialize)]
struct State {
    accounts: Vec<Account>,
    characters: Vec<Character>,
    next_account: u32,
    next_character: u32,
    #[serde(default)]
    next_guest: u32,
}

/// The embedded default store: one JSON file, rewritten atomically via a
/// temp file on every mutation.
pub struct FileStore {
    path: PathBuf,
    state: Mutex<State>,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match std::fs::read_to_string(&path) {
            Ok(s) => serde_json::from_str(&s)
                .with_context(|| format!("parse character store {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => State::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("read character store {}", path.display()))
            }
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    fn save(&self, state: &State) -> anyhow::Result<()> {
        // An empty path means no backing file (the in-memory variant).
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }
        let s = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, s)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut State) -> anyhow::Result<(T, bool)>,
    ) -> anyhow::Result<T> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let (out, dirty) = f(&mut state)?;
        if dirty {
            self.save(&state)?;
        }
        Ok(out)
    }
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn validate_name(name: &str) -> anyhow::Result<()> {
    if name.is_empty() {
        anyhow::bail!("name is empty");
    }
    if name.chars().count() > MAX_NAME_LEN {
        anyhow::bail!("name longer than {MAX_NAME_LEN}");
    }
    if name.chars().any(|c| c as u32 > 0xFF) {
        anyhow::bail!("name is not Latin-1");
    }
    Ok(())
}

/// Derive a character name that fits the wire limit.
fn default_character_name(username: &str) -> String {
    username.chars().take(MAX_NAME_LEN).collect()
}

impl CharacterStore for FileStore {
    fn get_or_create_account(&self, username: &str) -> anyhow::Result<Account> {
        let username = username.trim();
        validate_name(username)?;
        self.with_state(|state| {
            if let Some(a) = state.accounts.iter().find(|a| a.username == username) {
                return Ok((a.clone(), false));
            }
            state.next_account += 1;
            let account = Account {
                id: AccountId(state.next_account),
                username: username.to_string(),
                created_unix: now_unix(),
            };
            state.accounts.push(account.clone());
            Ok((account, true))
        })
    }

    fn create_guest_account(&self) -> anyhow::Result<Account> {
        self.with_state(|state| {
            let username = loop {
                state.next_guest += 1;
                let candidate = format!("guest{}", state.next_guest);
                if !state.accounts.iter().any(|a| a.username == candidate) {
                    break candidate;
                }
            };
            state.next_account += 1;
            let account = Account {
                id: AccountId(state.next_account),
                username,
                created_unix: now_unix(),
            };
            state.accounts.push(account.clone());
            Ok((account, true))
        })
    }

    fn ensure_default_character(&self, account: AccountId) -> anyhow::Result<Character> {
        self.with_state(|state| {
            if let Some(c) = state.characters.iter().find(|c| c.account == account) {
                return Ok((c.clone(), false));
            }
            let username = state
                .accounts
                .iter()
                .find(|a| a.id == account)
                .map(|a| a.username.clone())
                .with_context(|| format!("unknown account {account}"))?;
            state.next_character += 1;
            let character = Character {
                id: CharacterId(state.next_character),
                account,
                name: default_character_name(&username),
                level: 1,
                map: DEFAULT_MAP,
                created_unix: now_unix(),
            };
            state.characters.push(character.clone());
            Ok((character, true))
        })
    }

    fn load_character(&self, id: CharacterId) -> anyhow::Result<Option<Character>> {
        self.with_state(|state| {
            Ok((
                state.characters.iter().find(|c| c.id == id).cloned(),
                false,
            ))
        })
    }

    fn characters_of(&self, account: AccountId) -> anyhow::Result<Vec<Character>> {
        self.with_state(|state| {
            Ok((
                state
                    .characters
                    .iter()
                    .filter(|c| c.account == account)
                    .cloned()
                    .collect(),
                false,
            ))
        })
    }
}

/// Purely in-memory variant for tests and throwaway runs.
pub struct MemoryStore {
    inner: FileStore,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: FileStore {
                path: PathBuf::new(),
                state: Mutex::new(State::default()),
            },
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CharacterStore for MemoryStore {
    fn get_or_create_account(&self, username: &str) -> anyhow::Result<Account> {
        self.inner.get_or_create_account(username)
    }

    fn create_guest_account(&self) -> anyhow::Result<Account> {
        self.inner.create_guest_account()
    }

    fn ensure_default_character(&self, account: AccountId) -> anyhow::Result<Character> {
        self.inner.ensure_default_character(account)
    }

    fn load_character(&self, id: CharacterId) -> anyhow::Result<Option<Character>> {
        self.inner.load_character(id)
    }

    fn characters_of(&self, account: AccountId) -> anyhow::Result<Vec<Character>> {
        self.inner.characters_of(account)
    }
}
