use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use tracing::debug;

use crate::ids::AccountId;
use crate::ids::CharacterId;
use crate::ids::SessionId;
use crate::player::PlayerSession;
use crate::session::SessionSender;
use crate::store::Account;
use crate::store::Character;
use crate::store::CharacterStore;

pub const DEFAULT_TICKET_TTL: Duration = Duration::from_secs(30);

/// A one-time, IP-bound credential authorising a channel handshake.
#[derive(Clone, Debug)]
pub struct MigrationTicket {
    pub client_session_id: u64,
    pub account: AccountId,
    pub character: CharacterId,
    pub remote: SocketAddr,
    pub expires_at: Instant,
}

impl MigrationTicket {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// What the registry remembers about a live session.
#[derive(Clone, Debug)]
pub struct ActiveSession {
    pub account: AccountId,
    pub character: CharacterId,
    pub remote: SocketAddr,
}

struct Inner {
    store: Arc<dyn CharacterStore>,
    active: Mutex<HashMap<SessionId, ActiveSession>>,
    tickets: Mutex<HashMap<u64, MigrationTicket>>,
    next_session: AtomicU32,
    ttl: Duration,
}

/// The only shared-state component: active sessions, migration tickets,
/// and the character store facade. Clones share one instance.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn CharacterStore>) -> Self {
        Self::with_ttl(store, DEFAULT_TICKET_TTL)
    }

    pub fn with_ttl(store: Arc<dyn CharacterStore>, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                active: Mutex::new(HashMap::new()),
                tickets: Mutex::new(HashMap::new()),
                next_session: AtomicU32::new(1),
                ttl,
            }),
        }
    }

    // --- character store facade ---

    pub fn get_or_create_account(&self, username: &str) -> anyhow::Result<Account> {
        self.inner.store.get_or_create_account(username)
    }

    pub fn create_guest_account(&self) -> anyhow::Result<Account> {
        self.inner.store.create_guest_account()
    }

    pub fn ensure_default_character(&self, account: AccountId) -> anyhow::Result<Character> {
        self.inner.store.ensure_default_character(account)
    }

    pub fn load_character(&self, id: CharacterId) -> anyhow::Result<Option<Character>> {
        self.inner.store.load_character(id)
    }

    pub fn characters_of(&self, account: AccountId) -> anyhow::Result<Vec<Character>> {
        self.inner.store.characters_of(account)
    }

    // --- migration tickets ---

    /// Issue a ticket bound to `remote`'s IP address. Expired leftovers
    /// are swept here, so the map cannot grow without ticket churn.
    pub fn create_ticket(
        &self,
        account: AccountId,
        character: CharacterId,
        remote: SocketAddr,
    ) -> MigrationTicket {
        let now = Instant::now();
        let mut tickets = self.inner.tickets.lock().unwrap_or_else(|e| e.into_inner());
        tickets.retain(|_, t| !t.expired(now));

        let id = loop {
            let candidate = random_u64();
            if candidate != 0 && !tickets.contains_key(&candidate) {
                break candidate;
            }
        };
        let ticket = MigrationTicket {
            client_session_id: id,
            account,
            character,
            remote,
            expires_at: now + self.inner.ttl,
        };
        tickets.insert(id, ticket.clone());
        ticket
    }

    /// Atomically consume a ticket. At most one caller gets it; the
    /// ticket is gone afterwards even if validation then fails. Fails on
    /// absence, expiry, or an IP that differs from the issuing one.
    pub fn try_consume_ticket(&self, id: u64, remote: SocketAddr) -> Option<MigrationTicket> {
        let now = Instant::now();
        let ticket = {
            let mut tickets = self.inner.tickets.lock().unwrap_or_else(|e| e.into_inner());
            tickets.retain(|_, t| !t.expired(now));
            tickets.remove(&id)?
        };
        if ticket.expired(now) {
            return None;
        }
        if ticket.remote.ip() != remote.ip() {
            debug!(ticket = id, "migration ticket presented from a different address");
            return None;
        }
        Some(ticket)
    }

    #[cfg(test)]
    pub(crate) fn ticket_count(&self) -> usize {
        self.inner.tickets.lock().unwrap().len()
    }

    // --- active sessions ---

    pub fn next_session_id(&self) -> SessionId {
        SessionId(self.inner.next_session.fetch_add(1, Ordering::Relaxed))
    }

    /// Construct the gameplay object for a migrated connection and record
    /// the session as active.
    pub fn create_player_session(
        &self,
        session_id: SessionId,
        sender: SessionSender,
        character: &Character,
        remote: SocketAddr,
    ) -> PlayerSession {
        self.inner
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                session_id,
                ActiveSession {
                    account: character.account,
                    character: character.id,
                    remote,
                },
            );
        PlayerSession::new(session_id, character.clone(), sender)
    }

    /// Remove a closed session from the registry. Safe to call twice.
    pub fn notify_closed(&self, id: SessionId) {
        self.inner
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    pub fn active_session(&self, id: SessionId) -> Option<ActiveSession> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    pub fn active_count(&self) -> usize {
        self.inner
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

fn random_u64() -> u64 {
    let mut b = [0u8; 8];
    getrandom::getrandom(&mut b).expect("getrandom");
    u64::from_le_bytes(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(MemoryStore::new()))
    }

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn migration_ticket_is_single_use() {
        let mgr = manager();
        let account = mgr.create_guest_account().unwrap();
        let character = mgr.ensure_default_character(account.id).unwrap();

        let ticket = mgr.create_ticket(account.id, character.id, addr("127.0.0.1:0"));
        assert_ne!(ticket.client_session_id, 0);

        // Same IP, different port: the port is not part of the binding.
        let got = mgr
            .try_consume_ticket(ticket.client_session_id, addr("127.0.0.1:1234"))
            .unwrap();
        assert_eq!(got.account, account.id);
        assert_eq!(got.character, character.id);

        assert!(mgr
            .try_consume_ticket(ticket.client_session_id, addr("127.0.0.1:1234"))
            .is_none());
    }

    #[test]
    fn ticket_rejects_a_different_address() {
        let mgr = manager();
        let ticket = mgr.create_ticket(AccountId(1), CharacterId(1), addr("127.0.0.1:0"));
        assert!(mgr
            .try_consume_ticket(ticket.client_session_id, addr("10.0.0.9:5555"))
            .is_none());
        // Consumed either way.
        assert!(mgr
            .try_consume_ticket(ticket.client_session_id, addr("127.0.0.1:5555"))
            .is_none());
    }

    #[test]
    fn expired_tickets_are_swept_lazily() {
        let mgr = SessionManager::with_ttl(Arc::new(MemoryStore::new()), Duration::ZERO);
        let ticket = mgr.create_ticket(AccountId(1), CharacterId(1), addr("127.0.0.1:0"));
        assert!(mgr
            .try_consume_ticket(ticket.client_session_id, addr("127.0.0.1:0"))
            .is_none());

        // A later issue sweeps whatever expiry left behind.
        let _ = mgr.create_ticket(AccountId(2), CharacterId(2), addr("127.0.0.1:0"));
        assert_eq!(mgr.ticket_count(), 1);
    }

    #[test]
    fn concurrent_consumers_get_at_most_one_ticket() {
        let mgr = manager();
        let ticket = mgr.create_ticket(AccountId(1), CharacterId(1), addr("127.0.0.1:0"));
        let id = ticket.client_session_id;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let mgr = mgr.clone();
            handles.push(std::thread::spawn(move || {
                mgr.try_consume_ticket(id, addr("127.0.0.1:7777")).is_some()
            }));
        }
        let wins: usize = handles
            .into_iter()
            .map(|h| usize::from(h.join().unwrap()))
            .sum();
        assert_eq!(wins, 1);
    }

    #[test]
    fn notify_closed_is_idempotent() {
        let mgr = manager();
        let account = mgr.create_guest_account().unwrap();
        let character = mgr.ensure_default_character(account.id).unwrap();
        let id = mgr.next_session_id();

        // Registry bookkeeping does not need a live connection.
        {
            let mut active = mgr.inner.active.lock().unwrap();
            active.insert(
                id,
                ActiveSession {
                    account: account.id,
                    character: character.id,
                    remote: addr("127.0.0.1:9999"),
                },
            );
        }
        assert_eq!(mgr.active_count(), 1);
        assert!(mgr.active_session(id).is_some());

        mgr.notify_closed(id);
        mgr.notify_closed(id);
        assert_eq!(mgr.active_count(), 0);
    }
}
