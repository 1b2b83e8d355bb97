//! Identity registry: client object -> token, with weak ownership.
//!
//! - Key is the client's address (`Arc::as_ptr`); an entry only matches while its
//!   `Weak` is still alive, so a new object reusing a freed address gets a fresh token.
//! - Dead entries are pruned lazily on every mutation.
//! - The registry never upgrades a `Weak` into a strong reference it keeps.

use parking_lot::Mutex;
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use uuid::Uuid;

use crate::consts::TOKEN_KEY_PREFIX;
use crate::snapshot::Carrier;

struct Entry {
    client: Weak<dyn Any + Send + Sync>,
    token: String,
}

impl Entry {
    fn is_alive(&self) -> bool {
        self.client.strong_count() > 0
    }
}

/// Reserved carrier key for clients of type `T`.
pub fn token_key<T: ?Sized + 'static>() -> String {
    format!("{}{}", TOKEN_KEY_PREFIX, type_name::<T>())
}

/// Fresh globally unique token.
pub fn new_token() -> String {
    Uuid::new_v4().to_string()
}

#[inline]
fn addr_of<T: ?Sized>(client: &Arc<T>) -> usize {
    Arc::as_ptr(client) as *const () as usize
}

#[derive(Default)]
pub struct IdentityRegistry {
    entries: Mutex<HashMap<usize, Entry>>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing token for this client, if any.
    pub fn resolve<T: Any + Send + Sync>(&self, client: &Arc<T>) -> Option<String> {
        let map = self.entries.lock();
        map.get(&addr_of(client))
            .filter(|e| e.is_alive())
            .map(|e| e.token.clone())
    }

    /// Existing token, or a freshly generated one that is remembered.
    pub fn resolve_or_create<T: Any + Send + Sync>(&self, client: &Arc<T>) -> String {
        let mut map = self.entries.lock();
        let addr = addr_of(client);
        if let Some(e) = map.get(&addr).filter(|e| e.is_alive()) {
            return e.token.clone();
        }
        prune(&mut map);
        let token = new_token();
        map.insert(addr, make_entry(client, token.clone()));
        token
    }

    /// Registry first; otherwise the token embedded in `carrier` under
    /// [`token_key::<T>()`], which is then remembered for this client.
    pub fn resolve_from_carrier<T, C>(&self, client: &Arc<T>, carrier: Option<&C>) -> Option<String>
    where
        T: Any + Send + Sync,
        C: Carrier + ?Sized,
    {
        if let Some(t) = self.resolve(client) {
            return Some(t);
        }
        let token = carrier?.get_string(&token_key::<T>())?;
        if token.is_empty() {
            return None;
        }
        let mut map = self.entries.lock();
        prune(&mut map);
        map.insert(addr_of(client), make_entry(client, token.clone()));
        Some(token)
    }

    /// Drop the entry for this client, returning its token.
    pub fn forget<T: Any + Send + Sync>(&self, client: &Arc<T>) -> Option<String> {
        let mut map = self.entries.lock();
        let addr = addr_of(client);
        match map.get(&addr) {
            Some(e) if e.is_alive() => map.remove(&addr).map(|e| e.token),
            _ => None,
        }
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Live entries.
    pub fn len(&self) -> usize {
        self.entries.lock().values().filter(|e| e.is_alive()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn make_entry<T: Any + Send + Sync>(client: &Arc<T>, token: String) -> Entry {
    let strong: Arc<dyn Any + Send + Sync> = client.clone();
    Entry {
        client: Arc::downgrade(&strong),
        token,
    }
}

fn prune(map: &mut HashMap<usize, Entry>) {
    map.retain(|_, e| e.is_alive());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Snapshot;

    struct Screen {
        _id: u32,
    }

    #[test]
    fn same_client_same_token_distinct_clients_distinct_tokens() {
        let reg = IdentityRegistry::new();
        let a = Arc::new(Screen { _id: 1 });
        let b = Arc::new(Screen { _id: 1 });
        let ta = reg.resolve_or_create(&a);
        assert_eq!(reg.resolve_or_create(&a), ta);
        let tb = reg.resolve_or_create(&b);
        assert_ne!(ta, tb, "identity, not value equality");
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn registry_does_not_keep_clients_alive() {
        let reg = IdentityRegistry::new();
        let a = Arc::new(Screen { _id: 7 });
        let weak = Arc::downgrade(&a);
        let _ = reg.resolve_or_create(&a);
        drop(a);
        assert!(weak.upgrade().is_none());
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn token_recovered_from_carrier_and_remembered() {
        let reg = IdentityRegistry::new();
        let a = Arc::new(Screen { _id: 3 });
        let mut carrier = Snapshot::new();
        assert!(reg.resolve_from_carrier(&a, Some(&carrier)).is_none());
        assert!(reg.resolve_from_carrier::<_, Snapshot>(&a, None).is_none());

        carrier.put(token_key::<Screen>(), "tok-1");
        assert_eq!(reg.resolve_from_carrier(&a, Some(&carrier)).as_deref(), Some("tok-1"));
        // теперь находится по identity, без carrier
        assert_eq!(reg.resolve(&a).as_deref(), Some("tok-1"));
        assert_eq!(reg.forget(&a).as_deref(), Some("tok-1"));
        assert!(reg.resolve(&a).is_none());
    }

    #[test]
    fn token_key_is_per_type() {
        assert_ne!(token_key::<Screen>(), token_key::<String>());
        assert!(token_key::<Screen>().starts_with(TOKEN_KEY_PREFIX));
    }
}
