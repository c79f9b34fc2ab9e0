use std::collections::BTreeMap;

use crate::errors::AuthError;
use crate::signing::PublicKey;
use crate::types::ClientId;

/// Collects signing keys during the key-exchange phase.
#[derive(Debug, Clone, Default)]
pub struct KeyDirectoryBuilder {
    keys: BTreeMap<ClientId, PublicKey>,
}

impl KeyDirectoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `client_id -> key`. Bindings are append-only: repeating the same
    /// key is a no-op returning `false`, a different key is rejected.
    pub fn put(&mut self, client_id: ClientId, key: PublicKey) -> Result<bool, AuthError> {
        match self.keys.get(&client_id) {
            Some(existing) if *existing == key => Ok(false),
            Some(_) => Err(AuthError::ConflictingKey(client_id)),
            None => {
                self.keys.insert(client_id, key);
                Ok(true)
            }
        }
    }

    pub fn contains(&self, client_id: &ClientId) -> bool {
        self.keys.contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn build(self) -> KeyDirectory {
        KeyDirectory { keys: self.keys }
    }
}

/// Read-only mapping from participant to signing key, fixed for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDirectory {
    keys: BTreeMap<ClientId, PublicKey>,
}

impl KeyDirectory {
    pub fn get(&self, client_id: &ClientId) -> Option<&PublicKey> {
        self.keys.get(client_id)
    }

    pub fn contains(&self, client_id: &ClientId) -> bool {
        self.keys.contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ClientId, &PublicKey)> {
        self.keys.iter()
    }
}
