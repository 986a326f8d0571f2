use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::limits::MAX_USERS;
use crate::model::Role;

/// User lookup owned by the wider platform. The engine only asks whether a
/// user exists and which role they hold.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn role_of(&self, user_id: Ulid) -> Option<Role>;
}

/// Directory kept in memory, seeded from configuration.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    users: DashMap<Ulid, Role>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: impl IntoIterator<Item = (Ulid, Role)>) -> Self {
        let dir = Self::new();
        for (id, role) in users {
            dir.insert(id, role);
        }
        dir
    }

    /// Add or replace a user. Returns false once the directory is full.
    pub fn insert(&self, id: Ulid, role: Role) -> bool {
        if self.users.len() >= MAX_USERS && !self.users.contains_key(&id) {
            return false;
        }
        self.users.insert(id, role);
        true
    }

    pub fn remove(&self, id: &Ulid) -> Option<Role> {
        self.users.remove(id).map(|(_, role)| role)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn role_of(&self, user_id: Ulid) -> Option<Role> {
        self.users.get(&user_id).map(|r| *r)
    }
}
