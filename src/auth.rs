//! Users, permission codenames and token authentication.

use crate::error::Result;
use crate::orm::{Db, ModelMeta};
use crate::router::{Middleware, RequestContext, Response};
use log::{debug, info};
use sqlx::FromRow;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

/// Operation a permission codename grants on a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Add,
    Change,
    Delete,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Add => "add",
            Action::Change => "change",
            Action::Delete => "delete",
        }
    }
}

/// `"<app_label>.<action>_<object name lowercased>"`, e.g. `"blog.add_post"`.
pub fn permission_codename(meta: &ModelMeta, action: Action) -> String {
    format!(
        "{}.{}_{}",
        meta.app_label(),
        action.as_str(),
        meta.object_name().to_lowercase()
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Option<i64>,
    pub username: String,
    pub is_active: bool,
    pub is_superuser: bool,
    pub permissions: BTreeSet<String>,
}

impl User {
    pub fn new(id: i64, username: impl Into<String>) -> Self {
        User {
            id: Some(id),
            username: username.into(),
            is_active: true,
            is_superuser: false,
            permissions: BTreeSet::new(),
        }
    }

    /// The user of a request that carried no valid credentials.
    pub fn anonymous() -> Self {
        User {
            id: None,
            username: String::new(),
            is_active: false,
            is_superuser: false,
            permissions: BTreeSet::new(),
        }
    }

    pub fn with_perm(mut self, codename: impl Into<String>) -> Self {
        self.permissions.insert(codename.into());
        self
    }

    pub fn superuser(mut self) -> Self {
        self.is_superuser = true;
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.id.is_some()
    }

    /// Inactive users have no permissions; active superusers have all of them.
    pub fn has_perm(&self, codename: &str) -> bool {
        if !self.is_active {
            return false;
        }
        self.is_superuser || self.permissions.contains(codename)
    }
}

impl Default for User {
    fn default() -> Self {
        User::anonymous()
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    username: String,
    token: String,
    is_active: bool,
    is_superuser: bool,
}

#[derive(Debug, FromRow)]
struct PermissionRow {
    user_id: i64,
    codename: String,
}

/// Maps API tokens to users.
#[derive(Debug, Default)]
pub struct UserRegistry {
    by_token: RwLock<HashMap<String, Arc<User>>>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: impl Into<String>, user: User) {
        if let Ok(mut users) = self.by_token.write() {
            users.insert(token.into(), Arc::new(user));
        }
    }

    pub fn get(&self, token: &str) -> Option<Arc<User>> {
        self.by_token.read().ok()?.get(token).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_token.read().map(|users| users.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create the `auth_user` and `auth_user_permissions` tables if needed.
    pub async fn migrate(db: &Db) -> Result<()> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS auth_user (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE NOT NULL,
                token TEXT UNIQUE NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                is_superuser BOOLEAN NOT NULL DEFAULT 0
            )",
        )
        .await?;
        db.execute(
            "CREATE TABLE IF NOT EXISTS auth_user_permissions (
                user_id INTEGER NOT NULL REFERENCES auth_user(id) ON DELETE CASCADE,
                codename TEXT NOT NULL,
                PRIMARY KEY (user_id, codename)
            )",
        )
        .await
    }

    /// Replace the registry's contents with the users stored in `db`.
    pub async fn load(&self, db: &Db) -> Result<()> {
        let users: Vec<UserRow> = db
            .fetch_all("SELECT id, username, token, is_active, is_superuser FROM auth_user")
            .await?;
        let perms: Vec<PermissionRow> = db
            .fetch_all("SELECT user_id, codename FROM auth_user_permissions")
            .await?;

        let mut by_id: HashMap<i64, BTreeSet<String>> = HashMap::new();
        for perm in perms {
            by_id.entry(perm.user_id).or_default().insert(perm.codename);
        }

        let mut loaded = HashMap::with_capacity(users.len());
        for row in users {
            let user = User {
                id: Some(row.id),
                username: row.username,
                is_active: row.is_active,
                is_superuser: row.is_superuser,
                permissions: by_id.remove(&row.id).unwrap_or_default(),
            };
            loaded.insert(row.token, Arc::new(user));
        }
        info!("Loaded {} API users", loaded.len());
        if let Ok(mut users) = self.by_token.write() {
            *users = loaded;
        }
        Ok(())
    }
}

/// Pre-middleware resolving `Authorization: Token <token>` to a user.
///
/// Requests without the header, or with an unknown token, stay anonymous.
pub fn token_auth(registry: Arc<UserRegistry>) -> Middleware {
    Arc::new(move |ctx: &mut RequestContext| {
        let token = ctx
            .header("authorization")
            .and_then(|value| value.strip_prefix("Token "))
            .map(str::trim)
            .map(str::to_string);
        if let Some(token) = token {
            match registry.get(&token) {
                Some(user) => {
                    debug!("Authenticated request as `{}`", user.username);
                    ctx.user = user;
                }
                None => debug!("Unknown API token, request stays anonymous"),
            }
        }
        None::<Response>
    })
}
