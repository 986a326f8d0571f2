use std::sync::Arc;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use ulid::Ulid;

use crate::directory::Directory;
use crate::observability::AUTH_FAILURES_TOTAL;

/// Cleartext password check against the shared server password. The login
/// user name must be the ULID of a user known to the directory.
pub struct SlotgateAuthSource {
    password: String,
    directory: Arc<dyn Directory>,
}

impl SlotgateAuthSource {
    pub fn new(password: String, directory: Arc<dyn Directory>) -> Self {
        Self { password, directory }
    }
}

impl std::fmt::Debug for SlotgateAuthSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotgateAuthSource").finish_non_exhaustive()
    }
}

fn refuse(message: String) -> PgWireError {
    metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
    PgWireError::UserError(Box::new(ErrorInfo::new("FATAL".into(), "28000".into(), message)))
}

#[async_trait]
impl AuthSource for SlotgateAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let user = login.user().unwrap_or_default();
        let id = Ulid::from_string(user).map_err(|_| refuse(format!("user name {user:?} is not a ULID")))?;
        if self.directory.role_of(id).await.is_none() {
            tracing::warn!(%id, "login refused for unknown user");
            return Err(refuse(format!("unknown user {id}")));
        }
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
