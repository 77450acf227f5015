//! Token-based authentication.
//!
//! Opaque bearer tokens with a configurable TTL over an in-memory user
//! table seeded from configuration.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct User {
    pub username: String,
    password: String,
    pub is_admin: bool,
}

struct Session {
    username: String,
    expires_at: Instant,
}

pub struct AuthManager {
    users: Mutex<HashMap<String, User>>,
    sessions: Mutex<HashMap<String, Session>>,
    token_ttl: Duration,
}

impl AuthManager {
    pub fn new(admin_user: &str, admin_password: &str, token_ttl: Duration) -> Self {
        let mut users = HashMap::new();
        users.insert(
            admin_user.to_string(),
            User { username: admin_user.to_string(), password: admin_password.to_string(), is_admin: true },
        );
        info!(admin = admin_user, ttl_secs = token_ttl.as_secs(), "auth manager initialized");
        Self { users: Mutex::new(users), sessions: Mutex::new(HashMap::new()), token_ttl }
    }

    /// Returns a fresh token on success, `None` on bad credentials.
    pub fn login(&self, username: &str, password: &str) -> Option<String> {
        {
            let users = self.users.lock();
            let user = users.get(username)?;
            if user.password != password {
                return None;
            }
        }

        let token = Uuid::new_v4().simple().to_string();
        self.sessions
            .lock()
            .insert(token.clone(), Session { username: username.to_string(), expires_at: Instant::now() + self.token_ttl });
        info!(user = username, "login succeeded");
        Some(token)
    }

    /// Validate a token, dropping it if expired.
    pub fn validate(&self, token: &str) -> Option<User> {
        let username = {
            let mut sessions = self.sessions.lock();
            let session = sessions.get(token)?;
            if Instant::now() > session.expires_at {
                sessions.remove(token);
                return None;
            }
            session.username.clone()
        };
        self.users.lock().get(&username).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_and_validate() {
        let auth = AuthManager::new("admin", "secret", Duration::from_secs(60));
        assert!(auth.login("admin", "wrong").is_none());
        assert!(auth.login("ghost", "secret").is_none());

        let token = auth.login("admin", "secret").unwrap();
        let user = auth.validate(&token).unwrap();
        assert_eq!(user.username, "admin");
        assert!(user.is_admin);
        assert!(auth.validate("bogus").is_none());
    }

    #[test]
    fn expired_token_rejected() {
        let auth = AuthManager::new("admin", "secret", Duration::ZERO);
        let token = auth.login("admin", "secret").unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(auth.validate(&token).is_none());
    }
}
