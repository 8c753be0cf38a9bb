//! Per-request session storage.
//!
//! The framework only needs the [`Session`] interface; [`MemorySession`]
//! keeps everything in memory and lives as long as the request does.
//! Applications with real persistence plug in their own store through
//! [`AppContext::with_session_factory`](crate::AppContext::with_session_factory).

use std::collections::HashMap;

use serde_json::Value;

pub trait Session: Send {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&mut self, key: &str, value: Value);
    fn delete(&mut self, key: &str);
    fn clear(&mut self);
    fn start(&mut self) {}
    /// Drops all data and logs the user out.
    fn destroy(&mut self);
    /// The logged-in user, empty when nobody is.
    fn user_id(&self) -> &str;
    fn set_user_id(&mut self, user_id: &str);

    fn is_logged_in(&self) -> bool {
        !self.user_id().is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemorySession {
    data: HashMap<String, Value>,
    user_id: String,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Session for MemorySession {
    fn get(&self, key: &str) -> Option<Value> {
        self.data.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) {
        self.data.insert(key.to_owned(), value);
    }

    fn delete(&mut self, key: &str) {
        self.data.remove(key);
    }

    fn clear(&mut self) {
        self.data.clear();
    }

    fn destroy(&mut self) {
        self.data.clear();
        self.user_id.clear();
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn set_user_id(&mut self, user_id: &str) {
        self.user_id = user_id.to_owned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn login_state_follows_user_id() {
        let mut session = MemorySession::new();
        session.start();
        assert!(!session.is_logged_in());

        session.set_user_id("u-1");
        session.set("cart", json!([1, 2]));
        assert!(session.is_logged_in());
        assert_eq!(session.get("cart"), Some(json!([1, 2])));

        session.clear();
        assert_eq!(session.get("cart"), None);
        assert!(session.is_logged_in());

        session.set("k", json!(1));
        session.destroy();
        assert_eq!(session.get("k"), None);
        assert!(!session.is_logged_in());
    }
}
