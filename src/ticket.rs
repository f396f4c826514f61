//! The authentication ticket value.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Version stamped on newly issued tickets
pub const TICKET_VERSION: u8 = 2;

/// An authenticated identity with a validity window.
///
/// Tickets are created on login, rebuilt from the cookie on every request,
/// and reissued by [`AuthTicket::renew_if_old`] under sliding expiration.
/// The codec does not enforce `expiration > issue_date`; callers do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTicket {
    pub version: u8,
    pub name: String,
    pub issue_date: DateTime<Utc>,
    pub expiration: DateTime<Utc>,
    pub is_persistent: bool,
    pub user_data: String,
    pub cookie_path: String,
}

impl AuthTicket {
    pub fn new(
        version: u8,
        name: &str,
        issue_date: DateTime<Utc>,
        expiration: DateTime<Utc>,
        is_persistent: bool,
        user_data: &str,
        cookie_path: &str,
    ) -> Self {
        Self {
            version,
            name: name.to_string(),
            issue_date,
            expiration,
            is_persistent,
            user_data: user_data.to_string(),
            cookie_path: cookie_path.to_string(),
        }
    }

    /// Total validity span
    pub fn lifetime(&self) -> Duration {
        self.expiration - self.issue_date
    }

    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiration
    }

    /// True once less validity remains than has elapsed
    pub fn needs_renewal(&self, now: DateTime<Utc>) -> bool {
        self.expiration - now < now - self.issue_date
    }

    /// Reissue the ticket at `now` with the same lifetime if more than half
    /// of it has elapsed; otherwise return it unchanged.
    pub fn renew_if_old(&self, now: DateTime<Utc>) -> AuthTicket {
        if !self.needs_renewal(now) {
            return self.clone();
        }

        AuthTicket {
            issue_date: now,
            expiration: now + self.lifetime(),
            ..self.clone()
        }
    }
}
