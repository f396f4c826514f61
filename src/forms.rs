//! Forms authentication: issuing tickets, building cookies, and checking
//! the ticket that comes back on each request.

use crate::codec::{self, TicketEncoding};
use crate::config::FormsConfig;
use crate::crypto::{MachineKey, TicketCrypto};
use crate::error::{Result, TicketError};
use crate::ticket::{AuthTicket, TICKET_VERSION};
use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use std::fmt::Write;

/// A cookie to send back to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    /// `None` for a session cookie
    pub expires: Option<DateTime<Utc>>,
}

impl AuthCookie {
    /// Render as a `Set-Cookie` header value
    pub fn to_header_value(&self) -> String {
        let mut out = format!("{}={}; Path={}", self.name, self.value, self.path);
        if let Some(domain) = &self.domain {
            let _ = write!(out, "; Domain={}", domain);
        }
        if let Some(expires) = self.expires {
            let _ = write!(out, "; Expires={}", expires.format("%a, %d %b %Y %H:%M:%S GMT"));
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        out
    }
}

/// Result of checking a request's ticket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// No ticket was presented
    Anonymous,
    /// The ticket was malformed, tampered with, or failed to decrypt
    Rejected,
    Expired(AuthTicket),
    Authenticated {
        ticket: AuthTicket,
        /// Set when sliding expiration reissued the ticket
        refreshed: Option<AuthCookie>,
    },
}

/// Subsecond digits a timestamp keeps through encoding (100ns ticks)
pub const TICK_DIGITS: u16 = 7;

/// Forms authentication for one site.
///
/// Holds the site configuration and keys; build it once at startup and
/// share it by reference.
#[derive(Debug, Clone)]
pub struct FormsAuth<C = MachineKey> {
    config: FormsConfig,
    crypto: C,
}

impl<C: TicketCrypto> FormsAuth<C> {
    pub fn new(config: FormsConfig, crypto: C) -> Self {
        Self { config, crypto }
    }

    pub fn config(&self) -> &FormsConfig {
        &self.config
    }

    pub fn encoding(&self) -> TicketEncoding {
        self.config.ticket_encoding()
    }

    /// A new ticket valid for the configured timeout
    pub fn issue_ticket(
        &self,
        name: &str,
        persistent: bool,
        user_data: &str,
        now: DateTime<Utc>,
    ) -> AuthTicket {
        let now = now.trunc_subsecs(TICK_DIGITS);
        AuthTicket::new(
            TICKET_VERSION,
            name,
            now,
            now + self.config.timeout(),
            persistent,
            user_data,
            &self.config.cookie_path,
        )
    }

    /// Protect and encode a ticket with the site settings
    pub fn encrypt(&self, ticket: &AuthTicket) -> Option<String> {
        codec::encode(ticket, self.config.protection, self.encoding(), &self.crypto)
    }

    /// Decode a ticket with the site settings. See [`codec::decode`] for
    /// the error/`None` split.
    pub fn decrypt(&self, encoded: &str) -> Result<Option<AuthTicket>> {
        codec::decode(encoded, self.config.protection, &self.crypto)
    }

    /// Issue a ticket and wrap it in the authentication cookie
    pub fn auth_cookie(
        &self,
        name: &str,
        persistent: bool,
        user_data: &str,
        now: DateTime<Utc>,
    ) -> Result<(AuthTicket, AuthCookie)> {
        let ticket = self.issue_ticket(name, persistent, user_data, now);
        let cookie = self.cookie_for(&ticket)?;
        Ok((ticket, cookie))
    }

    /// Wrap an existing ticket in the authentication cookie
    pub fn cookie_for(&self, ticket: &AuthTicket) -> Result<AuthCookie> {
        let value = self.encrypt(ticket).ok_or(TicketError::EncodeFailed)?;
        Ok(AuthCookie {
            name: self.config.cookie_name.clone(),
            value,
            path: ticket.cookie_path.clone(),
            domain: self.config.domain.clone(),
            secure: self.config.require_ssl,
            http_only: true,
            expires: ticket.is_persistent.then_some(ticket.expiration),
        })
    }

    /// A cookie that clears the ticket from the client
    pub fn sign_out_cookie(&self) -> AuthCookie {
        AuthCookie {
            name: self.config.cookie_name.clone(),
            value: String::new(),
            path: self.config.cookie_path.clone(),
            domain: self.config.domain.clone(),
            secure: self.config.require_ssl,
            http_only: true,
            expires: Utc.with_ymd_and_hms(1999, 10, 12, 0, 0, 0).single(),
        }
    }

    /// Check the ticket presented with a request.
    ///
    /// Under sliding expiration a ticket past half its lifetime is renewed
    /// and a replacement cookie returned. If the renewed ticket cannot be
    /// encoded the original ticket is kept.
    pub fn authenticate_request(&self, cookie_value: Option<&str>, now: DateTime<Utc>) -> AuthOutcome {
        let Some(value) = cookie_value.filter(|v| !v.is_empty()) else {
            return AuthOutcome::Anonymous;
        };

        let ticket = match self.decrypt(value) {
            Ok(Some(ticket)) => ticket,
            Ok(None) | Err(_) => return AuthOutcome::Rejected,
        };

        if ticket.expired(now) {
            return AuthOutcome::Expired(ticket);
        }

        if self.config.sliding_expiration && ticket.needs_renewal(now) {
            let renewed = ticket.renew_if_old(now.trunc_subsecs(TICK_DIGITS));
            if let Ok(cookie) = self.cookie_for(&renewed) {
                return AuthOutcome::Authenticated {
                    ticket: renewed,
                    refreshed: Some(cookie),
                };
            }
        }

        AuthOutcome::Authenticated {
            ticket,
            refreshed: None,
        }
    }

    /// Where to send the user after login. Local paths are honored;
    /// absolute http(s) URLs only with cross-app redirects enabled.
    pub fn redirect_url(&self, return_url: Option<&str>) -> String {
        match return_url {
            Some(url) if self.is_allowed_return_url(url) => url.to_string(),
            _ => self.config.default_url.clone(),
        }
    }

    fn is_allowed_return_url(&self, url: &str) -> bool {
        if url.is_empty() || url.chars().any(|c| c.is_control()) {
            return false;
        }
        if url.starts_with('/') {
            return !url.starts_with("//") && !url.starts_with("/\\");
        }
        let lower = url.to_ascii_lowercase();
        (lower.starts_with("http://") || lower.starts_with("https://"))
            && self.config.enable_cross_app_redirects
    }

    /// Login page URL carrying the page the user asked for
    pub fn login_redirect(&self, return_path: &str) -> String {
        let separator = if self.config.login_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}ReturnUrl={}",
            self.config.login_url,
            separator,
            encode_query_value(return_path)
        )
    }
}

fn encode_query_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len() * 3);
    for c in value.chars() {
        match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '~' => result.push(c),
            _ => {
                let mut buf = [0u8; 4];
                for b in c.encode_utf8(&mut buf).as_bytes() {
                    let _ = write!(result, "%{:02X}", b);
                }
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ProtectionMode;
    use crate::config::CookielessMode;
    use crate::crypto::MAC_LENGTH;
    use chrono::Duration;

    struct BrokenCrypto;

    impl TicketCrypto for BrokenCrypto {
        fn mac(&self, _data: &[u8]) -> Option<[u8; MAC_LENGTH]> {
            None
        }
        fn encrypt(&self, _data: &[u8]) -> Option<Vec<u8>> {
            None
        }
        fn decrypt(&self, _data: &[u8]) -> Option<Vec<u8>> {
            None
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap()
    }

    fn forms(config: FormsConfig) -> FormsAuth {
        FormsAuth::new(config, MachineKey::new(&[1u8; 32], &[2u8; 32]).unwrap())
    }

    #[test]
    fn test_issue_ticket_uses_config() {
        let config = FormsConfig {
            timeout_minutes: 45,
            cookie_path: "/app".to_string(),
            ..Default::default()
        };
        let ticket = forms(config).issue_ticket("alice", true, "data", t0());
        assert_eq!(ticket.version, TICKET_VERSION);
        assert_eq!(ticket.issue_date, t0());
        assert_eq!(ticket.expiration, t0() + Duration::minutes(45));
        assert_eq!(ticket.cookie_path, "/app");
        assert!(ticket.is_persistent);
    }

    #[test]
    fn test_issue_time_keeps_tick_precision() {
        let auth = forms(FormsConfig::default());
        let now = t0() + Duration::nanoseconds(123_456_789);
        let (ticket, cookie) = auth.auth_cookie("alice", false, "", now).unwrap();
        assert_eq!(ticket.issue_date, t0() + Duration::nanoseconds(123_456_700));
        assert_eq!(auth.decrypt(&cookie.value).unwrap(), Some(ticket));
    }

    #[test]
    fn test_cookie_roundtrip() {
        let auth = forms(FormsConfig::default());
        let (ticket, cookie) = auth.auth_cookie("alice", false, "", t0()).unwrap();

        assert_eq!(cookie.name, ".ASPXAUTH");
        assert!(cookie.http_only);
        assert!(!cookie.secure);
        assert!(cookie.expires.is_none());
        assert_eq!(auth.decrypt(&cookie.value).unwrap(), Some(ticket));
    }

    #[test]
    fn test_persistent_cookie_expires_with_ticket() {
        let config = FormsConfig {
            require_ssl: true,
            domain: Some("example.com".to_string()),
            ..Default::default()
        };
        let auth = forms(config);
        let (ticket, cookie) = auth.auth_cookie("alice", true, "", t0()).unwrap();
        assert_eq!(cookie.expires, Some(ticket.expiration));

        let header = cookie.to_header_value();
        assert!(header.starts_with(".ASPXAUTH="));
        assert!(header.contains("; Path=/"));
        assert!(header.contains("; Domain=example.com"));
        assert!(header.contains("; Expires=Wed, 10 Jan 2024 09:30:00 GMT"));
        assert!(header.ends_with("; Secure; HttpOnly"));
    }

    #[test]
    fn test_encode_failure_is_error() {
        let auth = FormsAuth::new(FormsConfig::default(), BrokenCrypto);
        let err = auth.auth_cookie("alice", false, "", t0()).unwrap_err();
        assert_eq!(err, TicketError::EncodeFailed);
    }

    #[test]
    fn test_sign_out_cookie() {
        let cookie = forms(FormsConfig::default()).sign_out_cookie();
        assert!(cookie.value.is_empty());
        assert_eq!(
            cookie.to_header_value(),
            ".ASPXAUTH=; Path=/; Expires=Tue, 12 Oct 1999 00:00:00 GMT; HttpOnly"
        );
    }

    #[test]
    fn test_uri_mode_uses_url_tokens() {
        let config = FormsConfig {
            cookieless: CookielessMode::UseUri,
            ..Default::default()
        };
        let auth = forms(config);
        let (ticket, cookie) = auth.auth_cookie("alice", false, "", t0()).unwrap();
        assert_eq!(TicketEncoding::detect(&cookie.value), TicketEncoding::UrlToken);
        assert_eq!(auth.decrypt(&cookie.value).unwrap(), Some(ticket));
    }

    #[test]
    fn test_authenticate_anonymous_and_rejected() {
        let auth = forms(FormsConfig::default());
        assert_eq!(auth.authenticate_request(None, t0()), AuthOutcome::Anonymous);
        assert_eq!(auth.authenticate_request(Some(""), t0()), AuthOutcome::Anonymous);
        assert_eq!(
            auth.authenticate_request(Some("deadbeef"), t0()),
            AuthOutcome::Rejected
        );
        let oversized = "a".repeat(codec::MAX_TICKET_LENGTH + 1);
        assert_eq!(
            auth.authenticate_request(Some(&oversized), t0()),
            AuthOutcome::Rejected
        );
    }

    #[test]
    fn test_authenticate_fresh_ticket() {
        let auth = forms(FormsConfig::default());
        let (ticket, cookie) = auth.auth_cookie("alice", false, "", t0()).unwrap();
        let outcome = auth.authenticate_request(Some(&cookie.value), t0() + Duration::minutes(5));
        assert_eq!(
            outcome,
            AuthOutcome::Authenticated {
                ticket,
                refreshed: None
            }
        );
    }

    #[test]
    fn test_authenticate_sliding_renewal() {
        let auth = forms(FormsConfig::default());
        let (_, cookie) = auth.auth_cookie("alice", false, "", t0()).unwrap();
        let now = t0() + Duration::minutes(20);

        match auth.authenticate_request(Some(&cookie.value), now) {
            AuthOutcome::Authenticated {
                ticket,
                refreshed: Some(refreshed),
            } => {
                assert_eq!(ticket.issue_date, now);
                assert_eq!(ticket.expiration, now + Duration::minutes(30));
                assert_eq!(auth.decrypt(&refreshed.value).unwrap(), Some(ticket));
            }
            other => panic!("expected renewal, got {:?}", other),
        }
    }

    #[test]
    fn test_authenticate_without_sliding_expiration() {
        let config = FormsConfig {
            sliding_expiration: false,
            ..Default::default()
        };
        let auth = forms(config);
        let (ticket, cookie) = auth.auth_cookie("alice", false, "", t0()).unwrap();
        let outcome = auth.authenticate_request(Some(&cookie.value), t0() + Duration::minutes(20));
        assert_eq!(
            outcome,
            AuthOutcome::Authenticated {
                ticket,
                refreshed: None
            }
        );
    }

    #[test]
    fn test_authenticate_expired() {
        let auth = forms(FormsConfig::default());
        let (ticket, cookie) = auth.auth_cookie("alice", false, "", t0()).unwrap();
        let outcome = auth.authenticate_request(Some(&cookie.value), t0() + Duration::minutes(31));
        assert_eq!(outcome, AuthOutcome::Expired(ticket));
    }

    #[test]
    fn test_protection_mismatch_is_rejected() {
        let signing = forms(FormsConfig {
            protection: ProtectionMode::None,
            ..Default::default()
        });
        let (_, cookie) = signing.auth_cookie("alice", false, "", t0()).unwrap();

        let strict = forms(FormsConfig::default());
        assert_eq!(
            strict.authenticate_request(Some(&cookie.value), t0()),
            AuthOutcome::Rejected
        );
    }

    #[test]
    fn test_redirect_url() {
        let auth = forms(FormsConfig::default());
        assert_eq!(auth.redirect_url(Some("/orders/42")), "/orders/42");
        assert_eq!(auth.redirect_url(None), "/default.aspx");
        assert_eq!(auth.redirect_url(Some("")), "/default.aspx");
        assert_eq!(auth.redirect_url(Some("//evil.example")), "/default.aspx");
        assert_eq!(auth.redirect_url(Some("/\\evil.example")), "/default.aspx");
        assert_eq!(auth.redirect_url(Some("https://other.example/")), "/default.aspx");
        assert_eq!(auth.redirect_url(Some("javascript:alert(1)")), "/default.aspx");
        assert_eq!(auth.redirect_url(Some("/a\r\nSet-Cookie: x")), "/default.aspx");
    }

    #[test]
    fn test_cross_app_redirect() {
        let auth = forms(FormsConfig {
            enable_cross_app_redirects: true,
            ..Default::default()
        });
        assert_eq!(
            auth.redirect_url(Some("https://other.example/home")),
            "https://other.example/home"
        );
        assert_eq!(auth.redirect_url(Some("ftp://other.example/")), "/default.aspx");
    }

    #[test]
    fn test_login_redirect() {
        let auth = forms(FormsConfig::default());
        assert_eq!(
            auth.login_redirect("/orders/42?tab=items"),
            "/login.aspx?ReturnUrl=%2Forders%2F42%3Ftab%3Ditems"
        );

        let auth = forms(FormsConfig {
            login_url: "/account/login?theme=dark".to_string(),
            ..Default::default()
        });
        assert_eq!(
            auth.login_redirect("/é"),
            "/account/login?theme=dark&ReturnUrl=%2F%C3%A9"
        );
    }
}
