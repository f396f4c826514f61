//! Forms authentication tickets.
//!
//! A ticket records an authenticated user and a validity window. It is
//! serialized to a compact binary layout, optionally MAC'd and encrypted
//! with the site's machine key, and carried as hex or a URL token in a
//! cookie or URL.
//!
//! ```
//! use chrono::Utc;
//! use formsauth::{config::FormsConfig, crypto::MachineKey, forms::FormsAuth};
//!
//! let auth = FormsAuth::new(FormsConfig::default(), MachineKey::generate()?);
//! let (ticket, cookie) = auth.auth_cookie("alice", false, "", Utc::now())?;
//! assert_eq!(auth.decrypt(&cookie.value)?, Some(ticket));
//! # Ok::<(), formsauth::error::TicketError>(())
//! ```

pub mod audit;
pub mod codec;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod forms;
pub mod layout;
pub mod ticket;
pub mod url_token;

pub use codec::{ProtectionMode, TicketEncoding, MAX_TICKET_LENGTH};
pub use error::TicketError;
pub use forms::{AuthCookie, AuthOutcome, FormsAuth};
pub use ticket::AuthTicket;
