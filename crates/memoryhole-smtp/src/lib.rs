//! # memoryhole-smtp
//!
//! A small async SMTP submission client (RFC 5321 subset) used to hand
//! intake notifications to a relay.
//!
//! ## Features
//!
//! - **Type-state sessions**: a message can only be written after the
//!   envelope has a sender and at least one recipient
//! - **Transport security**: plain TCP, STARTTLS upgrade, or implicit TLS
//! - **Relay bridges**: optional acceptance of self-signed certificates for
//!   local bridges listening on loopback
//! - **Authentication**: AUTH PLAIN
//!
//! ## Quick Start
//!
//! ```ignore
//! use memoryhole_smtp::{Address, Session, TlsPolicy};
//! use memoryhole_smtp::connection::connect;
//!
//! # async fn run() -> memoryhole_smtp::Result<()> {
//! let stream = connect("127.0.0.1", 1025).await?;
//! let session = Session::greet(stream).await?.ehlo("localhost").await?;
//! let session = session.auth_plain("user", "secret").await?;
//!
//! let session = session
//!     .mail_from(Address::new("intake@example.org")?)
//!     .await?
//!     .rcpt_to(Address::new("legal@example.org")?)
//!     .await?;
//!
//! let (session, _reply) = session.data(b"Subject: hi\r\n\r\nhello\r\n").await?;
//! session.quit().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Session States
//!
//! ```text
//! Greeted ── ehlo() ──> Ready ── auth_plain() ──> Ready
//!                        │
//!                        └── mail_from() ──> Envelope ── rcpt_to() ──> Recipients
//!                                                                        │
//!                          Ready <──────────────── data() ───────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod types;

pub use connection::{
    Envelope, Greeted, Ready, Recipients, ServerInfo, Session, SmtpStream, TlsPolicy,
};
pub use error::{Error, Result};
pub use types::{Address, Extension, Reply, ReplyCode};
