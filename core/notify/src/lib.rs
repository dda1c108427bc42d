//! drivemigrate owner notifications
//!
//! Turns the owner list produced by ownership enumeration into one
//! ownership-transfer notice per owner, delivered through the Gmail API
//! as drafts or sent messages.

pub mod gmail;
pub mod message;
pub mod notifier;

pub use gmail::{GmailClient, Mailer, GMAIL_API_BASE, GMAIL_SCOPES};
pub use message::{compose, MimeMessage, NoticeTemplate};
pub use notifier::{read_owner_counts, DeliveryMode, NotifyReport, Notifier};
