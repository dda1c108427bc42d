//! Google Drive backend.
//!
//! This module provides:
//! - A [`RemoteStore`](crate::RemoteStore) implementation over the Drive v3 REST API
//! - OAuth2 credentials with an on-disk token cache and automatic refresh
//! - A connector that builds a fresh client for every new session

pub mod auth;
pub mod client;

pub use auth::{
    Authenticator, ClientSecrets, DriveConnector, InstalledAppFlow, TokenFile, Tokens,
    DRIVE_SCOPE,
};
pub use client::{DriveClient, DRIVE_API_BASE};
