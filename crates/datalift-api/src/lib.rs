//! datalift-api: authenticated control-plane REST client
//!
//! JSON over HTTPS with a short-lived bearer token. Every endpoint scopes to a
//! project via the `project` query parameter; non-2xx responses carry a
//! `{message}` body that becomes a hard failure for the affected file(s).

pub mod client;
pub mod models;

pub use client::ApiClient;
pub use models::{
    FileInfoRecord, FileInfoResponse, NewFileRequest, PrivateKeyResponse, PublicKeyResponse,
    S3Credentials, S3Info,
};
