//! Google Drive API client.

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::debug;

use drivemigrate_common::{DriveFile, Error, Item, NewItem, Permission, Query, Result};

use crate::store::{FileList, RemoteStore};

/// Google Drive API base URL.
pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Fields requested for every item.
///
/// Wide enough that no decision needs a second fetch: shortcut targets,
/// modification time, checksum, owners and link all arrive with the listing.
const ITEM_FIELDS: &str = "id,name,mimeType,size,modifiedTime,parents,md5Checksum,trashed,\
shortcutDetails(targetId,targetMimeType),owners(emailAddress,displayName),webViewLink";

/// Fields requested for listings.
const LIST_FIELDS: &str = "nextPageToken,files(id,name,mimeType,size,modifiedTime,parents,\
md5Checksum,trashed,shortcutDetails(targetId,targetMimeType),owners(emailAddress,displayName),\
webViewLink)";

/// Fields requested for permission listings.
const PERMISSION_FIELDS: &str = "nextPageToken,permissions(emailAddress,role,type)";

/// Page size for permission listings (API maximum).
const PERMISSION_PAGE_SIZE: &str = "100";

/// Reasons Drive reports with 403 that are not access refusals.
const RATE_LIMIT_REASONS: &[&str] = &["rateLimitExceeded", "userRateLimitExceeded"];

/// Response from listing files.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Response from listing permissions.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermissionListResponse {
    #[serde(default)]
    permissions: Vec<Permission>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: String,
}

/// Google Drive API client bound to one access token.
///
/// The client is never mutated after construction; a new session means a
/// new client (see [`DriveConnector`](super::DriveConnector)).
pub struct DriveClient {
    http: Client,
    access_token: String,
    base_url: String,
}

impl DriveClient {
    /// Create a new Drive client.
    pub fn new(access_token: impl Into<String>) -> Result<Self> {
        Self::with_base_url(access_token, DRIVE_API_BASE)
    }

    /// Create a client talking to a different endpoint (tests, proxies).
    pub fn with_base_url(
        access_token: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("drivemigrate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            access_token: access_token.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Attach credentials and the shared-drive capability flag.
    ///
    /// Without `supportsAllDrives` the API silently hides shared-drive
    /// items instead of failing.
    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.access_token)
            .query(&[("supportsAllDrives", "true")])
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> Result<reqwest::Response> {
        request.send().await.map_err(|e| {
            if e.is_connect() || e.is_request() {
                Error::SessionExpired(format!("Failed to {}: {}", action, e))
            } else {
                Error::Network(format!("Failed to {}: {}", action, e))
            }
        })
    }

    /// Handle API response with error checking.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| Error::Network(format!("Failed to parse response: {}", e)))
        } else {
            Err(Self::classify(response).await)
        }
    }

    /// Map a failed response to an error that keeps its cause.
    async fn classify(response: reqwest::Response) -> Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<ErrorEnvelope>(&body).ok();
        let message = parsed
            .as_ref()
            .map(|e| e.error.message.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or(body);
        let rate_limited = parsed.as_ref().is_some_and(|e| {
            e.error
                .errors
                .iter()
                .any(|d| RATE_LIMIT_REASONS.contains(&d.reason.as_str()))
        });

        match status {
            StatusCode::UNAUTHORIZED => Error::SessionExpired(message),
            StatusCode::FORBIDDEN if !rate_limited => Error::PermissionDenied(message),
            StatusCode::NOT_FOUND => Error::NotFound(message),
            _ => Error::Api {
                status: status.as_u16(),
                message,
            },
        }
    }

    async fn item_response(&self, response: reqwest::Response) -> Result<Item> {
        let file: DriveFile = self.handle_response(response).await?;
        Item::try_from(file)
    }
}

#[async_trait]
impl RemoteStore for DriveClient {
    async fn list(
        &self,
        query: &Query,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<FileList> {
        let q = query.to_string();
        let page_size = page_size.to_string();
        debug!(query = %q, page_token = ?page_token, "Listing files");

        let mut request = self.authorized(self.http.get(self.url("files"))).query(&[
            ("q", q.as_str()),
            ("fields", LIST_FIELDS),
            ("pageSize", page_size.as_str()),
            ("includeItemsFromAllDrives", "true"),
        ]);

        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = self.send(request, "list files").await?;
        let list: FileListResponse = self.handle_response(response).await?;

        let files = list
            .files
            .into_iter()
            .filter(|f| !f.trashed)
            .map(Item::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(FileList {
            files,
            next_page_token: list.next_page_token,
        })
    }

    async fn get(&self, id: &str) -> Result<Item> {
        let request = self
            .authorized(self.http.get(self.url(&format!("files/{}", id))))
            .query(&[("fields", ITEM_FIELDS)]);

        let response = self.send(request, "get file").await?;
        self.item_response(response).await
    }

    async fn create(&self, item: &NewItem) -> Result<Item> {
        let request = self
            .authorized(self.http.post(self.url("files")))
            .header(header::CONTENT_TYPE, "application/json")
            .query(&[("fields", ITEM_FIELDS)])
            .json(&item.to_json());

        let response = self.send(request, "create item").await?;
        self.item_response(response).await
    }

    async fn copy(&self, source_id: &str, new_parents: &[String], new_name: &str) -> Result<Item> {
        let metadata = serde_json::json!({
            "name": new_name,
            "parents": new_parents,
        });

        let request = self
            .authorized(
                self.http
                    .post(self.url(&format!("files/{}/copy", source_id))),
            )
            .header(header::CONTENT_TYPE, "application/json")
            .query(&[("fields", ITEM_FIELDS)])
            .json(&metadata);

        let response = self.send(request, "copy file").await?;
        self.item_response(response).await
    }

    async fn update(
        &self,
        id: &str,
        add_parents: &[String],
        remove_parents: &[String],
    ) -> Result<Item> {
        let mut request = self
            .authorized(self.http.patch(self.url(&format!("files/{}", id))))
            .header(header::CONTENT_TYPE, "application/json")
            .query(&[("fields", ITEM_FIELDS)]);

        if !add_parents.is_empty() {
            request = request.query(&[("addParents", add_parents.join(","))]);
        }
        if !remove_parents.is_empty() {
            request = request.query(&[("removeParents", remove_parents.join(","))]);
        }

        let response = self
            .send(request.json(&serde_json::json!({})), "update parents")
            .await?;
        self.item_response(response).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let request = self.authorized(self.http.delete(self.url(&format!("files/{}", id))));
        let response = self.send(request, "delete file").await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::classify(response).await)
        }
    }

    async fn list_permissions(&self, id: &str) -> Result<Vec<Permission>> {
        let url = self.url(&format!("files/{}/permissions", id));
        let mut permissions = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.authorized(self.http.get(&url)).query(&[
                ("fields", PERMISSION_FIELDS),
                ("pageSize", PERMISSION_PAGE_SIZE),
            ]);

            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = self.send(request, "list permissions").await?;
            let page: PermissionListResponse = self.handle_response(response).await?;
            permissions.extend(page.permissions);

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(permissions)
    }
}
