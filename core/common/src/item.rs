//! Remote item model.
//!
//! [`DriveFile`] mirrors the JSON the Drive v3 API returns; [`Item`] is the
//! validated form the engines work with. Conversion fails when a field the
//! engines depend on is absent, so later decisions never need to re-fetch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// MIME type Drive uses for folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
/// MIME type Drive uses for shortcuts.
pub const SHORTCUT_MIME_TYPE: &str = "application/vnd.google-apps.shortcut";

/// Shortcut target as reported by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortcutDetails {
    /// ID of the item the shortcut points to.
    pub target_id: String,
    /// MIME type of the target.
    #[serde(default)]
    pub target_mime_type: Option<String>,
}

/// A user entry in the `owners` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveUser {
    /// E-mail address; absent for some service accounts.
    #[serde(default)]
    pub email_address: Option<String>,
    /// Display name.
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Google Drive file metadata from API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    /// File ID.
    pub id: String,
    /// File name.
    pub name: String,
    /// MIME type.
    pub mime_type: String,
    /// File size in bytes, encoded as a string by the API.
    #[serde(default)]
    pub size: Option<String>,
    /// Modified time.
    #[serde(default)]
    pub modified_time: Option<DateTime<Utc>>,
    /// Parent folder IDs.
    #[serde(default)]
    pub parents: Vec<String>,
    /// MD5 checksum (only for binary content).
    #[serde(default)]
    pub md5_checksum: Option<String>,
    /// Trashed status.
    #[serde(default)]
    pub trashed: bool,
    /// Present on shortcuts only.
    #[serde(default)]
    pub shortcut_details: Option<ShortcutDetails>,
    /// Owners; empty for items in shared drives.
    #[serde(default)]
    pub owners: Vec<DriveUser>,
    /// Browser link to the item.
    #[serde(default)]
    pub web_view_link: Option<String>,
}

/// Kind of item a shortcut resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetKind {
    /// The target is a folder.
    Folder,
    /// The target is a file with the given MIME type.
    File {
        /// MIME type of the target.
        mime_type: String,
    },
}

/// Kind of a remote item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    /// A folder.
    Folder,
    /// A regular file or native document.
    File {
        /// MIME type of the content.
        mime_type: String,
    },
    /// An alias to another item.
    Shortcut {
        /// ID of the target item.
        target_id: String,
        /// Kind of the target item.
        target_kind: TargetKind,
    },
}

/// Coarse item kind used when matching destination items by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KindClass {
    /// Folders.
    Folder,
    /// Files of any MIME type.
    File,
    /// Shortcuts to anything.
    Shortcut,
}

impl ItemKind {
    /// Coarse class of this kind.
    pub fn class(&self) -> KindClass {
        match self {
            ItemKind::Folder => KindClass::Folder,
            ItemKind::File { .. } => KindClass::File,
            ItemKind::Shortcut { .. } => KindClass::Shortcut,
        }
    }

    /// MIME type as the API spells it.
    pub fn mime_type(&self) -> &str {
        match self {
            ItemKind::Folder => FOLDER_MIME_TYPE,
            ItemKind::File { mime_type } => mime_type,
            ItemKind::Shortcut { .. } => SHORTCUT_MIME_TYPE,
        }
    }
}

/// A validated remote item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Opaque, stable ID.
    pub id: String,
    /// Name; not unique among siblings.
    pub name: String,
    /// Folder, file or shortcut.
    pub kind: ItemKind,
    /// Parent folder IDs.
    pub parents: Vec<String>,
    /// Last modification time.
    pub modified_time: DateTime<Utc>,
    /// Size in bytes (files only).
    pub size: Option<u64>,
    /// Content checksum, when the store can verify the content.
    pub content_hash: Option<String>,
    /// Owner e-mail addresses embedded in the item metadata.
    pub owners: Vec<String>,
    /// Browser link to the item.
    pub web_view_link: Option<String>,
}

impl Item {
    /// Check if this is a folder.
    pub fn is_folder(&self) -> bool {
        matches!(self.kind, ItemKind::Folder)
    }

    /// Link that opens the item in a browser.
    pub fn link(&self) -> String {
        match &self.web_view_link {
            Some(link) => link.clone(),
            None => match self.kind {
                ItemKind::Folder => {
                    format!("https://drive.google.com/drive/folders/{}", self.id)
                }
                _ => format!("https://drive.google.com/file/d/{}/view", self.id),
            },
        }
    }
}

impl TryFrom<DriveFile> for Item {
    type Error = Error;

    fn try_from(file: DriveFile) -> Result<Self> {
        let modified_time = file.modified_time.ok_or_else(|| Error::MissingField {
            id: file.id.clone(),
            field: "modifiedTime",
        })?;

        let kind = match file.mime_type.as_str() {
            FOLDER_MIME_TYPE => ItemKind::Folder,
            SHORTCUT_MIME_TYPE => {
                let details = file.shortcut_details.ok_or_else(|| Error::MissingField {
                    id: file.id.clone(),
                    field: "shortcutDetails",
                })?;
                let target_mime = details.target_mime_type.ok_or_else(|| Error::MissingField {
                    id: file.id.clone(),
                    field: "shortcutDetails.targetMimeType",
                })?;
                let target_kind = if target_mime == FOLDER_MIME_TYPE {
                    TargetKind::Folder
                } else {
                    TargetKind::File {
                        mime_type: target_mime,
                    }
                };
                ItemKind::Shortcut {
                    target_id: details.target_id,
                    target_kind,
                }
            }
            _ => ItemKind::File {
                mime_type: file.mime_type,
            },
        };

        Ok(Item {
            id: file.id,
            name: file.name,
            kind,
            parents: file.parents,
            modified_time,
            size: file.size.as_ref().and_then(|s| s.parse().ok()),
            content_hash: file.md5_checksum,
            owners: file
                .owners
                .into_iter()
                .filter_map(|owner| owner.email_address)
                .collect(),
            web_view_link: file.web_view_link,
        })
    }
}

/// What to create with `RemoteStore::create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewKind {
    /// An empty folder.
    Folder,
    /// A shortcut pointing at `target_id`.
    Shortcut {
        /// ID of the item to point at.
        target_id: String,
    },
}

/// Metadata for a new remote item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    /// Name of the new item.
    pub name: String,
    /// Parent folder IDs.
    pub parents: Vec<String>,
    /// Folder or shortcut.
    pub kind: NewKind,
}

impl NewItem {
    /// A folder named `name` under `parent`.
    pub fn folder(name: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parents: vec![parent.into()],
            kind: NewKind::Folder,
        }
    }

    /// A shortcut named `name` under `parent` pointing at `target_id`.
    pub fn shortcut(
        name: impl Into<String>,
        parent: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            parents: vec![parent.into()],
            kind: NewKind::Shortcut {
                target_id: target_id.into(),
            },
        }
    }

    /// Request body for `files.create`.
    pub fn to_json(&self) -> serde_json::Value {
        match &self.kind {
            NewKind::Folder => serde_json::json!({
                "name": self.name,
                "mimeType": FOLDER_MIME_TYPE,
                "parents": self.parents,
            }),
            NewKind::Shortcut { target_id } => serde_json::json!({
                "name": self.name,
                "mimeType": SHORTCUT_MIME_TYPE,
                "parents": self.parents,
                "shortcutDetails": { "targetId": target_id },
            }),
        }
    }
}

/// Permission role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    /// Owner of a My Drive item.
    Owner,
    /// Manager of a shared drive.
    Organizer,
    /// Content manager of a shared drive.
    FileOrganizer,
    /// Editor.
    Writer,
    /// Commenter.
    Commenter,
    /// Viewer.
    Reader,
    /// A role this client does not know about.
    #[serde(other)]
    Unknown,
}

/// One entry of an item's permission list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    /// E-mail of the grantee; absent for `anyone` and domain grants.
    #[serde(default, rename = "emailAddress")]
    pub email: Option<String>,
    /// Granted role.
    pub role: Role,
}

impl Permission {
    /// Build a user permission.
    pub fn user(email: impl Into<String>, role: Role) -> Self {
        Self {
            email: Some(email.into()),
            role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive_file(mime_type: &str) -> DriveFile {
        DriveFile {
            id: "1".to_string(),
            name: "name".to_string(),
            mime_type: mime_type.to_string(),
            size: None,
            modified_time: Some(Utc::now()),
            parents: vec!["root".to_string()],
            md5_checksum: None,
            trashed: false,
            shortcut_details: None,
            owners: vec![],
            web_view_link: None,
        }
    }

    #[test]
    fn test_folder_conversion() {
        let item = Item::try_from(drive_file(FOLDER_MIME_TYPE)).unwrap();
        assert!(item.is_folder());
        assert_eq!(item.kind.class(), KindClass::Folder);
    }

    #[test]
    fn test_file_conversion_parses_size() {
        let mut file = drive_file("text/plain");
        file.size = Some("12345".to_string());
        file.md5_checksum = Some("abc".to_string());
        file.owners = vec![DriveUser {
            email_address: Some("a@example.com".to_string()),
            display_name: None,
        }];

        let item = Item::try_from(file).unwrap();
        assert_eq!(item.size, Some(12345));
        assert_eq!(item.content_hash.as_deref(), Some("abc"));
        assert_eq!(item.owners, vec!["a@example.com".to_string()]);
        assert_eq!(item.kind.mime_type(), "text/plain");
    }

    #[test]
    fn test_shortcut_conversion() {
        let mut file = drive_file(SHORTCUT_MIME_TYPE);
        file.shortcut_details = Some(ShortcutDetails {
            target_id: "target".to_string(),
            target_mime_type: Some(FOLDER_MIME_TYPE.to_string()),
        });

        let item = Item::try_from(file).unwrap();
        assert_eq!(
            item.kind,
            ItemKind::Shortcut {
                target_id: "target".to_string(),
                target_kind: TargetKind::Folder,
            }
        );
    }

    #[test]
    fn test_shortcut_without_details_fails() {
        let err = Item::try_from(drive_file(SHORTCUT_MIME_TYPE)).unwrap_err();
        assert!(matches!(
            err,
            Error::MissingField {
                field: "shortcutDetails",
                ..
            }
        ));
    }

    #[test]
    fn test_missing_modified_time_fails() {
        let mut file = drive_file("text/plain");
        file.modified_time = None;
        assert!(matches!(
            Item::try_from(file),
            Err(Error::MissingField {
                field: "modifiedTime",
                ..
            })
        ));
    }

    #[test]
    fn test_wire_deserialization() {
        let json = r#"{
            "id": "abc",
            "name": "report.pdf",
            "mimeType": "application/pdf",
            "size": "100",
            "modifiedTime": "2024-03-01T10:00:00.000Z",
            "parents": ["p1"],
            "md5Checksum": "d41d8cd98f00b204e9800998ecf8427e",
            "owners": [{"emailAddress": "owner@example.com", "displayName": "Owner"}],
            "webViewLink": "https://drive.google.com/file/d/abc/view"
        }"#;

        let file: DriveFile = serde_json::from_str(json).unwrap();
        let item = Item::try_from(file).unwrap();
        assert_eq!(item.name, "report.pdf");
        assert_eq!(item.owners, vec!["owner@example.com".to_string()]);
        assert_eq!(item.link(), "https://drive.google.com/file/d/abc/view");
    }

    #[test]
    fn test_permission_roles() {
        let json = r#"[
            {"emailAddress": "o@example.com", "role": "owner"},
            {"role": "reader", "type": "anyone"},
            {"emailAddress": "x@example.com", "role": "somethingNew"}
        ]"#;
        let perms: Vec<Permission> = serde_json::from_str(json).unwrap();
        assert_eq!(perms[0], Permission::user("o@example.com", Role::Owner));
        assert_eq!(perms[1].email, None);
        assert_eq!(perms[2].role, Role::Unknown);
    }

    #[test]
    fn test_new_shortcut_body() {
        let body = NewItem::shortcut("alias", "dest", "target").to_json();
        assert_eq!(body["mimeType"], SHORTCUT_MIME_TYPE);
        assert_eq!(body["shortcutDetails"]["targetId"], "target");
        assert_eq!(body["parents"][0], "dest");
    }
}
