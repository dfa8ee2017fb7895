use serde::{Deserialize, Serialize};

/// Kind of object a file handle is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileHandleAssociateType {
    FileEntity,
    TableEntity,
    WikiAttachment,
    WikiMarkdown,
    UserProfileAttachment,
    MessageAttachment,
    TeamAttachment,
    SubmissionAttachment,
    VerificationSubmission,
}

/// Identifies a file handle through the object that grants access to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileHandleAssociation {
    pub file_handle_id: String,
    pub associate_object_id: String,
    pub associate_object_type: FileHandleAssociateType,
}

/// Metadata of a stored file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileHandle {
    pub id: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concrete_type: Option<String>,
}

/// A file handle together with a freshly signed GET URL.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadLocation {
    pub file_handle: FileHandle,
    pub pre_signed_url: String,
}
