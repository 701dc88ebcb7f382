//! `DriveApi` over a Drive-v3-style REST API.
//!
//! # Responsibility
//! - Attach a bearer credential to every request.
//! - Translate HTTP statuses into `RemoteError` variants.
//! - Speak the multipart, media and resumable upload flavors.
//!
//! # Invariants
//! - Redirects are never followed: `308` is the resumable "range accepted,
//!   send more" answer and must reach `write_range`.
//! - `401/403` are connectivity failures, `404` is `NotFound`, `409` is
//!   `AlreadyExists`; every other non-success is a transport error.

use crate::remote::drive::{DriveApi, UploadTarget};
use crate::remote::{RemoteError, RemoteObjectHandle, RemoteResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE, LOCATION};
use reqwest::{redirect, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const DEFAULT_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const SNAPSHOT_MIME: &str = "application/json";
const FILE_FIELDS: &str = "id,name,size,modifiedTime";
const LIST_FIELDS: &str = "nextPageToken,files(id,name,size,modifiedTime)";
const LIST_PAGE_SIZE: &str = "1000";
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Supplies a bearer credential on demand.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn bearer_token(&self) -> RemoteResult<String>;
}

/// Fixed token, e.g. read from the environment by the CLI.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn bearer_token(&self) -> RemoteResult<String> {
        if self.0.trim().is_empty() {
            return Err(RemoteError::Connectivity("no access token configured".to_string()));
        }
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    size: Option<String>,
    modified_time: Option<DateTime<Utc>>,
}

impl DriveFile {
    fn into_handle(self) -> RemoteObjectHandle {
        RemoteObjectHandle {
            id: self.id,
            name: self.name,
            size: self
                .size
                .and_then(|size| size.parse::<u64>().ok())
                .unwrap_or(0),
            last_modified: self.modified_time.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

/// HTTP implementation of `DriveApi`.
pub struct HttpDriveApi {
    client: Client,
    api_base: String,
    upload_base: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpDriveApi {
    pub fn new(
        api_base: impl Into<String>,
        upload_base: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> RemoteResult<Self> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|err| RemoteError::transport("client_build", None, err.to_string()))?;
        Ok(Self {
            client,
            api_base: trim_base(api_base.into()),
            upload_base: trim_base(upload_base.into()),
            credentials,
        })
    }

    async fn send(&self, operation: &'static str, request: RequestBuilder) -> RemoteResult<Response> {
        let token = self.credentials.bearer_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| send_error(operation, err))?;
        classify(operation, response).await
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> RemoteResult<T> {
        let response = self.send(operation, request).await?;
        response
            .json::<T>()
            .await
            .map_err(|err| RemoteError::InvalidResponse(format!("{operation}: {err}")))
    }

    async fn query_files(
        &self,
        operation: &'static str,
        query: &str,
        page_token: Option<&str>,
    ) -> RemoteResult<DriveFileList> {
        let mut params = vec![
            ("q", query),
            ("fields", LIST_FIELDS),
            ("spaces", "drive"),
            ("pageSize", LIST_PAGE_SIZE),
            ("orderBy", "modifiedTime desc"),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }
        let request = self
            .client
            .get(format!("{}/files", self.api_base))
            .query(&params);
        self.send_json(operation, request).await
    }
}

#[async_trait]
impl DriveApi for HttpDriveApi {
    async fn check_access(&self) -> RemoteResult<()> {
        let request = self
            .client
            .get(format!("{}/about", self.api_base))
            .query(&[("fields", "user")]);
        self.send("check_access", request).await.map(|_| ())
    }

    async fn find_folder(&self, name: &str) -> RemoteResult<Option<String>> {
        let query = format!(
            "name = '{}' and mimeType = '{FOLDER_MIME}' and trashed = false",
            escape_query(name)
        );
        let list = self.query_files("find_folder", &query, None).await?;
        Ok(list.files.into_iter().next().map(|file| file.id))
    }

    async fn create_folder(&self, name: &str) -> RemoteResult<String> {
        let request = self
            .client
            .post(format!("{}/files", self.api_base))
            .query(&[("fields", FILE_FIELDS)])
            .json(&json!({ "name": name, "mimeType": FOLDER_MIME }));
        let file: DriveFile = self.send_json("create_folder", request).await?;
        Ok(file.id)
    }

    async fn find_file(
        &self,
        folder_id: &str,
        name: &str,
    ) -> RemoteResult<Option<RemoteObjectHandle>> {
        let query = format!(
            "name = '{}' and '{}' in parents and trashed = false",
            escape_query(name),
            escape_query(folder_id)
        );
        let list = self.query_files("find_file", &query, None).await?;
        Ok(list.files.into_iter().next().map(DriveFile::into_handle))
    }

    async fn list_folder(&self, folder_id: &str) -> RemoteResult<Vec<RemoteObjectHandle>> {
        let query = format!("'{}' in parents and trashed = false", escape_query(folder_id));
        let mut handles = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let list = self
                .query_files("list_folder", &query, page_token.as_deref())
                .await?;
            handles.extend(list.files.into_iter().map(DriveFile::into_handle));
            match list.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(handles)
    }

    async fn write_simple(
        &self,
        target: UploadTarget<'_>,
        data: &[u8],
    ) -> RemoteResult<RemoteObjectHandle> {
        let request = match target {
            UploadTarget::Create { folder_id, name } => {
                let boundary = format!("quillbox-{}", Uuid::new_v4().simple());
                let metadata = json!({ "name": name, "parents": [folder_id] }).to_string();
                self.client
                    .post(format!("{}/files", self.upload_base))
                    .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
                    .header(
                        CONTENT_TYPE,
                        format!("multipart/related; boundary={boundary}"),
                    )
                    .body(multipart_related_body(&boundary, metadata.as_bytes(), data))
            }
            UploadTarget::Replace { file_id, .. } => self
                .client
                .patch(format!("{}/files/{file_id}", self.upload_base))
                .query(&[("uploadType", "media"), ("fields", FILE_FIELDS)])
                .header(CONTENT_TYPE, SNAPSHOT_MIME)
                .body(data.to_vec()),
        };
        let file: DriveFile = self.send_json("upload", request).await?;
        Ok(file.into_handle())
    }

    async fn open_session(
        &self,
        target: UploadTarget<'_>,
        total_len: u64,
    ) -> RemoteResult<String> {
        let request = match target {
            UploadTarget::Create { folder_id, name } => self
                .client
                .post(format!("{}/files", self.upload_base))
                .json(&json!({ "name": name, "parents": [folder_id] })),
            UploadTarget::Replace { file_id, .. } => self
                .client
                .patch(format!("{}/files/{file_id}", self.upload_base))
                .json(&json!({})),
        }
        .query(&[("uploadType", "resumable"), ("fields", FILE_FIELDS)])
        .header("X-Upload-Content-Type", SNAPSHOT_MIME)
        .header("X-Upload-Content-Length", total_len.to_string());

        let response = self.send("open_session", request).await?;
        response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                RemoteError::InvalidResponse("upload session response has no Location".to_string())
            })
    }

    async fn write_range(
        &self,
        session: &str,
        offset: u64,
        chunk: &[u8],
        total_len: u64,
    ) -> RemoteResult<Option<RemoteObjectHandle>> {
        let request = self
            .client
            .put(session)
            .header(CONTENT_RANGE, content_range(offset, chunk.len() as u64, total_len))
            .body(chunk.to_vec());
        let response = self.send("write_range", request).await?;
        if response.status() == StatusCode::PERMANENT_REDIRECT {
            return Ok(None);
        }
        let file = response
            .json::<DriveFile>()
            .await
            .map_err(|err| RemoteError::InvalidResponse(format!("write_range: {err}")))?;
        Ok(Some(file.into_handle()))
    }

    async fn read_content(&self, file_id: &str) -> RemoteResult<Vec<u8>> {
        let request = self
            .client
            .get(format!("{}/files/{file_id}", self.api_base))
            .query(&[("alt", "media")]);
        let response = self.send("download", request).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| RemoteError::transport("download", None, err.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn delete_file(&self, file_id: &str) -> RemoteResult<()> {
        let request = self
            .client
            .delete(format!("{}/files/{file_id}", self.api_base));
        match self.send("delete", request).await {
            Ok(_) | Err(RemoteError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

fn trim_base(base: String) -> String {
    base.trim_end_matches('/').to_string()
}

fn send_error(operation: &'static str, err: reqwest::Error) -> RemoteError {
    if err.is_connect() || err.is_timeout() {
        RemoteError::Connectivity(format!("{operation}: {err}"))
    } else {
        RemoteError::transport(operation, None, err.to_string())
    }
}

async fn classify(operation: &'static str, response: Response) -> RemoteResult<Response> {
    let status = response.status();
    if status.is_success() || status == StatusCode::PERMANENT_REDIRECT {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let body = body.chars().take(MAX_ERROR_BODY_CHARS).collect::<String>();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            RemoteError::Connectivity(format!("{operation} rejected with status {status}"))
        }
        StatusCode::NOT_FOUND => RemoteError::NotFound(operation.to_string()),
        StatusCode::CONFLICT => RemoteError::AlreadyExists(operation.to_string()),
        other => RemoteError::transport(operation, Some(other.as_u16()), body),
    })
}

fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn content_range(offset: u64, len: u64, total_len: u64) -> String {
    format!("bytes {offset}-{}/{total_len}", offset + len.saturating_sub(1))
}

fn multipart_related_body(boundary: &str, metadata: &[u8], data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(metadata.len() + data.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata);
    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(format!("Content-Type: {SNAPSHOT_MIME}\r\n\r\n").as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::{content_range, escape_query, multipart_related_body, trim_base, StaticToken};
    use crate::remote::http::CredentialProvider;
    use crate::remote::RemoteError;

    #[test]
    fn content_range_is_inclusive() {
        let five_mib = 5 * 1024 * 1024;
        assert_eq!(
            content_range(0, five_mib, 2 * five_mib),
            "bytes 0-5242879/10485760"
        );
        assert_eq!(
            content_range(five_mib, five_mib, 2 * five_mib),
            "bytes 5242880-10485759/10485760"
        );
    }

    #[test]
    fn query_values_escape_quotes() {
        assert_eq!(escape_query("Writer's backups"), "Writer\\'s backups");
        assert_eq!(escape_query("a\\b"), "a\\\\b");
    }

    #[test]
    fn multipart_body_wraps_metadata_and_payload() {
        let body = multipart_related_body("xyz", br#"{"name":"a.json"}"#, b"{}");
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with("--xyz\r\n"));
        assert!(text.contains("{\"name\":\"a.json\"}\r\n--xyz\r\n"));
        assert!(text.ends_with("{}\r\n--xyz--\r\n"));
    }

    #[test]
    fn bases_drop_trailing_slash() {
        assert_eq!(trim_base("https://x/drive/v3/".to_string()), "https://x/drive/v3");
    }

    #[tokio::test]
    async fn empty_static_token_is_a_connectivity_error() {
        let err = StaticToken::new("  ").bearer_token().await.unwrap_err();
        assert!(matches!(err, RemoteError::Connectivity(_)));
        assert_eq!(StaticToken::new("abc").bearer_token().await.unwrap(), "abc");
    }
}
