//! HTTP transport for the open document platform.
//!
//! Authenticates with a tenant access token that is cached and refreshed
//! shortly before it expires. Block JSON is translated to and from
//! `DocumentBlock` here so the store never sees wire shapes.

use super::{DocumentApi, EntryKind, RemoteEntry, RemoteError, RemoteResult};
use crate::model::document::{CodeLanguage, DocumentBlock};
use chrono::{DateTime, Utc};
use log::{debug, info};
use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);
const FOLDER_PAGE_SIZE: usize = 200;
const BLOCK_PAGE_SIZE: usize = 500;

const BLOCK_PAGE: u32 = 1;
const BLOCK_TEXT: u32 = 2;
const BLOCK_HEADING_FIRST: u32 = 3;
const BLOCK_HEADING_LAST: u32 = 11;
const BLOCK_CODE: u32 = 14;
const BLOCK_IMAGE: u32 = 27;
const LANGUAGE_PLAIN_TEXT: u32 = 1;
const LANGUAGE_JSON: u32 = 25;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TokenReply {
    code: i64,
    #[serde(default)]
    msg: String,
    tenant_access_token: Option<String>,
    #[serde(default)]
    expire: u64,
}

#[derive(Debug, Deserialize)]
struct FilePage {
    #[serde(default)]
    files: Vec<FileItem>,
    #[serde(default)]
    has_more: bool,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileItem {
    token: String,
    name: String,
    #[serde(rename = "type")]
    kind: String,
    modified_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FolderCreated {
    token: String,
}

#[derive(Debug, Deserialize)]
struct DocumentCreated {
    document: DocumentInfo,
}

#[derive(Debug, Deserialize)]
struct DocumentInfo {
    document_id: String,
}

#[derive(Debug, Deserialize)]
struct BlockPage {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(default)]
    has_more: bool,
    page_token: Option<String>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// `DocumentApi` over HTTPS with blocking `reqwest` calls.
pub struct HttpDocumentApi {
    client: Client,
    base_url: String,
    app_id: String,
    app_secret: String,
    token: Mutex<Option<CachedToken>>,
}

impl HttpDocumentApi {
    pub fn new(
        base_url: impl Into<String>,
        app_id: impl Into<String>,
        app_secret: impl Into<String>,
        timeout: Duration,
    ) -> RemoteResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            app_id: app_id.into(),
            app_secret: app_secret.into(),
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Returns a valid tenant token, fetching a new one near expiry.
    fn access_token(&self) -> RemoteResult<String> {
        let mut cached = self
            .token
            .lock()
            .map_err(|_| RemoteError::Auth("token cache lock poisoned".to_string()))?;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let reply: TokenReply = self
            .client
            .post(self.url("auth/v3/tenant_access_token/internal"))
            .json(&json!({ "app_id": self.app_id, "app_secret": self.app_secret }))
            .send()?
            .json()?;
        if reply.code != 0 {
            return Err(RemoteError::Auth(format!("code {}: {}", reply.code, reply.msg)));
        }
        let value = reply
            .tenant_access_token
            .ok_or_else(|| RemoteError::Auth("reply carried no token".to_string()))?;

        info!(
            "event=remote_auth module=storage backend=remote status=ok expire_secs={}",
            reply.expire
        );
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(reply.expire),
        });
        Ok(value)
    }

    /// Sends an authenticated request and unwraps the reply envelope.
    fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> RemoteResult<Option<T>> {
        let response = request.bearer_auth(self.access_token()?).send()?;
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(RemoteError::Auth(format!("HTTP {status}")));
        }
        if status.as_u16() == 404 {
            return Err(RemoteError::NotFound(response.url().path().to_string()));
        }

        let envelope: Envelope<T> = response.json()?;
        if envelope.code != 0 {
            return Err(RemoteError::Api {
                code: envelope.code,
                message: envelope.msg,
            });
        }
        Ok(envelope.data)
    }

    fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> RemoteResult<T> {
        self.call(request)?
            .ok_or_else(|| RemoteError::InvalidResponse("reply carried no data".to_string()))
    }
}

impl DocumentApi for HttpDocumentApi {
    fn list_folder(&self, folder_token: &str) -> RemoteResult<Vec<RemoteEntry>> {
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![
                ("folder_token", folder_token.to_string()),
                ("page_size", FOLDER_PAGE_SIZE.to_string()),
            ];
            if let Some(token) = page_token.take() {
                query.push(("page_token", token));
            }
            let page: FilePage = self.send(self.client.get(self.url("drive/v1/files")).query(&query))?;
            entries.extend(page.files.into_iter().map(|file| RemoteEntry {
                kind: match file.kind.as_str() {
                    "folder" => EntryKind::Folder,
                    "docx" => EntryKind::Document,
                    _ => EntryKind::Other,
                },
                modified_at: file.modified_time.as_deref().and_then(parse_epoch_seconds),
                token: file.token,
                name: file.name,
            }));

            match page.next_page_token {
                Some(next) if page.has_more && !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }
        debug!(
            "event=remote_list module=storage backend=remote status=ok count={}",
            entries.len()
        );
        Ok(entries)
    }

    fn create_folder(&self, parent_token: &str, name: &str) -> RemoteResult<String> {
        let created: FolderCreated = self.send(
            self.client
                .post(self.url("drive/v1/files/create_folder"))
                .json(&json!({ "name": name, "folder_token": parent_token })),
        )?;
        Ok(created.token)
    }

    fn create_document(&self, folder_token: &str, title: &str) -> RemoteResult<String> {
        let created: DocumentCreated = self.send(
            self.client
                .post(self.url("docx/v1/documents"))
                .json(&json!({ "folder_token": folder_token, "title": title })),
        )?;
        Ok(created.document.document_id)
    }

    fn append_blocks(&self, document: &str, blocks: &[DocumentBlock]) -> RemoteResult<()> {
        let children: Vec<Value> = blocks.iter().filter_map(block_to_json).collect();
        let path = format!("docx/v1/documents/{document}/blocks/{document}/children");
        self.call::<Value>(
            self.client
                .post(self.url(&path))
                .json(&json!({ "children": children, "index": -1 })),
        )?;
        Ok(())
    }

    fn read_blocks(
        &self,
        document: &str,
        limit: Option<usize>,
    ) -> RemoteResult<Vec<DocumentBlock>> {
        // The listing starts with the page block itself.
        let page_size = limit.map_or(BLOCK_PAGE_SIZE, |limit| (limit + 1).min(BLOCK_PAGE_SIZE));
        let path = format!("docx/v1/documents/{document}/blocks");
        let mut blocks = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("page_size", page_size.to_string())];
            if let Some(token) = page_token.take() {
                query.push(("page_token", token));
            }
            let page: BlockPage = self.send(self.client.get(self.url(&path)).query(&query))?;
            blocks.extend(page.items.iter().filter_map(block_from_json));

            if limit.is_some_and(|limit| blocks.len() >= limit) {
                break;
            }
            match page.page_token {
                Some(next) if page.has_more && !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        if let Some(limit) = limit {
            blocks.truncate(limit);
        }
        Ok(blocks)
    }

    fn delete_document(&self, document: &str) -> RemoteResult<()> {
        self.call::<Value>(
            self.client
                .delete(self.url(&format!("drive/v1/files/{document}")))
                .query(&[("type", "docx")]),
        )?;
        Ok(())
    }
}

fn parse_epoch_seconds(raw: &str) -> Option<DateTime<Utc>> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

fn text_elements(text: &str) -> Value {
    json!({ "elements": [{ "text_run": { "content": text } }] })
}

fn block_to_json(block: &DocumentBlock) -> Option<Value> {
    let value = match block {
        DocumentBlock::Text(text) => json!({ "block_type": BLOCK_TEXT, "text": text_elements(text) }),
        DocumentBlock::Heading { level, text } => {
            let level = u32::from((*level).clamp(1, 9));
            let mut value = json!({ "block_type": BLOCK_HEADING_FIRST + level - 1 });
            value[format!("heading{level}")] = text_elements(text);
            value
        }
        DocumentBlock::Code { language, text } => {
            let language = match language {
                CodeLanguage::PlainText => LANGUAGE_PLAIN_TEXT,
                CodeLanguage::Json => LANGUAGE_JSON,
                CodeLanguage::Other(code) => *code,
            };
            let mut code = text_elements(text);
            code["style"] = json!({ "language": language, "wrap": true });
            json!({ "block_type": BLOCK_CODE, "code": code })
        }
        DocumentBlock::Image { reference } => {
            json!({ "block_type": BLOCK_IMAGE, "image": { "token": reference } })
        }
        DocumentBlock::Other { .. } => return None,
    };
    Some(value)
}

fn element_text(body: Option<&Value>) -> String {
    body.and_then(|body| body.get("elements"))
        .and_then(Value::as_array)
        .map(|elements| {
            elements
                .iter()
                .filter_map(|element| element.pointer("/text_run/content"))
                .filter_map(Value::as_str)
                .collect::<String>()
        })
        .unwrap_or_default()
}

/// Translates one wire block. Page blocks are dropped.
fn block_from_json(value: &Value) -> Option<DocumentBlock> {
    let block_type = u32::try_from(value.get("block_type")?.as_u64()?).ok()?;
    let block = match block_type {
        BLOCK_PAGE => return None,
        BLOCK_TEXT => DocumentBlock::Text(element_text(value.get("text"))),
        BLOCK_HEADING_FIRST..=BLOCK_HEADING_LAST => {
            let level = block_type - BLOCK_HEADING_FIRST + 1;
            DocumentBlock::Heading {
                level: u8::try_from(level).unwrap_or(9),
                text: element_text(value.get(format!("heading{level}").as_str())),
            }
        }
        BLOCK_CODE => {
            let code = value.get("code");
            let language = code
                .and_then(|code| {
                    code.pointer("/style/language")
                        .or_else(|| code.get("language"))
                })
                .and_then(Value::as_u64)
                .and_then(|raw| u32::try_from(raw).ok())
                .map_or(CodeLanguage::PlainText, |raw| match raw {
                    LANGUAGE_PLAIN_TEXT => CodeLanguage::PlainText,
                    LANGUAGE_JSON => CodeLanguage::Json,
                    other => CodeLanguage::Other(other),
                });
            DocumentBlock::Code {
                language,
                text: element_text(code),
            }
        }
        BLOCK_IMAGE => DocumentBlock::Image {
            reference: value
                .pointer("/image/token")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        other => DocumentBlock::Other { block_type: other },
    };
    Some(block)
}
