#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use quillbox_core::remote::{
    DriveApi, DriveTransport, RemoteError, RemoteObjectHandle, RemoteResult, UploadTarget,
};
use quillbox_core::{open_db_in_memory, restore_snapshot, SharedConnection};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub const FOLDER: &str = "quillbox-backups";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallCounts {
    pub check_access: usize,
    pub find_folder: usize,
    pub create_folder: usize,
    pub find_file: usize,
    pub list_folder: usize,
    pub write_simple: usize,
    pub open_session: usize,
    pub write_range: usize,
    pub read_content: usize,
    pub delete_file: usize,
}

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub id: String,
    pub name: String,
    pub folder_id: String,
    pub data: Vec<u8>,
    pub modified: DateTime<Utc>,
}

impl StoredFile {
    fn handle(&self) -> RemoteObjectHandle {
        RemoteObjectHandle {
            id: self.id.clone(),
            name: self.name.clone(),
            size: self.data.len() as u64,
            last_modified: self.modified,
        }
    }
}

struct Session {
    folder_id: Option<String>,
    file_id: Option<String>,
    name: String,
    total_len: u64,
    received: Vec<u8>,
}

#[derive(Default)]
struct FakeState {
    folders: BTreeMap<String, String>,
    files: BTreeMap<String, StoredFile>,
    sessions: BTreeMap<String, Session>,
    calls: CallCounts,
    ranges: Vec<(u64, usize)>,
    next_id: u64,
    ticks: i64,
    offline: bool,
    failing_uploads: Vec<String>,
    fail_deletes: bool,
    fail_listing: bool,
    folder_race: bool,
}

impl FakeState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn tick(&mut self) -> DateTime<Utc> {
        self.ticks += 1;
        base_time() + ChronoDuration::seconds(self.ticks)
    }

    fn online(&self) -> RemoteResult<()> {
        if self.offline {
            return Err(RemoteError::Connectivity("fake drive offline".to_string()));
        }
        Ok(())
    }

    fn check_upload(&self, name: &str) -> RemoteResult<()> {
        if self.failing_uploads.iter().any(|failing| failing == name) {
            return Err(RemoteError::transport("upload", Some(500), "injected failure"));
        }
        Ok(())
    }

    fn store(
        &mut self,
        folder_id: Option<String>,
        file_id: Option<String>,
        name: &str,
        data: Vec<u8>,
    ) -> RemoteResult<RemoteObjectHandle> {
        let modified = self.tick();
        let file = match file_id {
            Some(file_id) => {
                let file = self
                    .files
                    .get_mut(&file_id)
                    .ok_or_else(|| RemoteError::NotFound(file_id.clone()))?;
                file.data = data;
                file.modified = modified;
                file.clone()
            }
            None => {
                let folder_id = folder_id.unwrap_or_default();
                let id = self.next_id("file");
                let file = StoredFile {
                    id: id.clone(),
                    name: name.to_string(),
                    folder_id,
                    data,
                    modified,
                };
                self.files.insert(id, file.clone());
                file
            }
        };
        Ok(file.handle())
    }
}

fn target_parts(target: UploadTarget<'_>) -> (Option<String>, Option<String>, String) {
    match target {
        UploadTarget::Create { folder_id, name } => {
            (Some(folder_id.to_string()), None, name.to_string())
        }
        UploadTarget::Replace { file_id, name } => {
            (None, Some(file_id.to_string()), name.to_string())
        }
    }
}

/// In-memory Drive that records every primitive request.
#[derive(Clone, Default)]
pub struct FakeDrive {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDrive {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn transport(&self) -> DriveTransport<FakeDrive> {
        DriveTransport::new(self.clone(), FOLDER)
    }

    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    pub fn fail_uploads_of(&self, name: &str) {
        self.state().failing_uploads.push(name.to_string());
    }

    pub fn clear_upload_failures(&self) {
        self.state().failing_uploads.clear();
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.state().fail_deletes = fail;
    }

    pub fn fail_listing(&self, fail: bool) {
        self.state().fail_listing = fail;
    }

    /// Next `create_folder` loses a race against another client.
    pub fn simulate_folder_race(&self) {
        self.state().folder_race = true;
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls.clone()
    }

    pub fn ranges(&self) -> Vec<(u64, usize)> {
        self.state().ranges.clone()
    }

    pub fn folder_count(&self) -> usize {
        self.state().folders.len()
    }

    /// File names in the backup folder, sorted.
    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state()
            .files
            .values()
            .map(|file| file.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn historical_names(&self) -> Vec<String> {
        self.file_names()
            .into_iter()
            .filter(|name| quillbox_core::remote::is_historical_name(name))
            .collect()
    }

    pub fn content(&self, name: &str) -> Option<Vec<u8>> {
        self.state()
            .files
            .values()
            .find(|file| file.name == name)
            .map(|file| file.data.clone())
    }

    /// Places a file in the backup folder (created if missing).
    pub fn seed_file(&self, name: &str, data: &[u8], modified: DateTime<Utc>) {
        let mut state = self.state();
        let folder_id = match state.folders.get(FOLDER) {
            Some(folder_id) => folder_id.clone(),
            None => {
                let folder_id = state.next_id("folder");
                state.folders.insert(FOLDER.to_string(), folder_id.clone());
                folder_id
            }
        };
        let id = state.next_id("file");
        state.files.insert(
            id.clone(),
            StoredFile {
                id,
                name: name.to_string(),
                folder_id,
                data: data.to_vec(),
                modified,
            },
        );
    }
}

#[async_trait]
impl DriveApi for FakeDrive {
    async fn check_access(&self) -> RemoteResult<()> {
        let mut state = self.state();
        state.calls.check_access += 1;
        state.online()
    }

    async fn find_folder(&self, name: &str) -> RemoteResult<Option<String>> {
        let mut state = self.state();
        state.calls.find_folder += 1;
        state.online()?;
        Ok(state.folders.get(name).cloned())
    }

    async fn create_folder(&self, name: &str) -> RemoteResult<String> {
        let mut state = self.state();
        state.calls.create_folder += 1;
        state.online()?;
        let folder_id = state.next_id("folder");
        state.folders.insert(name.to_string(), folder_id.clone());
        if std::mem::take(&mut state.folder_race) {
            return Err(RemoteError::AlreadyExists(name.to_string()));
        }
        Ok(folder_id)
    }

    async fn find_file(
        &self,
        folder_id: &str,
        name: &str,
    ) -> RemoteResult<Option<RemoteObjectHandle>> {
        let mut state = self.state();
        state.calls.find_file += 1;
        state.online()?;
        Ok(state
            .files
            .values()
            .find(|file| file.folder_id == folder_id && file.name == name)
            .map(StoredFile::handle))
    }

    async fn list_folder(&self, folder_id: &str) -> RemoteResult<Vec<RemoteObjectHandle>> {
        let mut state = self.state();
        state.calls.list_folder += 1;
        state.online()?;
        if state.fail_listing {
            return Err(RemoteError::transport("list", Some(500), "injected failure"));
        }
        Ok(state
            .files
            .values()
            .filter(|file| file.folder_id == folder_id)
            .map(StoredFile::handle)
            .collect())
    }

    async fn write_simple(
        &self,
        target: UploadTarget<'_>,
        data: &[u8],
    ) -> RemoteResult<RemoteObjectHandle> {
        let mut state = self.state();
        state.calls.write_simple += 1;
        state.online()?;
        state.check_upload(target.name())?;
        let (folder_id, file_id, name) = target_parts(target);
        state.store(folder_id, file_id, &name, data.to_vec())
    }

    async fn open_session(
        &self,
        target: UploadTarget<'_>,
        total_len: u64,
    ) -> RemoteResult<String> {
        let mut state = self.state();
        state.calls.open_session += 1;
        state.online()?;
        state.check_upload(target.name())?;
        let (folder_id, file_id, name) = target_parts(target);
        let session = state.next_id("session");
        state.sessions.insert(
            session.clone(),
            Session {
                folder_id,
                file_id,
                name,
                total_len,
                received: Vec::new(),
            },
        );
        Ok(session)
    }

    async fn write_range(
        &self,
        session: &str,
        offset: u64,
        chunk: &[u8],
        total_len: u64,
    ) -> RemoteResult<Option<RemoteObjectHandle>> {
        let mut state = self.state();
        state.calls.write_range += 1;
        state.online()?;
        state.ranges.push((offset, chunk.len()));

        let upload = state
            .sessions
            .get_mut(session)
            .ok_or_else(|| RemoteError::NotFound(session.to_string()))?;
        if offset != upload.received.len() as u64 || total_len != upload.total_len {
            return Err(RemoteError::transport(
                "upload range",
                Some(400),
                "range does not continue the session",
            ));
        }
        upload.received.extend_from_slice(chunk);
        if (upload.received.len() as u64) < upload.total_len {
            return Ok(None);
        }

        let Some(done) = state.sessions.remove(session) else {
            return Err(RemoteError::NotFound(session.to_string()));
        };
        state
            .store(done.folder_id, done.file_id, &done.name, done.received)
            .map(Some)
    }

    async fn read_content(&self, file_id: &str) -> RemoteResult<Vec<u8>> {
        let mut state = self.state();
        state.calls.read_content += 1;
        state.online()?;
        state
            .files
            .get(file_id)
            .map(|file| file.data.clone())
            .ok_or_else(|| RemoteError::NotFound(file_id.to_string()))
    }

    async fn delete_file(&self, file_id: &str) -> RemoteResult<()> {
        let mut state = self.state();
        state.calls.delete_file += 1;
        state.online()?;
        if state.fail_deletes {
            return Err(RemoteError::transport("delete", Some(500), "injected failure"));
        }
        state
            .files
            .remove(file_id)
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(file_id.to_string()))
    }
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

/// Two books with a small amount of everything.
pub fn sample_document() -> Value {
    json!({
        "version": 2,
        "exportedAt": "2026-03-01T10:00:00.000Z",
        "books": [
            {"id": "b1", "title": "The Salt Road", "genre": "fantasy", "wordGoal": 90000,
             "createdAt": 1700000000000i64, "updatedAt": 1700000500000i64},
            {"id": "b2", "title": "Glass Harbor", "createdAt": "2024-02-01T08:00:00Z"}
        ],
        "characters": [
            {"id": "c1", "bookId": "b1", "name": "Ysolde", "role": "lead",
             "traits": ["stubborn", "kind"]},
            {"id": "c2", "bookId": "b2", "name": "Tomas"}
        ],
        "chapters": [
            {"id": "ch1", "bookId": "b1", "title": "Departure", "content": "It began.", "sortOrder": 0},
            {"id": "ch2", "bookId": "b1", "title": "The Pass", "sortOrder": 1},
            {"id": "ch3", "bookId": "b2", "title": "Fog", "order": 0}
        ],
        "ideas": [
            {"id": "i1", "bookId": "b1", "title": "Map reveal", "position": {"x": 10, "y": 20},
             "characterIds": ["c1"], "tags": ["plot"]},
            {"id": "i2", "bookId": "b1", "title": "Betrayal"}
        ],
        "timelineEvents": [
            {"id": "t1", "bookId": "b1", "title": "Storm", "date": "Year 3", "characterIds": ["c1"]}
        ],
        "wishlistItems": [
            {"id": "w1", "bookId": "b1", "title": "Add a prologue", "completed": false},
            {"id": "w2", "title": "Learn sailing terms", "done": true}
        ],
        "images": [
            {"id": "img1", "name": "map.png", "mimeType": "image/png", "data": "data:image/png;base64,AAAA"}
        ],
        "connections": [
            {"id": "cn1", "bookId": "b1", "fromIdeaId": "i1", "toIdeaId": "i2", "label": "leads to"}
        ],
        "chapterIllustrations": [
            {"id": "il1", "chapterId": "ch1", "imageId": "img1", "caption": "The map"}
        ]
    })
}

pub fn seeded_connection() -> Connection {
    let conn = open_db_in_memory().unwrap();
    let snapshot = quillbox_core::snapshot::decode(&sample_document()).unwrap();
    restore_snapshot(&conn, &snapshot).unwrap();
    conn
}

pub fn shared(conn: Connection) -> SharedConnection {
    Arc::new(Mutex::new(conn))
}

pub fn count_rows(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
        row.get(0)
    })
    .unwrap()
}

/// Polls `condition` while letting timers and blocking work progress.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not reached in time");
}

/// Writes a legacy object-store database with `(store, key, json)` rows.
pub fn write_legacy_db(path: &Path, rows: &[(&str, &str, String)]) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE object_data (
            store_name TEXT NOT NULL,
            record_key TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (store_name, record_key)
        );",
    )
    .unwrap();
    for (store, key, value) in rows {
        conn.execute(
            "INSERT INTO object_data (store_name, record_key, value) VALUES (?1, ?2, ?3);",
            (store, key, value),
        )
        .unwrap();
    }
}

/// Legacy rows: two books, five chapters, one keyless idea and an unknown store.
pub fn two_books_five_chapters() -> Vec<(&'static str, &'static str, String)> {
    let mut rows = vec![
        ("books", "b1", json!({"id": "b1", "title": "First"}).to_string()),
        ("books", "b2", json!({"id": "b2", "title": "Second"}).to_string()),
        ("settings", "theme", json!({"dark": true}).to_string()),
        (
            "storyboard",
            "idea-key-1",
            json!({"bookId": "b1", "title": "Untitled idea"}).to_string(),
        ),
    ];
    for (index, (key, book)) in [
        ("ch1", "b1"),
        ("ch2", "b1"),
        ("ch3", "b1"),
        ("ch4", "b2"),
        ("ch5", "b2"),
    ]
    .into_iter()
    .enumerate()
    {
        rows.push((
            "chapters",
            key,
            json!({"id": key, "bookId": book, "title": format!("Chapter {index}"), "order": index})
                .to_string(),
        ));
    }
    rows
}
