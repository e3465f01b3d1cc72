use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    collections::{BTreeSet, HashMap},
    future::Future,
    sync::Arc,
};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::{AppErr, AppResult};

pub type SessionId = Uuid;

/* ------------ 房間 ------------ */

/// A stored file. Replaced wholesale when the same name is uploaded again.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub name:        String,
    pub content:     Bytes,
    pub uploaded_by: String,
    pub uploaded_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn size(&self) -> usize { self.content.len() }

    pub fn meta(&self) -> FileMeta {
        FileMeta {
            name:        self.name.clone(),
            size:        self.size(),
            uploaded_by: self.uploaded_by.clone(),
            uploaded_at: self.uploaded_at,
        }
    }
}

/// File metadata without content, as listed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMeta {
    pub name:        String,
    pub size:        usize,
    pub uploaded_by: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct Room {
    members: HashMap<SessionId, String>,   // session -> username
    files:   HashMap<String, FileRecord>,
}

impl Room {
    fn member_names(&self) -> Vec<String> {
        let set: BTreeSet<&String> = self.members.values().collect();
        set.into_iter().cloned().collect()
    }

    fn file_list(&self) -> Vec<FileMeta> {
        let mut list: Vec<_> = self.files.values().map(FileRecord::meta).collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }
}

type RoomRef = Arc<Mutex<Room>>;

/// Point-in-time view of a room, returned on join.
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub name:    String,
    pub files:   Vec<FileMeta>,
    pub members: Vec<String>,
}

/// Authoritative map of rooms, members and files.
///
/// The outer map lock is held only to look up or insert a room; every
/// mutation then takes that room's own lock, so work on different rooms
/// never contends and work on one room serializes.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, RoomRef>>,
}

impl RoomRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn with_rooms<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rooms = names
            .into_iter()
            .map(|n| (n.into(), RoomRef::default()))
            .collect();
        Self { rooms: RwLock::new(rooms) }
    }

    async fn room(&self, name: &str) -> AppResult<RoomRef> {
        self.rooms
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| AppErr::NotFound(format!("Room {name}")))
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.rooms.read().await.contains_key(name)
    }

    pub async fn create_room(&self, name: &str) -> AppResult<()> {
        let mut m = self.rooms.write().await;
        if m.contains_key(name) {
            return Err(AppErr::AlreadyExists(name.to_string()));
        }
        m.insert(name.to_string(), RoomRef::default());
        Ok(())
    }

    /// Returns whether the room was newly created.
    pub async fn get_or_create_room(&self, name: &str) -> bool {
        if self.contains(name).await {
            return false;
        }
        let mut m = self.rooms.write().await;
        if m.contains_key(name) {
            return false;
        }
        m.insert(name.to_string(), RoomRef::default());
        true
    }

    pub async fn list_rooms(&self) -> Vec<String> {
        let mut names: Vec<_> = self.rooms.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Adds (or renames) a session in a room and returns the room as seen right after.
    pub async fn add_member(
        &self,
        room: &str,
        session: SessionId,
        username: &str,
    ) -> AppResult<RoomSnapshot> {
        let r = self.room(room).await?;
        let mut st = r.lock().await;
        st.members.insert(session, username.to_string());
        Ok(RoomSnapshot {
            name:    room.to_string(),
            files:   st.file_list(),
            members: st.member_names(),
        })
    }

    /// No-op if the room or membership is already gone.
    pub async fn remove_member(&self, room: &str, session: SessionId) -> bool {
        let Ok(r) = self.room(room).await else { return false };
        let removed = r.lock().await.members.remove(&session).is_some();
        removed
    }

    pub async fn members(&self, room: &str) -> AppResult<Vec<String>> {
        let r = self.room(room).await?;
        let names = r.lock().await.member_names();
        Ok(names)
    }

    pub async fn put_file(
        &self,
        room: &str,
        name: &str,
        content: Bytes,
        uploader: &str,
    ) -> AppResult<FileMeta> {
        self.put_file_with(room, name, content, uploader, |_| async { Ok::<_, AppErr>(()) }).await
    }

    /// `persist` runs with the room locked, before the record is replaced.
    /// If it fails the room is left as it was.
    pub async fn put_file_with<F, Fut>(
        &self,
        room: &str,
        name: &str,
        content: Bytes,
        uploader: &str,
        persist: F,
    ) -> AppResult<FileMeta>
    where
        F: FnOnce(Bytes) -> Fut,
        Fut: Future<Output = AppResult<()>>,
    {
        let r = self.room(room).await?;
        let mut st = r.lock().await;
        persist(content.clone()).await?;

        let rec = FileRecord {
            name:        name.to_string(),
            content,
            uploaded_by: uploader.to_string(),
            uploaded_at: Utc::now(),
        };
        let meta = rec.meta();
        st.files.insert(name.to_string(), rec);
        Ok(meta)
    }

    pub async fn get_file(&self, room: &str, name: &str) -> AppResult<FileRecord> {
        let r = self.room(room).await?;
        let st = r.lock().await;
        st.files
            .get(name)
            .cloned()
            .ok_or_else(|| AppErr::NotFound(format!("File {name}")))
    }

    pub async fn list_files(&self, room: &str) -> AppResult<Vec<FileMeta>> {
        let r = self.room(room).await?;
        let list = r.lock().await.file_list();
        Ok(list)
    }
}
