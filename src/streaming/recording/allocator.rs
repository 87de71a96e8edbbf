// Chunk path allocation
//
// Every recording session gets its own directory under the recordings root,
// named after the session start time. Chunks inside it are numbered from 1 so
// a plain directory listing is capture order.

use chrono::Local;
use parking_lot::Mutex;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::streaming::{ChunkDescriptor, StreamError, StreamResult};

const WRITE_PROBE: &str = ".camerapi-write-test";

/// Supplier of successive recording targets
pub trait ChunkSource: Send {
    fn next_chunk(&mut self) -> StreamResult<ChunkDescriptor>;
}

/// Chunk source shared with the blocking pool, where allocation touches disk
pub type SharedChunkSource = Arc<Mutex<dyn ChunkSource>>;

/// Create `root` if needed and check that files can be created in it
pub fn ensure_writable(root: &Path) -> StreamResult<()> {
    fs::create_dir_all(root).map_err(|e| {
        StreamError::storage(format!(
            "cannot create recordings directory {}: {}",
            root.display(),
            e
        ))
    })?;

    let probe = root.join(WRITE_PROBE);
    fs::write(&probe, b"").map_err(|e| {
        StreamError::storage(format!(
            "recordings directory {} is not writable: {}",
            root.display(),
            e
        ))
    })?;
    if let Err(e) = fs::remove_file(&probe) {
        log::warn!("Failed to remove {}: {}", probe.display(), e);
    }
    Ok(())
}

/// Produces chunk file paths rooted at the recordings directory
#[derive(Debug)]
pub struct ChunkAllocator {
    root: PathBuf,
    extension: String,
    needs_new_session: bool,
    session: u64,
    session_dir: Option<PathBuf>,
    sequence: u64,
}

impl ChunkAllocator {
    pub fn new(root: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            root: root.into(),
            extension: extension.trim_start_matches('.').to_string(),
            needs_new_session: true,
            session: 0,
            session_dir: None,
            sequence: 0,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the recordings root if needed and check that it is writable
    pub fn ensure_root(&self) -> StreamResult<()> {
        ensure_writable(&self.root)
    }

    /// Make the next `next_path()` begin a fresh session
    pub fn start_new_session(&mut self) {
        self.needs_new_session = true;
    }

    /// Allocate the next chunk of the current session
    pub fn next_path(&mut self) -> StreamResult<ChunkDescriptor> {
        if self.needs_new_session || self.session_dir.is_none() {
            let dir = self.open_session()?;
            self.session += 1;
            self.session_dir = Some(dir);
            self.sequence = 0;
            self.needs_new_session = false;
        }

        let directory = match &self.session_dir {
            Some(dir) => dir.clone(),
            None => return Err(StreamError::internal("chunk session was not opened")),
        };
        self.sequence += 1;
        let path = directory.join(format!("chunk-{:05}.{}", self.sequence, self.extension));

        Ok(ChunkDescriptor {
            directory,
            session: self.session,
            sequence: self.sequence,
            path,
        })
    }

    fn open_session(&self) -> StreamResult<PathBuf> {
        self.ensure_root()?;

        let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
        let mut attempt = 1u32;
        loop {
            let dir = self.root.join(session_dir_name(&stamp, attempt));
            match fs::create_dir(&dir) {
                Ok(()) => {
                    log::info!("Recording into {}", dir.display());
                    return Ok(dir);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => {
                    return Err(StreamError::storage(format!(
                        "cannot create session directory {}: {}",
                        dir.display(),
                        e
                    )))
                }
            }
        }
    }
}

/// Session directory name; the collision suffix is zero-padded so that names
/// sharing a timestamp still list in creation order
fn session_dir_name(stamp: &str, attempt: u32) -> String {
    if attempt == 1 {
        stamp.to_string()
    } else {
        format!("{}-{:02}", stamp, attempt)
    }
}

impl ChunkSource for ChunkAllocator {
    fn next_chunk(&mut self) -> StreamResult<ChunkDescriptor> {
        self.next_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_increases_within_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut allocator = ChunkAllocator::new(dir.path(), "mjpeg");

        let first = allocator.next_path().unwrap();
        let second = allocator.next_path().unwrap();
        let third = allocator.next_path().unwrap();

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(third.sequence, 3);
        assert_eq!(first.directory, third.directory);
        assert!(first.path < second.path && second.path < third.path);
        assert_eq!(first.path.file_name().unwrap(), "chunk-00001.mjpeg");
    }

    #[test]
    fn test_new_session_never_collides() {
        let dir = tempfile::tempdir().unwrap();
        let mut allocator = ChunkAllocator::new(dir.path(), ".mjpeg");

        let old: Vec<_> = (0..3).map(|_| allocator.next_path().unwrap()).collect();
        allocator.start_new_session();
        let new: Vec<_> = (0..3).map(|_| allocator.next_path().unwrap()).collect();

        assert_ne!(old[0].directory, new[0].directory);
        assert_eq!(new[0].sequence, 1);
        assert_eq!(new[0].session, old[0].session + 1);
        for chunk in &new {
            assert!(old.iter().all(|o| o.path != chunk.path));
        }
    }

    #[test]
    fn test_same_second_sessions_list_in_creation_order() {
        let stamp = "20260101-120000";
        let names: Vec<_> = (1..=12).map(|attempt| session_dir_name(stamp, attempt)).collect();
        let mut listed = names.clone();
        listed.sort();
        assert_eq!(listed, names);
        assert_eq!(names[1], "20260101-120000-02");
        assert_eq!(names[9], "20260101-120000-10");
    }

    #[test]
    fn test_back_to_back_sessions_list_in_creation_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut allocator = ChunkAllocator::new(dir.path(), "mjpeg");

        let mut created = Vec::new();
        for _ in 0..3 {
            allocator.start_new_session();
            created.push(allocator.next_path().unwrap().directory);
        }
        let mut listed: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        listed.sort();
        assert_eq!(listed, created);
    }

    #[test]
    fn test_creates_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("recordings");
        let mut allocator = ChunkAllocator::new(&root, "mjpeg");

        let chunk = allocator.next_path().unwrap();
        assert!(root.is_dir());
        assert!(chunk.directory.starts_with(&root));
        assert!(chunk.directory.is_dir());
    }

    #[test]
    fn test_storage_error_when_root_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("not-a-dir");
        fs::write(&root, b"x").unwrap();

        let mut allocator = ChunkAllocator::new(&root, "mjpeg");
        assert!(matches!(allocator.next_path(), Err(StreamError::Storage(_))));
        assert!(matches!(allocator.ensure_root(), Err(StreamError::Storage(_))));
    }
}
