use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use aria2::Status;
use md5::{Digest, Md5};
use tokio::sync::Semaphore;
use tracing::{debug, trace, warn};

use crate::datasource::CatalogRepository;
use crate::errors::{Error, InternalError, Result};
use crate::models::{FileRecord, FileSource, NewFile};

/// MIME types cataloged as media; every other file is an attachment.
pub const VIDEO_MIME_TYPES: [&str; 8] = [
    "video/mp4",
    "video/webm",
    "video/x-matroska",
    "video/quicktime",
    "video/x-msvideo",
    "video/x-flv",
    "video/x-m4v",
    "video/vnd.dlna.mpeg-tts",
];

pub fn is_video(mimetype: Option<&str>) -> bool {
    mimetype.is_some_and(|mime| VIDEO_MIME_TYPES.contains(&mime))
}

pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Runs blocking filesystem work on the blocking thread pool, at most
/// `workers` jobs at a time.
#[derive(Debug, Clone)]
pub struct BlockingPool {
    permits: Arc<Semaphore>,
}

impl BlockingPool {
    pub fn new(workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(InternalError::from)?;
        tokio::task::spawn_blocking(job)
            .await
            .map_err(|err| Error::Internal(err.into()))
    }
}

#[derive(Debug)]
struct Inspection {
    size: u64,
    md5: String,
    mimetype: Option<&'static str>,
}

/// Bytes read from the start of a file to sniff its type.
const SNIFF_LEN: u64 = 8192;

/// Sniffs the content first; files without a known signature fall back to
/// their extension.
fn sniff_mimetype(path: &Path, head: &[u8]) -> Option<&'static str> {
    infer::get(head)
        .map(|kind| kind.mime_type())
        .or_else(|| mime_guess::from_path(path).first_raw())
}

fn inspect(path: &Path) -> io::Result<Inspection> {
    let mut file = std::fs::File::open(path)?;
    let size = file.metadata()?.len();
    let mut head = Vec::new();
    (&mut file).take(SNIFF_LEN).read_to_end(&mut head)?;
    let mut hasher = Md5::new();
    hasher.update(&head);
    io::copy(&mut file, &mut hasher)?;
    Ok(Inspection {
        size,
        md5: hex::encode(hasher.finalize()),
        mimetype: sniff_mimetype(path, &head),
    })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Turns local files into durable file records.
#[derive(Clone)]
pub struct FileService {
    catalog: Arc<dyn CatalogRepository>,
    pool: BlockingPool,
}

impl FileService {
    pub fn new(catalog: Arc<dyn CatalogRepository>, pool: BlockingPool) -> Self {
        Self { catalog, pool }
    }

    pub fn pool(&self) -> &BlockingPool {
        &self.pool
    }

    pub async fn save_local(&self, path: &Path) -> Result<FileRecord> {
        let owned = path.to_path_buf();
        let inspection = self.pool.run(move || inspect(&owned)).await??;
        let filename = file_name(path);
        let file = NewFile {
            name: filename.clone(),
            filename,
            path: path.to_string_lossy().into_owned(),
            size: i64::try_from(inspection.size).map_err(InternalError::from)?,
            md5: inspection.md5,
            mimetype: inspection.mimetype.map(Into::into),
            source: FileSource::Download,
        };
        self.catalog.insert_file(file).await.map_err(Error::database)
    }

    /// Stores every file of a finished transfer that exists locally. Files
    /// that cannot be stored are logged and skipped.
    pub async fn save_completed(&self, status: &Status) -> Vec<FileRecord> {
        let mut records = Vec::with_capacity(status.files.len());
        for file in &status.files {
            let path = Path::new(&file.path);
            if file.path.is_empty() || !tokio::fs::try_exists(path).await.unwrap_or(false) {
                trace!(path = file.path, "skipping file missing on disk");
                continue;
            }
            match self.save_local(path).await {
                Ok(record) => records.push(record),
                Err(err) => warn!(path = file.path, "failed to store downloaded file: {err}"),
            }
        }
        records
    }
}

/// Resolves `relative` below `root`. Returns `None` when the path would leave
/// `root` or names nothing.
pub fn resolve_within(root: &Path, relative: &str) -> Option<PathBuf> {
    let mut resolved = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return None;
                }
            }
            Component::Prefix(_) => return None,
        }
    }
    if resolved.as_os_str().is_empty() {
        return None;
    }
    Some(root.join(resolved))
}

fn hard_link(original: &Path, link: &Path) -> io::Result<()> {
    match std::fs::hard_link(original, link) {
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            debug!(link = %link.display(), "index entry already exists");
            Ok(())
        }
        result => result,
    }
}

/// Hard-links `media` to `target` and every attachment next to it under its
/// own file name.
pub fn link_into_index(target: &Path, media: &Path, attachments: &[PathBuf]) -> io::Result<()> {
    let directory = target
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "index path has no parent"))?;
    std::fs::create_dir_all(directory)?;
    hard_link(media, target)?;
    for attachment in attachments {
        let Some(name) = attachment.file_name() else {
            continue;
        };
        hard_link(attachment, &directory.join(name))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::MetadataExt;

    use super::*;
    use crate::datasource::MemoryStore;

    #[test]
    fn test_resolve_within() {
        let root = Path::new("/srv/index");
        assert_eq!(
            resolve_within(root, "Show/S01/E01.mkv"),
            Some(PathBuf::from("/srv/index/Show/S01/E01.mkv"))
        );
        assert_eq!(
            resolve_within(root, "Show/../Other/./E01.mkv"),
            Some(PathBuf::from("/srv/index/Other/E01.mkv"))
        );
        assert_eq!(
            resolve_within(root, "/Show/E01.mkv"),
            Some(PathBuf::from("/srv/index/Show/E01.mkv"))
        );
        assert_eq!(resolve_within(root, "../escape.mkv"), None);
        assert_eq!(resolve_within(root, "Show/../../escape.mkv"), None);
        assert_eq!(resolve_within(root, "."), None);
    }

    #[test]
    fn test_is_video() {
        assert!(is_video(Some("video/x-matroska")));
        assert!(!is_video(Some("application/x-subrip")));
        assert!(!is_video(None));
    }

    #[tokio::test]
    async fn test_save_local_records_checksum_and_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mkv");
        std::fs::write(&path, b"hello").unwrap();

        let store = MemoryStore::new();
        let files = FileService::new(Arc::new(store.clone()), BlockingPool::new(2));
        let record = files.save_local(&path).await.unwrap();

        assert_eq!(record.name, "a.mkv");
        assert_eq!(record.filename, "a.mkv");
        assert_eq!(record.size, 5);
        assert_eq!(record.md5, "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(record.mimetype.as_deref(), Some("video/x-matroska"));
        assert_eq!(record.source, FileSource::Download);
        assert_eq!(store.files(), vec![record]);
    }

    #[tokio::test]
    async fn test_save_local_sniffs_content_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episode01");
        let mut content = b"\x00\x00\x00\x18ftypisom\x00\x00\x02\x00isomiso2".to_vec();
        content.resize(20_000, 7);
        std::fs::write(&path, &content).unwrap();

        let files = FileService::new(Arc::new(MemoryStore::new()), BlockingPool::new(1));
        let record = files.save_local(&path).await.unwrap();

        assert_eq!(record.mimetype.as_deref(), Some("video/mp4"));
        assert!(is_video(record.mimetype.as_deref()));
        assert_eq!(record.size, 20_000);
        assert_eq!(record.md5, md5_hex(&content));
    }

    #[tokio::test]
    async fn test_save_completed_skips_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.mkv");
        std::fs::write(&present, b"x").unwrap();
        let status: Status = serde_json::from_value(serde_json::json!({
            "gid": "g",
            "status": "complete",
            "totalLength": "1",
            "completedLength": "1",
            "downloadSpeed": "0",
            "files": [
                {"index": "1", "path": present, "length": "1", "completedLength": "1", "selected": "true"},
                {"index": "2", "path": dir.path().join("gone.srt"), "length": "1", "completedLength": "0", "selected": "true"},
                {"index": "3", "path": "", "length": "0", "completedLength": "0", "selected": "true"},
            ],
        }))
        .unwrap();

        let store = MemoryStore::new();
        let files = FileService::new(Arc::new(store), BlockingPool::new(1));
        let records = files.save_completed(&status).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "a.mkv");
    }

    #[test]
    fn test_link_into_index_creates_hard_links() {
        let downloads = tempfile::tempdir().unwrap();
        let index = tempfile::tempdir().unwrap();
        let media = downloads.path().join("a.mkv");
        let subtitle = downloads.path().join("a.ass");
        std::fs::write(&media, b"video").unwrap();
        std::fs::write(&subtitle, b"subs").unwrap();

        let target = index.path().join("Show/S01/E01.mkv");
        link_into_index(&target, &media, &[subtitle.clone()]).unwrap();
        // Linking twice is harmless.
        link_into_index(&target, &media, &[subtitle.clone()]).unwrap();

        let linked = std::fs::metadata(&target).unwrap();
        assert_eq!(linked.ino(), std::fs::metadata(&media).unwrap().ino());
        assert_eq!(
            std::fs::read(index.path().join("Show/S01/a.ass")).unwrap(),
            b"subs"
        );
        assert!(media.exists());
    }

    #[test]
    fn test_md5_hex() {
        assert_eq!(md5_hex(b"hello"), "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
