use std::{
    borrow::Cow,
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use serde::Serialize;
use tokio::{fs, sync::Mutex};
use tracing::{info, warn};

const CONFIG_EXT: &str = "json";
const LIST_EXT: &str = "lst";
const LIST_SUFFIX: &str = ".lst";
const DEFAULT_CONFIG_NAME: &str = "config.json";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// One named config as returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigEntry {
    pub name: String,
    pub filename: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Serializes writers of the same path inside this process.
#[derive(Clone, Default)]
pub struct WriteLocks {
    inner: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl WriteLocks {
    /// Replace the whole content of `path` atomically.
    pub async fn write(&self, path: &Path, content: &str) -> io::Result<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(path.to_path_buf()).or_default().clone()
        };
        let _guard = lock.lock().await;
        write_atomic(path, content).await
    }
}

async fn write_atomic(path: &Path, content: &str) -> io::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let temp = path.with_file_name(format!(
        ".{file_name}.{}.{}.tmp",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    if let Err(err) = fs::write(&temp, content).await {
        let _ = fs::remove_file(&temp).await;
        return Err(err);
    }
    if let Err(err) = fs::rename(&temp, path).await {
        let _ = fs::remove_file(&temp).await;
        return Err(err);
    }
    Ok(())
}

/// Append `.json` unless the name already ends with it.
pub fn normalize_filename(filename: &str) -> String {
    if filename.ends_with(".json") {
        filename.to_string()
    } else {
        format!("{filename}.json")
    }
}

/// Pretty-printed skeleton written when the directory holds no configs.
pub fn default_config() -> String {
    let skeleton = serde_json::json!({
        "log": { "loglevel": "warning" },
        "inbounds": [],
        "outbounds": [],
    });
    serde_json::to_string_pretty(&skeleton).unwrap_or_default()
}

/// A directory of named `*.json` configs, optionally joined by xkeen's
/// `*.lst` routing lists from a second directory.
#[derive(Clone)]
pub struct ConfigStore {
    dir: PathBuf,
    lists_dir: Option<PathBuf>,
    locks: WriteLocks,
}

impl ConfigStore {
    pub fn new(dir: impl Into<PathBuf>, lists_dir: Option<PathBuf>, locks: WriteLocks) -> Self {
        Self {
            dir: dir.into(),
            lists_dir,
            locks,
        }
    }

    fn is_list(&self, filename: &str) -> bool {
        self.lists_dir.is_some() && filename.ends_with(LIST_SUFFIX)
    }

    /// Name `filename` is stored under: routing lists as given, configs with `.json`.
    pub fn stored_name(&self, filename: &str) -> String {
        if self.is_list(filename) {
            filename.to_string()
        } else {
            normalize_filename(filename)
        }
    }

    pub fn path_of(&self, filename: &str) -> PathBuf {
        let stored = self.stored_name(filename);
        match &self.lists_dir {
            Some(lists) if self.is_list(filename) => lists.join(stored),
            _ => self.dir.join(stored),
        }
    }

    /// Configs then routing lists, sorted by filename. A missing configs
    /// directory is created and contributes nothing; an existing one without
    /// configs is seeded with `config.json`. Unreadable files are listed with
    /// empty content and their error.
    pub async fn list(&self) -> io::Result<Vec<ConfigEntry>> {
        let mut entries = self.list_configs().await?;
        if let Some(lists) = &self.lists_dir {
            match scan(lists, LIST_EXT).await {
                Ok(files) => entries.extend(read_entries(files).await),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(dir = %lists.display(), error = %err, "failed to list routing lists");
                }
            }
            entries.sort_by(|a, b| a.filename.cmp(&b.filename));
        }
        Ok(entries)
    }

    async fn list_configs(&self) -> io::Result<Vec<ConfigEntry>> {
        if !fs::try_exists(&self.dir).await? {
            fs::create_dir_all(&self.dir).await?;
            info!(dir = %self.dir.display(), "created configs directory");
            return Ok(Vec::new());
        }

        let mut configs = read_entries(scan(&self.dir, CONFIG_EXT).await?).await;
        if configs.is_empty() {
            let content = default_config();
            let path = self.dir.join(DEFAULT_CONFIG_NAME);
            self.locks.write(&path, &content).await?;
            info!(path = %path.display(), "seeded default config");
            configs.push(ConfigEntry {
                name: file_stem(DEFAULT_CONFIG_NAME),
                filename: DEFAULT_CONFIG_NAME.to_string(),
                content,
                error: None,
            });
        }
        Ok(configs)
    }

    /// Create or overwrite the file with `content`. Configs are stored
    /// verbatim, routing lists with CRLF line endings turned into LF.
    pub async fn save(&self, filename: &str, content: &str) -> io::Result<PathBuf> {
        let path = self.path_of(filename);
        let content = if self.is_list(filename) {
            Cow::Owned(content.replace("\r\n", "\n"))
        } else {
            Cow::Borrowed(content)
        };
        self.locks.write(&path, &content).await?;
        Ok(path)
    }

    /// Remove the file. Returns `false` when it did not exist.
    pub async fn delete(&self, filename: &str) -> io::Result<bool> {
        let path = self.path_of(filename);
        if !fs::try_exists(&path).await? {
            return Ok(false);
        }
        fs::remove_file(&path).await?;
        Ok(true)
    }
}

/// Visible regular files (symlinks followed) in `dir` with extension `ext`, sorted by name.
async fn scan(dir: &Path, ext: &str) -> io::Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(filename) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if filename.starts_with('.') || path.extension().and_then(|s| s.to_str()) != Some(ext) {
            continue;
        }
        if !fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false) {
            continue;
        }
        files.push((filename.to_string(), path));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

async fn read_entries(files: Vec<(String, PathBuf)>) -> Vec<ConfigEntry> {
    let mut entries = Vec::with_capacity(files.len());
    for (filename, path) in files {
        let name = file_stem(&filename);
        match fs::read_to_string(&path).await {
            Ok(content) => entries.push(ConfigEntry {
                name,
                filename,
                content,
                error: None,
            }),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read config");
                entries.push(ConfigEntry {
                    name,
                    filename,
                    content: String::new(),
                    error: Some(err.to_string()),
                });
            }
        }
    }
    entries
}

fn file_stem(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
        .to_string()
}
