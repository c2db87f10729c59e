//! JSON 行文件 keeper
//!
//! 每行一个 JSON 对象。新增只追加；设置删除标记时整体重写（顺带压缩），
//! 先写临时文件再 rename。读取时同一短码后出现的行覆盖先出现的行。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::Keeper;
use super::index::{LinkIndex, UserIndex};
use crate::errors::{Result, TinyurlError};
use crate::storage::models::{
    BatchReport, DeletionRequest, Inserted, UrlMap, UrlRecord, UserMap, UserRecord,
};

struct FileState {
    links: LinkIndex,
    users: UserIndex,
}

pub struct FileKeeper {
    links_path: PathBuf,
    users_path: PathBuf,
    /// 串行化所有写操作
    state: Mutex<FileState>,
}

impl FileKeeper {
    /// 打开（不存在则视为空）链接文件和用户文件
    pub async fn open(links_path: impl AsRef<Path>, users_path: impl AsRef<Path>) -> Result<Self> {
        let links_path = links_path.as_ref().to_path_buf();
        let users_path = users_path.as_ref().to_path_buf();
        if links_path.as_os_str().is_empty() {
            return Err(TinyurlError::validation("file keeper path is empty"));
        }

        let links = read_links(&links_path).await?;
        let users = read_users(&users_path).await?;
        info!(
            "File keeper opened: {} ({} links, {} users)",
            links_path.display(),
            links.len(),
            users.len()
        );

        Ok(Self {
            links_path,
            users_path,
            state: Mutex::new(FileState {
                links: LinkIndex::from_map(links),
                users: UserIndex::from_map(users),
            }),
        })
    }

    pub fn links_path(&self) -> &Path {
        &self.links_path
    }
}

#[async_trait]
impl Keeper for FileKeeper {
    async fn load(&self) -> Result<UrlMap> {
        let links = read_links(&self.links_path).await?;
        let mut state = self.state.lock().await;
        state.links = LinkIndex::from_map(links.clone());
        Ok(links)
    }

    async fn load_users(&self) -> Result<UserMap> {
        let users = read_users(&self.users_path).await?;
        let mut state = self.state.lock().await;
        state.users = UserIndex::from_map(users.clone());
        Ok(users)
    }

    async fn save(&self, key: &str, record: UrlRecord) -> Result<Inserted<UrlRecord>> {
        let mut state = self.state.lock().await;
        let inserted = state.links.insert(key, record);

        if let Inserted::Created(ref created) = inserted
            && let Err(e) = append_lines(&self.links_path, std::slice::from_ref(created)).await
        {
            state.links.remove(created);
            return Err(e);
        }

        Ok(inserted)
    }

    async fn save_user(&self, key: &str, record: UserRecord) -> Result<Inserted<UserRecord>> {
        let mut state = self.state.lock().await;
        let inserted = state.users.insert(key, record)?;

        if let Inserted::Created(ref created) = inserted
            && let Err(e) = append_lines(&self.users_path, std::slice::from_ref(created)).await
        {
            state.users.remove(&created.email);
            return Err(e);
        }

        Ok(inserted)
    }

    async fn save_batch(&self, batch: &UrlMap) -> Result<BatchReport> {
        if batch.is_empty() {
            return Ok(BatchReport::default());
        }

        let mut state = self.state.lock().await;
        let (report, created) = state.links.insert_batch(batch);

        if let Err(e) = append_lines(&self.links_path, &created).await {
            for record in &created {
                state.links.remove(record);
            }
            return Err(e);
        }

        debug!(
            "File keeper batch: {} appended, {} skipped",
            report.inserted,
            report.skipped.len()
        );
        Ok(report)
    }

    async fn update_batch(&self, requests: &[DeletionRequest]) -> Result<()> {
        let mut state = self.state.lock().await;
        let before = state.links.clone();

        if !state.links.tombstone(requests) {
            return Ok(());
        }

        let written = {
            let mut records: Vec<&UrlRecord> = state.links.records().collect();
            records.sort_by(|a, b| a.short_key.cmp(&b.short_key));
            rewrite(&self.links_path, &records).await
        };
        if let Err(e) = written {
            state.links = before;
            return Err(e);
        }

        Ok(())
    }

    async fn count_urls(&self) -> Result<usize> {
        Ok(self.state.lock().await.links.len())
    }

    async fn count_users(&self) -> Result<usize> {
        Ok(self.state.lock().await.users.len())
    }

    async fn ping(&self) -> bool {
        match self.links_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => fs::metadata(dir).await.is_ok(),
            _ => true,
        }
    }

    async fn close(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}

async fn read_links(path: &Path) -> Result<UrlMap> {
    let records: Vec<UrlRecord> = read_lines(path).await?;
    Ok(records.into_iter().map(|r| (r.key(), r)).collect())
}

async fn read_users(path: &Path) -> Result<UserMap> {
    let records: Vec<UserRecord> = read_lines(path).await?;
    Ok(records.into_iter().map(|r| (r.email.clone(), r)).collect())
}

/// 逐行解析，无法解析的行记录日志后跳过
async fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("Data file not found, starting empty: {}", path.display());
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(TinyurlError::file_operation(format!(
                "读取数据文件 {} 失败: {}",
                path.display(),
                e
            )));
        }
    };

    let mut items = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(item) => items.push(item),
            Err(e) => warn!(
                "Skipping malformed line {} in {}: {}",
                lineno + 1,
                path.display(),
                e
            ),
        }
    }
    Ok(items)
}

fn encode_lines<T: Serialize>(items: &[T]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for item in items {
        serde_json::to_writer(&mut buf, item)?;
        buf.push(b'\n');
    }
    Ok(buf)
}

async fn append_lines<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    if items.is_empty() {
        return Ok(());
    }

    let buf = encode_lines(items)?;
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| {
            TinyurlError::file_operation(format!("打开数据文件 {} 失败: {}", path.display(), e))
        })?;
    file.write_all(&buf).await?;
    file.flush().await?;
    Ok(())
}

async fn rewrite<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    let buf = encode_lines(items)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, &buf).await.map_err(|e| {
        TinyurlError::file_operation(format!("写入临时文件 {} 失败: {}", tmp.display(), e))
    })?;
    fs::rename(&tmp, path).await?;
    debug!("Compacted {} ({} lines)", path.display(), items.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_temp() -> (FileKeeper, TempDir) {
        let dir = TempDir::new().unwrap();
        let keeper = FileKeeper::open(dir.path().join("links.jsonl"), dir.path().join("users.jsonl"))
            .await
            .unwrap();
        (keeper, dir)
    }

    #[tokio::test]
    async fn test_missing_files_load_empty() {
        let (keeper, _dir) = open_temp().await;
        assert!(keeper.load().await.unwrap().is_empty());
        assert!(keeper.load_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_appends_one_line() {
        let (keeper, _dir) = open_temp().await;
        keeper
            .save("abc", UrlRecord::new("abc", "http://x.com").with_owner("u1"))
            .await
            .unwrap();
        keeper
            .save("def", UrlRecord::new("def", "http://y.com"))
            .await
            .unwrap();

        let content = std::fs::read_to_string(keeper.links_path()).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.lines().next().unwrap().contains("\"short_url\":\"abc\""));
    }

    #[tokio::test]
    async fn test_conflict_does_not_append() {
        let (keeper, _dir) = open_temp().await;
        keeper
            .save("abc", UrlRecord::new("abc", "http://x.com"))
            .await
            .unwrap();
        let second = keeper
            .save("xyz", UrlRecord::new("xyz", "http://x.com"))
            .await
            .unwrap();

        assert!(second.is_conflict());
        let content = std::fs::read_to_string(keeper.links_path()).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("links.jsonl");
        std::fs::write(
            &path,
            "{\"correlation_id\":\"1\",\"short_url\":\"abc\",\"original_url\":\"http://x.com\",\"user_id\":null,\"is_deleted\":false}\nnot json\n\n",
        )
        .unwrap();

        let keeper = FileKeeper::open(&path, dir.path().join("users.jsonl"))
            .await
            .unwrap();
        let links = keeper.load().await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links["abc"].id, "1");
    }

    #[tokio::test]
    async fn test_update_batch_rewrites_file() {
        let (keeper, _dir) = open_temp().await;
        keeper
            .save("abc", UrlRecord::new("abc", "http://x.com").with_owner("u1"))
            .await
            .unwrap();

        keeper
            .update_batch(&[DeletionRequest::new("u1", ["abc"])])
            .await
            .unwrap();

        let reloaded = keeper.load().await.unwrap();
        assert!(reloaded["abc"].deleted);
        let content = std::fs::read_to_string(keeper.links_path()).unwrap();
        assert_eq!(content.lines().count(), 1);
    }
}
