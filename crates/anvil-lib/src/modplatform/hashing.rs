use super::HashAlgorithm;
use crate::error::TaskError;
use crate::tasks::{BoxFuture, Task, TaskContext};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

const READ_CHUNK_SIZE: usize = 16384;

/// CurseForge fingerprint: 32-bit MurmurHash2 (seed 1) over the file with
/// bytes 9, 10, 13 and 32 removed.
pub fn curseforge_fingerprint(path: &Path) -> Result<u32> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let len = file.metadata().map(|m| m.len() as usize).unwrap_or(0);
    let mut reader = BufReader::new(file);
    let mut data = Vec::with_capacity(len);

    let mut buffer = [0u8; READ_CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        data.extend(
            buffer[..n]
                .iter()
                .copied()
                .filter(|b| !matches!(b, 9 | 10 | 13 | 32)),
        );
    }

    Ok(murmur2::murmur2(&data, 1))
}

pub fn sha1_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut hasher = Sha1::new();
    let mut buffer = [0u8; READ_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Hash in the textual form the provider's lookup endpoint expects.
pub fn hash_file(path: &Path, algorithm: HashAlgorithm) -> Result<String> {
    match algorithm {
        HashAlgorithm::Sha1 => sha1_file(path),
        HashAlgorithm::Murmur2 => curseforge_fingerprint(path).map(|fp| fp.to_string()),
    }
}

/// Hashes one file off the async runtime; the digest is kept for the caller.
pub struct HashTask {
    path: PathBuf,
    algorithm: HashAlgorithm,
    result: Mutex<Option<String>>,
}

impl HashTask {
    pub fn new(path: impl Into<PathBuf>, algorithm: HashAlgorithm) -> Self {
        Self {
            path: path.into(),
            algorithm,
            result: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn result(&self) -> Option<String> {
        self.result.lock().clone()
    }
}

impl Task for HashTask {
    fn name(&self) -> String {
        format!("Hashing {}", self.path.display())
    }

    fn run<'a>(&'a self, ctx: TaskContext) -> BoxFuture<'a, Result<(), TaskError>> {
        Box::pin(async move {
            ctx.checkpoint().await?;
            let path = self.path.clone();
            let algorithm = self.algorithm;
            let hash = tokio::task::spawn_blocking(move || hash_file(&path, algorithm))
                .await
                .map_err(|e| TaskError::failed(format!("Hashing task panicked: {}", e)))??;
            log::debug!("Hashed {:?}: {}", self.path, hash);
            *self.result.lock() = Some(hash);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_sha1() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        file.write_all(b"hello world")?;
        assert_eq!(sha1_file(file.path())?, "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
        Ok(())
    }

    #[test]
    fn test_curseforge_fingerprint_skips_whitespace() -> Result<()> {
        let mut file1 = NamedTempFile::new()?;
        file1.write_all(b"helloworld")?;
        let mut file2 = NamedTempFile::new()?;
        file2.write_all(b"hello\n \r \tworld")?;

        assert_eq!(curseforge_fingerprint(file1.path())?, curseforge_fingerprint(file2.path())?);
        assert_eq!(
            hash_file(file1.path(), HashAlgorithm::Murmur2)?,
            curseforge_fingerprint(file1.path())?.to_string()
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_hash_task_keeps_result() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        file.write_all(b"hello world")?;
        let task = HashTask::new(file.path(), HashAlgorithm::Sha1);
        task.run(TaskContext::detached()).await?;
        assert_eq!(
            task.result().as_deref(),
            Some("2aae6c35c94fcfb415dbe95f408b9ce91ee846ed")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_hash_task_missing_file_fails() {
        let task = HashTask::new("/nonexistent/definitely/missing.jar", HashAlgorithm::Sha1);
        assert!(task.run(TaskContext::detached()).await.is_err());
        assert!(task.result().is_none());
    }
}
