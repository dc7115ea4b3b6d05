use std::collections::BTreeMap;
use std::fs::{self, File, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde_json::json;

use crate::api::{RemoteApi, RemoteError};
use crate::metadata::{FileMetadata, FileType};
use crate::paths;

const ARCHIVE_EXTENSION: &str = "tgz";

/// A remote store whose namespace lives in a local directory.
///
/// Remote path `/alice/a.txt` maps to `<root>/alice/a.txt`. Every call goes
/// through the same [`RemoteApi`] surface a networked store would expose, so
/// the mirror engine cannot tell the two apart.
#[derive(Debug, Clone)]
pub struct LoopbackStore {
    root: PathBuf,
}

impl LoopbackStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host location of `remote`. Every segment must be a plain entry name,
    /// so nothing resolves outside the store directory.
    fn local(&self, remote: &str) -> Result<PathBuf, RemoteError> {
        let mut out = self.root.clone();
        for part in paths::segments(remote) {
            paths::validate_name(part)?;
            out.push(part);
        }
        Ok(out)
    }

    async fn stat(&self, remote: &str) -> Result<(PathBuf, Metadata), RemoteError> {
        let local = self.local(remote)?;
        match tokio::fs::symlink_metadata(&local).await {
            Ok(meta) => Ok((local, meta)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(RemoteError::NotFound(paths::normalize(remote)))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Looks up an entry that is about to be removed or relocated. The store
    /// directory itself never is.
    async fn stat_entry(&self, remote: &str, action: &str) -> Result<(PathBuf, Metadata), RemoteError> {
        if paths::segments(remote).next().is_none() {
            return Err(RemoteError::InvalidParam(format!("cannot {action} the root")));
        }
        self.stat(remote).await
    }

    async fn entry(&self, remote: &str) -> Result<FileMetadata, RemoteError> {
        let (_, meta) = self.stat(remote).await?;
        Ok(describe(&paths::normalize(remote), &meta))
    }

    async fn require_dir(&self, remote: &str) -> Result<PathBuf, RemoteError> {
        let (local, meta) = self.stat(remote).await?;
        if !meta.is_dir() {
            return Err(RemoteError::InvalidParam(format!(
                "{remote} is not a folder"
            )));
        }
        Ok(local)
    }

    async fn ensure_vacant(&self, remote: &str) -> Result<PathBuf, RemoteError> {
        let local = self.local(remote)?;
        if tokio::fs::symlink_metadata(&local).await.is_ok() {
            return Err(RemoteError::AlreadyExists(paths::normalize(remote)));
        }
        Ok(local)
    }

    async fn relocate(&self, path: &str, destination: &str) -> Result<FileMetadata, RemoteError> {
        let (source, _) = self.stat_entry(path, "move").await?;
        let destination = paths::normalize(destination);
        let parent = paths::parent(&destination)
            .ok_or_else(|| RemoteError::InvalidParam("cannot replace the root".into()))?;
        self.require_dir(&parent).await?;
        let target = self.ensure_vacant(&destination).await?;
        tokio::fs::rename(&source, &target).await?;
        self.entry(&destination).await
    }

    async fn write_into(
        &self,
        folder: &str,
        name: &str,
        bytes: &[u8],
    ) -> Result<FileMetadata, RemoteError> {
        paths::validate_name(name)?;
        let folder_local = self.require_dir(folder).await?;
        let remote = paths::join(&paths::normalize(folder), name);
        let target = folder_local.join(name);
        if let Ok(meta) = tokio::fs::symlink_metadata(&target).await
            && meta.is_dir()
        {
            return Err(RemoteError::AlreadyExists(remote));
        }
        tokio::fs::write(&target, bytes).await?;
        self.entry(&remote).await
    }

    async fn compress(
        &self,
        params: &BTreeMap<String, String>,
        target: &str,
    ) -> Result<serde_json::Value, RemoteError> {
        let format = params
            .get("compression_type")
            .map(String::as_str)
            .unwrap_or(ARCHIVE_EXTENSION);
        if format != ARCHIVE_EXTENSION {
            return Err(RemoteError::InvalidParam(format!(
                "unsupported compression type {format}"
            )));
        }
        let folder = paths::normalize(target);
        let source = self.require_dir(&folder).await?;
        let name = paths::file_name(&folder)
            .ok_or_else(|| RemoteError::InvalidParam("cannot compress the root".into()))?
            .to_string();
        let parent = paths::parent(&folder).unwrap_or_else(|| "/".to_string());
        let archive_remote = paths::join(&parent, &format!("{name}.{ARCHIVE_EXTENSION}"));
        let archive = self.ensure_vacant(&archive_remote).await?;

        tokio::task::spawn_blocking(move || write_archive(&archive, &name, &source))
            .await
            .map_err(|_| RemoteError::Interrupted)?
            .map_err(|err| RemoteError::Job {
                job: "compress".into(),
                reason: err.to_string(),
            })?;

        Ok(json!({
            "job": "compress",
            "status": "FINISHED",
            "output": archive_remote,
        }))
    }

    async fn extract(
        &self,
        params: &BTreeMap<String, String>,
    ) -> Result<serde_json::Value, RemoteError> {
        let input = params
            .get("inputFile")
            .map(|value| paths::normalize(value))
            .ok_or_else(|| RemoteError::InvalidParam("extract requires inputFile".into()))?;
        let (archive, meta) = self.stat(&input).await?;
        if !meta.is_file() {
            return Err(RemoteError::InvalidParam(format!("{input} is not a file")));
        }
        let parent = paths::parent(&input).unwrap_or_else(|| "/".to_string());
        let destination = self.require_dir(&parent).await?;

        tokio::task::spawn_blocking(move || unpack_archive(&archive, &destination))
            .await
            .map_err(|_| RemoteError::Interrupted)?
            .map_err(|err| RemoteError::Job {
                job: "extract".into(),
                reason: err.to_string(),
            })?;

        Ok(json!({
            "job": "extract",
            "status": "FINISHED",
            "output": parent,
        }))
    }
}

#[async_trait]
impl RemoteApi for LoopbackStore {
    async fn list(&self, path: &str) -> Result<Vec<FileMetadata>, RemoteError> {
        let remote = paths::normalize(path);
        let (local, meta) = self.stat(&remote).await?;
        if !meta.is_dir() {
            return Ok(vec![describe(&remote, &meta)]);
        }

        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&local).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let meta = entry.metadata().await?;
            out.push(describe(&paths::join(&remote, &name), &meta));
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn delete(&self, path: &str) -> Result<(), RemoteError> {
        let (local, meta) = self.stat_entry(path, "delete").await?;
        if meta.is_dir() {
            tokio::fs::remove_dir_all(&local).await?;
        } else {
            tokio::fs::remove_file(&local).await?;
        }
        Ok(())
    }

    async fn move_entry(
        &self,
        path: &str,
        destination: &str,
    ) -> Result<FileMetadata, RemoteError> {
        self.relocate(path, destination).await
    }

    async fn copy(&self, path: &str, destination: &str) -> Result<FileMetadata, RemoteError> {
        let (source, meta) = self.stat_entry(path, "copy").await?;
        let destination = paths::normalize(destination);
        let parent = paths::parent(&destination)
            .ok_or_else(|| RemoteError::InvalidParam("cannot replace the root".into()))?;
        self.require_dir(&parent).await?;
        let target = self.ensure_vacant(&destination).await?;
        if meta.is_dir() {
            tokio::task::spawn_blocking(move || copy_tree(&source, &target))
                .await
                .map_err(|_| RemoteError::Interrupted)??;
        } else {
            tokio::fs::copy(&source, &target).await?;
        }
        self.entry(&destination).await
    }

    async fn rename(&self, path: &str, new_name: &str) -> Result<FileMetadata, RemoteError> {
        paths::validate_name(new_name)?;
        let parent = paths::parent(path)
            .ok_or_else(|| RemoteError::InvalidParam("cannot rename the root".into()))?;
        self.relocate(path, &paths::join(&parent, new_name)).await
    }

    async fn mkdir(&self, path: &str, new_name: &str) -> Result<FileMetadata, RemoteError> {
        paths::validate_name(new_name)?;
        let folder = paths::normalize(path);
        self.require_dir(&folder).await?;
        let remote = paths::join(&folder, new_name);
        let target = self.ensure_vacant(&remote).await?;
        tokio::fs::create_dir(&target).await?;
        self.entry(&remote).await
    }

    async fn upload_file(
        &self,
        path: &str,
        local_file: &Path,
    ) -> Result<FileMetadata, RemoteError> {
        let name = local_file
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| RemoteError::InvalidParam(format!("{local_file:?} has no file name")))?
            .to_string();
        let bytes = tokio::fs::read(local_file)
            .await
            .map_err(|err| RemoteError::local(local_file, err))?;
        self.write_into(path, &name, &bytes).await
    }

    async fn upload_buffer(
        &self,
        path: &str,
        bytes: &[u8],
        new_name: &str,
    ) -> Result<FileMetadata, RemoteError> {
        self.write_into(path, new_name, bytes).await
    }

    async fn download_file(&self, local_dest: &Path, path: &str) -> Result<(), RemoteError> {
        let bytes = self.download_buffer(path).await?;
        tokio::fs::write(local_dest, bytes)
            .await
            .map_err(|err| RemoteError::local(local_dest, err))
    }

    async fn download_buffer(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
        let (local, meta) = self.stat(path).await?;
        if !meta.is_file() {
            return Err(RemoteError::InvalidParam(format!("{path} is not a file")));
        }
        Ok(tokio::fs::read(&local).await?)
    }

    async fn run_batch_job(
        &self,
        job: &str,
        params: &BTreeMap<String, String>,
        target: &str,
    ) -> Result<serde_json::Value, RemoteError> {
        match job {
            "compress" => self.compress(params, target).await,
            "extract" => self.extract(params).await,
            other => Err(RemoteError::InvalidParam(format!("unknown batch job {other}"))),
        }
    }
}

fn describe(remote: &str, meta: &Metadata) -> FileMetadata {
    let file_type = if meta.is_dir() {
        FileType::Dir
    } else if meta.is_file() {
        FileType::File
    } else {
        FileType::Unknown
    };
    let modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64);
    let mut entry = FileMetadata::new(remote, file_type);
    if file_type == FileType::File {
        entry.size = meta.len();
    }
    entry.modified = modified;
    entry
}

fn copy_tree(source: &Path, target: &Path) -> io::Result<()> {
    fs::create_dir(target)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let kind = entry.file_type()?;
        let to = target.join(entry.file_name());
        if kind.is_dir() {
            copy_tree(&entry.path(), &to)?;
        } else if kind.is_file() {
            fs::copy(entry.path(), to)?;
        }
    }
    Ok(())
}

fn write_archive(archive: &Path, name: &str, source: &Path) -> io::Result<()> {
    let file = File::create_new(archive)?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.append_dir_all(name, source)?;
    builder.into_inner()?.finish()?;
    Ok(())
}

fn unpack_archive(archive: &Path, destination: &Path) -> io::Result<()> {
    let file = File::open(archive)?;
    tar::Archive::new(GzDecoder::new(file)).unpack(destination)
}
