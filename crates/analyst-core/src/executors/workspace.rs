//! Session-scoped scratch directory.
//!
//! The directory lives exactly as long as the `SessionWorkspace` value: it is
//! removed when the value is dropped, which covers early returns, `?`
//! propagation, panics that unwind, and cancelled futures.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use futures_util::future::try_join_all;
use tempfile::{Builder, TempDir};
use uuid::Uuid;

use crate::config::is_plain_file_name;
use crate::core_types::InputFile;
use crate::errors::AnalystError;

const WORKSPACE_PREFIX: &str = "analyst-session-";

pub struct SessionWorkspace {
    id: Uuid,
    dir: TempDir,
    reserved: Vec<String>,
}

impl SessionWorkspace {
    /// Create a fresh directory under `root` (the system temp dir when `None`).
    /// `reserved` names cannot be used as input keys.
    pub fn acquire(root: Option<&Path>, reserved: &[&str]) -> Result<Self, AnalystError> {
        let id = Uuid::new_v4();
        let mut builder = Builder::new();
        builder.prefix(WORKSPACE_PREFIX);

        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };

        log::debug!("Session {} workspace at {}", id, dir.path().display());
        Ok(Self {
            id,
            dir,
            reserved: reserved.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Persist every input as a file named by its key, concurrently. When two
    /// inputs share a key the later one wins. Returns the stored names, sorted.
    pub async fn write_inputs(&self, inputs: Vec<InputFile>) -> Result<Vec<String>, AnalystError> {
        if inputs.is_empty() {
            return Err(AnalystError::UploadError(
                "No files were uploaded.".to_string(),
            ));
        }

        let mut by_name = BTreeMap::new();
        for input in inputs {
            self.check_input_name(&input.name)?;
            by_name.insert(input.name, input.bytes);
        }

        let names: Vec<String> = by_name.keys().cloned().collect();
        try_join_all(by_name.into_iter().map(|(name, bytes)| {
            let path = self.join(&name);
            async move { tokio::fs::write(path, bytes).await }
        }))
        .await?;

        log::debug!("Session {} stored inputs: {:?}", self.id, names);
        Ok(names)
    }

    /// Read the task description. Its absence is an upload error.
    pub async fn read_task(&self, name: &str) -> Result<String, AnalystError> {
        let path = self.join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AnalystError::UploadError(
                format!("Required file '{}' not found in upload.", name),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the directory now and report failures. Dropping the workspace
    /// does the same silently.
    pub fn close(self) -> Result<(), AnalystError> {
        let id = self.id;
        self.dir.close()?;
        log::debug!("Session {} workspace removed", id);
        Ok(())
    }

    fn check_input_name(&self, name: &str) -> Result<(), AnalystError> {
        if !is_plain_file_name(name) || self.reserved.iter().any(|r| r == name) {
            return Err(AnalystError::UploadError(format!(
                "Invalid upload name '{}'.",
                name
            )));
        }
        Ok(())
    }
}
