use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to write {path}: {message}")]
    Write { path: String, message: String },
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Destination for rewritten manifest text (working tree, VCS client, ...).
#[async_trait]
pub trait ManifestSink: Send + Sync {
    /// Returns a short name for logs (e.g., "memory", "worktree").
    fn sink_id(&self) -> &str;

    /// Replaces the manifest at `path` with `content`.
    async fn write(&self, path: &str, content: &str) -> Result<(), SinkError>;
}

/// Sink that keeps written manifests in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    files: Mutex<BTreeMap<String, String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, path: &str) -> Option<String> {
        self.files.lock().await.get(path).cloned()
    }

    pub async fn paths(&self) -> Vec<String> {
        self.files.lock().await.keys().cloned().collect()
    }
}

#[async_trait]
impl ManifestSink for MemorySink {
    fn sink_id(&self) -> &str {
        "memory"
    }

    async fn write(&self, path: &str, content: &str) -> Result<(), SinkError> {
        self.files
            .lock()
            .await
            .insert(path.to_string(), content.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_sink_overwrites() {
        let sink = MemorySink::new();
        sink.write("pom.xml", "<project/>").await.unwrap();
        sink.write("pom.xml", "<project></project>").await.unwrap();

        assert_eq!(sink.get("pom.xml").await.as_deref(), Some("<project></project>"));
        assert_eq!(sink.paths().await, vec!["pom.xml".to_string()]);
        assert!(sink.get("package.json").await.is_none());
    }
}
