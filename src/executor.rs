use crate::model::ManifestInput;
use crate::remediate::document::ManifestDocument;
use crate::remediate::traits::ParseError;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument};

/// Parses manifests on the blocking pool, a bounded number at a time.
pub struct ParseExecutor {
    semaphore: Arc<Semaphore>,
}

impl ParseExecutor {
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency_limit.max(1))),
        }
    }

    #[instrument(skip(self, input), fields(path = %input.path))]
    pub async fn execute(&self, input: ManifestInput) -> Result<ManifestDocument, ParseError> {
        parse_with_permit(Arc::clone(&self.semaphore), input).await
    }

    /// Parses every mutable manifest concurrently.
    ///
    /// Results come back in input order. Read-only formats are skipped.
    pub async fn parse_all(&self, manifests: &[ManifestInput]) -> Vec<Result<ManifestDocument, ParseError>> {
        let mut tasks = JoinSet::new();
        let mut paths = Vec::new();
        for (idx, input) in manifests
            .iter()
            .filter(|input| input.format.is_mutable())
            .cloned()
            .enumerate()
        {
            paths.push(input.path.clone());
            let semaphore = Arc::clone(&self.semaphore);
            tasks.spawn(async move { (idx, parse_with_permit(semaphore, input).await) });
        }
        info!(manifests = paths.len(), "Parsing manifests");

        let mut results: Vec<Option<Result<ManifestDocument, ParseError>>> =
            (0..paths.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => results[idx] = Some(result),
                Err(e) => debug!("Parse task ended abnormally: {}", e),
            }
        }

        results
            .into_iter()
            .zip(paths)
            .map(|(result, path)| {
                result.unwrap_or_else(|| {
                    Err(ParseError::Task {
                        path,
                        message: "task did not complete".to_string(),
                    })
                })
            })
            .collect()
    }
}

async fn parse_with_permit(
    semaphore: Arc<Semaphore>,
    input: ManifestInput,
) -> Result<ManifestDocument, ParseError> {
    let _permit = semaphore.acquire_owned().await.map_err(|e| ParseError::Task {
        path: input.path.clone(),
        message: format!("Semaphore error: {}", e),
    })?;

    debug!("Starting parse for {} ({})", input.path, input.format);
    let path = input.path.clone();
    let result = tokio::task::spawn_blocking(move || ManifestDocument::parse(&input))
        .await
        .map_err(|e| ParseError::Task {
            path: path.clone(),
            message: format!("Task join error: {}", e),
        })?;
    debug!("Finished parse for {}", path);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ManifestFormat;

    #[tokio::test]
    async fn test_parse_all_keeps_input_order() {
        let executor = ParseExecutor::new(2);
        let manifests = vec![
            ManifestInput::new("a/package.json", ManifestFormat::Npm, "{\"dependencies\": {}}"),
            ManifestInput::new("Dockerfile", ManifestFormat::Dockerfile, "FROM eclipse-temurin:17"),
            ManifestInput::new("pom.xml", ManifestFormat::Maven, "<project></project>"),
            ManifestInput::new("b/package.json", ManifestFormat::Npm, "{\"dependencies\": "),
        ];
        let results = executor.parse_all(&manifests).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().path(), "a/package.json");
        assert_eq!(results[1].as_ref().unwrap().path(), "pom.xml");
        assert!(results[2].is_err());
    }

    #[tokio::test]
    async fn test_execute_rejects_read_only_format() {
        let executor = ParseExecutor::new(1);
        let result = executor
            .execute(ManifestInput::new(".java-version", ManifestFormat::VersionFile, "17"))
            .await;
        assert_eq!(
            result.unwrap_err(),
            ParseError::NotMutable(ManifestFormat::VersionFile)
        );
    }
}
