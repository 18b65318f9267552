//! Base image cache
//!
//! One cached image per language, tagged with a digest of its recipe.
//! Existence checks run concurrently; builds of the same tag are serialized
//! through a per-tag lock and re-checked once the lock is held.

use bollard::query_parameters::{ListImagesOptions, RemoveImageOptions};
use bollard::Docker;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::context::{base_image_tag, BuildStage, Recipe};
use crate::core::{EngineError, Language, TimeoutPhase};
use crate::sandbox::builder::{build_image, BuildOutcome};
use crate::sandbox::docker::{client, is_not_found, runtime_fault};
use crate::sandbox::archive;

/// How a base image request was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseImageStatus {
    /// Already present
    Cached,
    /// Built by this call
    Built,
}

/// Listing entry of a base image
#[derive(Debug, Clone)]
pub struct BaseImageInfo {
    pub language: Language,
    pub tag: String,
    /// Creation time and size in bytes, None when not built
    pub details: Option<(String, i64)>,
}

static BUILD_LOCKS: OnceLock<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>> = OnceLock::new();

/// Lock serializing builds of one tag
fn build_lock(tag: &str) -> Arc<tokio::sync::Mutex<()>> {
    let locks = BUILD_LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut locks = locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    locks
        .entry(tag.to_string())
        .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
        .clone()
}

pub async fn image_exists(docker: &Docker, tag: &str) -> Result<bool, EngineError> {
    match docker.inspect_image(tag).await {
        Ok(_) => Ok(true),
        Err(e) if is_not_found(&e) => Ok(false),
        Err(e) => Err(runtime_fault(e)),
    }
}

/// Make sure the base image of `language` exists, building it if needed
pub async fn ensure_base_image(
    docker: &Docker,
    language: Language,
    build_timeout: Duration,
) -> Result<BaseImageStatus, EngineError> {
    let tag = base_image_tag(language);
    if image_exists(docker, &tag).await? {
        return Ok(BaseImageStatus::Cached);
    }

    let lock = build_lock(&tag);
    let _guard = lock.lock().await;

    // Another submission may have finished the build while we waited
    if image_exists(docker, &tag).await? {
        debug!("Base image {} appeared while waiting for the build lock", tag);
        return Ok(BaseImageStatus::Cached);
    }

    let recipe = Recipe::base(language).render();
    let tar = archive::pack_recipe(&recipe).map_err(EngineError::AssemblyFailed)?;
    let outcome = build_image(docker, &tag, tar, build_timeout)
        .await
        .map_err(|e| match e {
            EngineError::Timeout { limit, .. } => EngineError::Timeout {
                phase: TimeoutPhase::BaseImage,
                limit,
            },
            other => other,
        })?;
    match outcome {
        BuildOutcome::Built => {
            info!("Built base image {}", tag);
            Ok(BaseImageStatus::Built)
        }
        BuildOutcome::Failed(log) => Err(EngineError::BuildFailed {
            stage: BuildStage::Base,
            logs: log.text(),
        }),
    }
}

/// Build the base images of `languages`, reporting each outcome
pub async fn build_base_images(
    languages: &[Language],
    build_timeout: Duration,
) -> Result<Vec<(Language, Result<BaseImageStatus, EngineError>)>, EngineError> {
    let docker = client().await?;
    let mut report = Vec::with_capacity(languages.len());
    for &language in languages {
        let outcome = ensure_base_image(docker, language, build_timeout).await;
        if let Err(e) = &outcome {
            warn!("Base image for {} failed: {}", language, e);
        }
        report.push((language, outcome));
    }
    Ok(report)
}

/// State of every language's base image
pub async fn list_base_images() -> Result<Vec<BaseImageInfo>, EngineError> {
    let docker = client().await?;
    let mut infos = Vec::new();
    for language in Language::ALL {
        let tag = base_image_tag(language);
        let details = match docker.inspect_image(&tag).await {
            Ok(image) => Some((
                image.created.unwrap_or_default(),
                image.size.unwrap_or_default(),
            )),
            Err(e) if is_not_found(&e) => None,
            Err(e) => return Err(runtime_fault(e)),
        };
        infos.push(BaseImageInfo {
            language,
            tag,
            details,
        });
    }
    Ok(infos)
}

/// Remove every cached base image (current and stale digests)
pub async fn clean_base_images() -> Result<usize, EngineError> {
    let docker = client().await?;
    let filters = HashMap::from([(
        "reference".to_string(),
        vec!["code-runner-*-base".to_string()],
    )]);
    let images = docker
        .list_images(Some(ListImagesOptions {
            filters: Some(filters),
            ..Default::default()
        }))
        .await
        .map_err(runtime_fault)?;

    let mut removed = 0;
    for image in images {
        for tag in image.repo_tags {
            let options = RemoveImageOptions {
                force: true,
                ..Default::default()
            };
            match docker.remove_image(&tag, Some(options), None).await {
                Ok(_) => {
                    info!("Removed base image {}", tag);
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove base image {}: {}", tag, e),
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_lock_is_shared_per_tag() {
        let a = build_lock("code-runner-python-base:abc");
        let b = build_lock("code-runner-python-base:abc");
        let c = build_lock("code-runner-ruby-base:abc");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_build_lock_serializes_holders() {
        let lock = build_lock("code-runner-test-base:serial");
        let guard = tokio_test::block_on(lock.lock());
        tokio_test::assert_err!(build_lock("code-runner-test-base:serial").try_lock());
        drop(guard);
        tokio_test::assert_ok!(build_lock("code-runner-test-base:serial").try_lock());
    }
}
