//! Isolation handle
//!
//! Tracks the container and submission image created for one submission.
//! `teardown()` removes both; a handle dropped without teardown (the
//! submission future was cancelled) schedules the same forced removal on the
//! current Tokio runtime so no sandbox outlives its submission.

use bollard::query_parameters::{RemoveContainerOptions, RemoveImageOptions};
use bollard::Docker;
use tracing::{debug, info, warn};

use crate::sandbox::docker::is_not_found;

/// Sandbox resources owned by one submission
#[derive(Debug)]
pub struct IsolationHandle {
    docker: Docker,
    image_tag: String,
    image_built: bool,
    container_id: Option<String>,
    torn_down: bool,
}

impl IsolationHandle {
    pub fn new(docker: Docker, image_tag: String) -> Self {
        Self {
            docker,
            image_tag,
            image_built: false,
            container_id: None,
            torn_down: false,
        }
    }

    pub fn image_tag(&self) -> &str {
        &self.image_tag
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    /// Record that a build of the image was started
    pub fn mark_image_built(&mut self) {
        self.image_built = true;
    }

    pub fn set_container(&mut self, id: String) {
        self.container_id = Some(id);
    }

    /// Force-remove the container, then the image. Failures are only logged.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        let image = self.image_built.then(|| self.image_tag.clone());
        remove_resources(&self.docker, self.container_id.take(), image).await;
        info!("Torn down sandbox {}", self.image_tag);
    }
}

impl Drop for IsolationHandle {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        let container = self.container_id.take();
        let image = self.image_built.then(|| self.image_tag.clone());
        if container.is_none() && image.is_none() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!("Sandbox {} dropped without teardown, removing in background", self.image_tag);
                let docker = self.docker.clone();
                runtime.spawn(async move {
                    remove_resources(&docker, container, image).await;
                });
            }
            Err(_) => warn!(
                "Sandbox {} dropped outside a Tokio runtime, container {:?} may be orphaned",
                self.image_tag, container
            ),
        }
    }
}

async fn remove_resources(docker: &Docker, container: Option<String>, image: Option<String>) {
    if let Some(id) = container {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match docker.remove_container(&id, Some(options)).await {
            Ok(()) => debug!("Removed container {}", id),
            Err(e) if is_not_found(&e) => debug!("Container {} already gone", id),
            Err(e) => warn!("Failed to remove container {}: {}", id, e),
        }
    }

    if let Some(tag) = image {
        let options = RemoveImageOptions {
            force: true,
            ..Default::default()
        };
        match docker.remove_image(&tag, Some(options), None).await {
            Ok(_) => debug!("Removed image {}", tag),
            Err(e) if is_not_found(&e) => debug!("Image {} was never created", tag),
            Err(e) => warn!("Failed to remove image {}: {}", tag, e),
        }
    }
}
