//! Dependency resolution
//!
//! Classifies each requested dependency token exactly once:
//! - `Local`: the token names an existing path (relative to the resolver
//!   root) and is copied into the build context verbatim
//! - `Registry`: anything else, installed by the language's package manager
//!   during the image build
//!
//! No network access happens here.

pub mod manifest;

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

pub use manifest::PackageManager;

use crate::core::{EngineError, Language};

/// Kind of a local dependency on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalKind {
    File,
    Directory,
}

/// A single classified dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyToken {
    Local {
        /// Token as submitted
        token: String,
        /// Resolved source path
        path: PathBuf,
        kind: LocalKind,
        /// Name of the copy inside the build context
        staged_name: String,
    },
    Registry {
        name: String,
    },
}

/// Resolved dependency set of one submission
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyManifest {
    /// Registry packages, in request order
    pub registry: Vec<String>,
    /// Local artifacts to copy
    pub local: Vec<DependencyToken>,
}

impl DependencyManifest {
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty() && self.local.is_empty()
    }

    pub fn has_registry(&self) -> bool {
        !self.registry.is_empty()
    }

    fn push(&mut self, token: DependencyToken) {
        match token {
            DependencyToken::Registry { name } => self.registry.push(name),
            local @ DependencyToken::Local { .. } => self.local.push(local),
        }
    }
}

/// Resolves dependency tokens against an invocation directory
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    root: PathBuf,
}

impl DependencyResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolver rooted at the process working directory
    pub fn from_current_dir() -> Self {
        let root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Classify and validate the tokens of one submission
    pub fn resolve(
        &self,
        tokens: &[String],
        language: Language,
    ) -> Result<DependencyManifest, EngineError> {
        let spec = language.spec();
        let mut manifest = DependencyManifest::default();
        let mut seen_registry = HashSet::new();

        // Names the context already uses for generated files
        let mut staged_names: HashSet<String> = HashSet::new();
        staged_names.insert(spec.entry_file_name.to_string());
        staged_names.insert("Dockerfile".to_string());
        if let Some(pm) = spec.package_manager {
            staged_names.insert(pm.manifest_file().to_string());
        }

        for raw in tokens {
            let token = raw.as_str();
            validate_token_shape(token)?;

            match self.classify(token)? {
                Some((path, kind)) => {
                    let staged_name = Path::new(token)
                        .components()
                        .filter_map(|c| match c {
                            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
                            _ => None,
                        })
                        .last()
                        .ok_or_else(|| {
                            EngineError::dependency(token, "path has no final component")
                        })?;

                    if !staged_names.insert(staged_name.clone()) {
                        return Err(EngineError::dependency(
                            token,
                            format!("name `{}` collides with another build context entry", staged_name),
                        ));
                    }

                    debug!("Dependency {} resolved as local {:?} at {:?}", token, kind, path);
                    manifest.push(DependencyToken::Local {
                        token: token.to_string(),
                        path,
                        kind,
                        staged_name,
                    });
                }
                None => {
                    let pm = spec.package_manager.ok_or_else(|| {
                        EngineError::dependency(
                            token,
                            format!("no package manager for {}", language),
                        )
                    })?;

                    if !pm.is_valid_token(token) {
                        warn!("Rejected registry dependency token {:?}", token);
                        return Err(EngineError::dependency(
                            token,
                            "invalid package name",
                        ));
                    }

                    if seen_registry.insert(token.to_string()) {
                        debug!("Dependency {} resolved as registry package", token);
                        manifest.push(DependencyToken::Registry {
                            name: token.to_string(),
                        });
                    }
                }
            }
        }

        Ok(manifest)
    }

    /// Returns the local path and kind if the token names an existing path.
    ///
    /// The path is canonicalized, so symlinks are followed and the target
    /// must still lie under the resolver root.
    fn classify(&self, token: &str) -> Result<Option<(PathBuf, LocalKind)>, EngineError> {
        let path = self.root.join(token);
        match std::fs::symlink_metadata(&path) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(EngineError::dependency(
                    token,
                    format!("unreadable local path: {}", e),
                ))
            }
        }

        let unreadable = |e: std::io::Error| {
            EngineError::dependency(token, format!("unreadable local path: {}", e))
        };
        let root = self.root.canonicalize().map_err(unreadable)?;
        let resolved = path.canonicalize().map_err(unreadable)?;
        if resolved == root || !resolved.starts_with(&root) {
            warn!("Local dependency {:?} resolves outside {:?}", token, root);
            return Err(EngineError::dependency(
                token,
                "local paths must stay inside the invocation directory",
            ));
        }

        let metadata = std::fs::metadata(&resolved).map_err(unreadable)?;
        let kind = if metadata.is_dir() {
            LocalKind::Directory
        } else {
            LocalKind::File
        };
        Ok(Some((resolved, kind)))
    }
}

fn validate_token_shape(token: &str) -> Result<(), EngineError> {
    if token.trim().is_empty() {
        return Err(EngineError::dependency(token, "empty dependency token"));
    }
    if token.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(EngineError::dependency(
            token,
            "dependency token contains whitespace or control characters",
        ));
    }
    if token.starts_with('-') {
        return Err(EngineError::dependency(
            token,
            "dependency token must not start with '-'",
        ));
    }
    if !is_safe_path(token) {
        return Err(EngineError::dependency(
            token,
            "local paths must stay inside the invocation directory",
        ));
    }
    Ok(())
}

/// Check that a token names something strictly below the resolver root
fn is_safe_path(token: &str) -> bool {
    let path = Path::new(token);
    if path.is_absolute() {
        return false;
    }
    let mut named = false;
    for component in path.components() {
        match component {
            Component::Normal(_) => named = true,
            Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) | Component::RootDir => return false,
        }
    }
    named
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_tokens_give_empty_manifest() {
        let root = tempfile::tempdir().unwrap();
        let resolver = DependencyResolver::new(root.path());

        let manifest = resolver.resolve(&[], Language::Python).unwrap();
        assert!(manifest.is_empty());
        assert!(!manifest.has_registry());
    }

    #[test]
    fn test_classifies_local_and_registry() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("mylib")).unwrap();
        std::fs::write(root.path().join("helper.py"), "X = 1\n").unwrap();
        let resolver = DependencyResolver::new(root.path());

        let manifest = resolver
            .resolve(&tokens(&["requests", "mylib", "helper.py", "numpy"]), Language::Python)
            .unwrap();

        assert_eq!(manifest.registry, vec!["requests", "numpy"]);
        assert_eq!(manifest.local.len(), 2);
        match &manifest.local[0] {
            DependencyToken::Local { kind, staged_name, .. } => {
                assert_eq!(*kind, LocalKind::Directory);
                assert_eq!(staged_name, "mylib");
            }
            other => panic!("expected local token, got {:?}", other),
        }
        match &manifest.local[1] {
            DependencyToken::Local { kind, .. } => assert_eq!(*kind, LocalKind::File),
            other => panic!("expected local token, got {:?}", other),
        }
    }

    #[test]
    fn test_registry_duplicates_keep_first() {
        let root = tempfile::tempdir().unwrap();
        let resolver = DependencyResolver::new(root.path());

        let manifest = resolver
            .resolve(&tokens(&["b", "a", "b", "c"]), Language::JavaScript)
            .unwrap();
        assert_eq!(manifest.registry, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_rejects_option_like_tokens() {
        let root = tempfile::tempdir().unwrap();
        let resolver = DependencyResolver::new(root.path());

        let err = resolver
            .resolve(&tokens(&["--index-url=http://evil"]), Language::Python)
            .unwrap_err();
        match err {
            EngineError::DependencyResolutionFailed { token, .. } => {
                assert_eq!(token, "--index-url=http://evil")
            }
            other => panic!("unexpected error: {:?}", other),
        }

        assert!(resolver.resolve(&tokens(&["two words"]), Language::Python).is_err());
        assert!(resolver.resolve(&tokens(&["/etc/passwd"]), Language::Python).is_err());
        assert!(resolver.resolve(&tokens(&["../secrets"]), Language::Python).is_err());
        assert!(resolver.resolve(&tokens(&[""]), Language::Python).is_err());
    }

    #[test]
    fn test_rejects_the_root_itself() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join(".env"), "SECRET=1\n").unwrap();
        let resolver = DependencyResolver::new(root.path());

        for token in [".", "./", "./.", "sub/.."] {
            let err = resolver.resolve(&tokens(&[token]), Language::Python).unwrap_err();
            assert!(
                matches!(err, EngineError::DependencyResolutionFailed { .. }),
                "token {:?} gave {:?}",
                token,
                err
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_symlinks_leaving_the_root() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("id_rsa"), "private\n").unwrap();
        std::fs::create_dir(outside.path().join("secrets")).unwrap();

        let root = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path().join("id_rsa"), root.path().join("key")).unwrap();
        std::os::unix::fs::symlink(outside.path().join("secrets"), root.path().join("vault")).unwrap();
        let resolver = DependencyResolver::new(root.path());

        for token in ["key", "vault", "vault/../vault"] {
            let err = resolver.resolve(&tokens(&[token]), Language::Python).unwrap_err();
            assert!(err.to_string().contains("inside the invocation directory"), "{}", err);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_inside_root_keeps_its_own_name() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("real_lib")).unwrap();
        std::os::unix::fs::symlink(root.path().join("real_lib"), root.path().join("mylib")).unwrap();
        let resolver = DependencyResolver::new(root.path());

        let manifest = resolver.resolve(&tokens(&["./mylib"]), Language::Python).unwrap();
        match &manifest.local[0] {
            DependencyToken::Local { kind, staged_name, .. } => {
                assert_eq!(*kind, LocalKind::Directory);
                assert_eq!(staged_name, "mylib");
            }
            other => panic!("expected local token, got {:?}", other),
        }
    }

    #[test]
    fn test_registry_without_package_manager() {
        let root = tempfile::tempdir().unwrap();
        let resolver = DependencyResolver::new(root.path());

        let err = resolver.resolve(&tokens(&["boost"]), Language::Cpp).unwrap_err();
        assert!(err.to_string().contains("no package manager"));
    }

    #[test]
    fn test_local_name_collision() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("main.py"), "print(1)\n").unwrap();
        let resolver = DependencyResolver::new(root.path());

        let err = resolver.resolve(&tokens(&["main.py"]), Language::Python).unwrap_err();
        assert!(err.to_string().contains("collides"));
    }
}
