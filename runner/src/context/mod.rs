//! Build context assembly
//!
//! Materializes one submission's self-contained build directory:
//! - the submitted code under the language's entry file name
//! - copies of local dependency files and directory trees
//! - the package manifest (only when registry dependencies exist)
//! - injected language assets
//! - the per-submission recipe, rendered as `Dockerfile`
//!
//! The directory is owned by [`BuildContext`] and removed when it is closed
//! or dropped, on every exit path.

pub mod recipe;

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

pub use recipe::{base_image_tag, BuildStage, Instruction, Recipe};

use crate::core::{EngineError, Language, SANDBOX_WORKDIR};
use crate::deps::{DependencyManifest, DependencyToken, LocalKind};

/// Name of the rendered recipe inside the context
pub const RECIPE_FILE: &str = "Dockerfile";

/// Prefix of every build context directory
pub const CONTEXT_PREFIX: &str = "code-runner-";

/// Options that shape assembly, taken from the engine configuration
#[derive(Debug, Clone, Default)]
pub struct AssemblyOptions {
    /// Parent directory of build contexts (system temp dir when None)
    pub work_root: Option<PathBuf>,
    /// Start the recipe FROM the cached base image
    pub layered: bool,
    /// Asset directories injected for this language
    pub assets: Vec<PathBuf>,
}

/// Ephemeral, exclusively owned build directory of one submission
#[derive(Debug)]
pub struct BuildContext {
    dir: TempDir,
    id: String,
    language: Language,
    recipe: Recipe,
}

impl BuildContext {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Submission-unique identifier (lowercase hex)
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Per-submission recipe (already written to `Dockerfile`)
    pub fn recipe(&self) -> &Recipe {
        &self.recipe
    }

    /// Remove the directory now, logging instead of failing
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => debug!("Removed build context {:?}", path),
            Err(e) => warn!("Failed to remove build context {:?}: {}", path, e),
        }
    }
}

/// Assemble the build context for one submission
pub fn assemble(
    language: Language,
    code: &[u8],
    manifest: &DependencyManifest,
    options: &AssemblyOptions,
) -> Result<BuildContext, EngineError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(CONTEXT_PREFIX);
    let dir = match &options.work_root {
        Some(root) => builder.tempdir_in(root),
        None => builder.tempdir(),
    }
    .map_err(EngineError::AssemblyFailed)?;

    let mut context = BuildContext {
        dir,
        id: uuid::Uuid::new_v4().simple().to_string(),
        language,
        recipe: Recipe::for_submission(language, options.layered),
    };

    if let Err(e) = populate(&mut context, code, manifest, options) {
        context.close();
        return Err(EngineError::AssemblyFailed(e));
    }

    info!(
        "Assembled build context {:?} for {} (registry deps: {}, local deps: {})",
        context.path(),
        language,
        manifest.registry.len(),
        manifest.local.len()
    );

    Ok(context)
}

fn populate(
    context: &mut BuildContext,
    code: &[u8],
    manifest: &DependencyManifest,
    options: &AssemblyOptions,
) -> io::Result<()> {
    let spec = context.language.spec();
    let root = context.dir.path().to_path_buf();

    fs::write(root.join(spec.entry_file_name), code)?;

    for token in &manifest.local {
        if let DependencyToken::Local {
            path,
            kind,
            staged_name,
            ..
        } = token
        {
            let dest = root.join(staged_name);
            match kind {
                LocalKind::Directory => copy_tree(path, &dest)?,
                LocalKind::File => {
                    fs::copy(path, &dest)?;
                }
            }
        }
    }

    if manifest.has_registry() {
        if let Some(pm) = spec.package_manager {
            fs::write(root.join(pm.manifest_file()), pm.render(&manifest.registry))?;
            context
                .recipe
                .push_run(BuildStage::DependencyInstall, &pm.install_argv());
        }
    }

    if !options.assets.is_empty() {
        let mut taken: HashSet<String> = fs::read_dir(&root)?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        let mut search_paths = Vec::new();

        for asset in &options.assets {
            let name = asset
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, format!("invalid asset path {:?}", asset))
                })?;
            if !taken.insert(name.clone()) {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("asset {:?} collides with an existing build context entry", name),
                ));
            }

            if fs::metadata(asset)?.is_dir() {
                copy_tree(asset, &root.join(&name))?;
            } else {
                fs::copy(asset, root.join(&name))?;
            }
            search_paths.push(format!("{}/{}", SANDBOX_WORKDIR, name));
        }

        if let Some(var) = spec.search_path_var {
            context
                .recipe
                .push_env(BuildStage::Assets, var, &search_paths.join(":"));
        }
    }

    if let Some(argv) = spec.compile_argv() {
        context.recipe.push_run(BuildStage::Compile, &argv);
    }

    let rendered = context.recipe.render();
    debug!("Recipe for build context {}:\n{}", context.id, rendered);
    fs::write(root.join(RECIPE_FILE), rendered)?;

    Ok(())
}

/// Recursively copy a directory tree, preserving relative structure
pub fn copy_tree(src: &Path, dest: &Path) -> io::Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dest.join(entry.file_name());

        if file_type.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
        } else {
            warn!("Skipping non-regular file {:?} in local dependency", entry.path());
        }
    }
    Ok(())
}
