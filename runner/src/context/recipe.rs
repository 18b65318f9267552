//! Isolation recipes
//!
//! A recipe is a Dockerfile kept as an ordered list of instructions, each
//! tagged with the build stage it belongs to. The stage tags let a failed
//! image build be attributed to dependency installation, compilation, etc.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::core::{to_exec_form, Language, SANDBOX_WORKDIR};

/// Stage of an image build an instruction belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStage {
    /// Base image and toolchain setup
    Base,
    /// Copying the build context into the image
    Context,
    /// Package manager install
    DependencyInstall,
    /// Injected language assets
    Assets,
    /// Source compilation
    Compile,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildStage::Base => "base",
            BuildStage::Context => "context",
            BuildStage::DependencyInstall => "dependency_install",
            BuildStage::Assets => "assets",
            BuildStage::Compile => "compile",
        };
        write!(f, "{}", s)
    }
}

/// One Dockerfile instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub stage: BuildStage,
    pub text: String,
}

/// Ordered, stage-tagged Dockerfile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipe {
    instructions: Vec<Instruction>,
}

impl Recipe {
    /// Parse recipe text; every instruction is tagged with `stage`
    pub fn parse(text: &str, stage: BuildStage) -> Self {
        let instructions = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| Instruction {
                stage,
                text: line.to_string(),
            })
            .collect();
        Self { instructions }
    }

    /// Base recipe of a language, used to build the cached base image
    pub fn base(language: Language) -> Self {
        Self::parse(language.spec().recipe, BuildStage::Base)
    }

    /// Starting point of a per-submission recipe.
    ///
    /// With `layered` the recipe starts FROM the cached base image; otherwise
    /// it repeats the whole base recipe so the build needs no cache.
    pub fn for_submission(language: Language, layered: bool) -> Self {
        let mut recipe = if layered {
            Self::parse(
                &format!("FROM {}\nWORKDIR {}", base_image_tag(language), SANDBOX_WORKDIR),
                BuildStage::Base,
            )
        } else {
            Self::base(language)
        };
        recipe.push(BuildStage::Context, format!("COPY . {}/", SANDBOX_WORKDIR));
        recipe
    }

    /// Append a raw instruction
    pub fn push(&mut self, stage: BuildStage, text: impl Into<String>) {
        self.instructions.push(Instruction {
            stage,
            text: text.into(),
        });
    }

    /// Append an exec-form RUN instruction (no shell involved)
    pub fn push_run(&mut self, stage: BuildStage, argv: &[String]) {
        self.push(stage, format!("RUN {}", to_exec_form(argv)));
    }

    /// Append an ENV instruction with a quoted value
    pub fn push_env(&mut self, stage: BuildStage, key: &str, value: &str) {
        let quoted = serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string());
        self.push(stage, format!("ENV {}={}", key, quoted));
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Stage of the 1-based build step `step`, as numbered by the builder
    pub fn stage_of_step(&self, step: usize) -> Option<BuildStage> {
        step.checked_sub(1)
            .and_then(|idx| self.instructions.get(idx))
            .map(|i| i.stage)
    }

    pub fn has_stage(&self, stage: BuildStage) -> bool {
        self.instructions.iter().any(|i| i.stage == stage)
    }

    /// Dockerfile text
    pub fn render(&self) -> String {
        let mut out = String::new();
        for instruction in &self.instructions {
            out.push_str(&instruction.text);
            out.push('\n');
        }
        out
    }
}

/// Cached base image tag for a language.
///
/// The tag embeds a digest of the base recipe, so editing a recipe never
/// reuses a stale image.
pub fn base_image_tag(language: Language) -> String {
    let mut hasher = Sha256::new();
    hasher.update(language.spec().recipe.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("code-runner-{}-base:{}", language.id(), &digest[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_recipe_parses_every_instruction() {
        let recipe = Recipe::base(Language::Python);
        assert!(recipe.instructions()[0].text.starts_with("FROM python:"));
        assert!(recipe.instructions().iter().all(|i| i.stage == BuildStage::Base));
    }

    #[test]
    fn test_layered_recipe_starts_from_base_tag() {
        let recipe = Recipe::for_submission(Language::JavaScript, true);
        let rendered = recipe.render();

        assert!(rendered.starts_with(&format!("FROM {}\n", base_image_tag(Language::JavaScript))));
        assert!(rendered.contains("COPY . /app/\n"));
        assert_eq!(recipe.stage_of_step(3), Some(BuildStage::Context));
    }

    #[test]
    fn test_appending_does_not_touch_language_recipe() {
        let mut recipe = Recipe::for_submission(Language::Python, false);
        recipe.push_run(
            BuildStage::DependencyInstall,
            &["pip".to_string(), "install".to_string()],
        );

        assert!(recipe.render().ends_with("RUN [\"pip\",\"install\"]\n"));
        assert!(!Language::Python.spec().recipe.contains("pip"));
        let steps = recipe.instructions().len();
        assert_eq!(recipe.stage_of_step(steps), Some(BuildStage::DependencyInstall));
        assert_eq!(recipe.stage_of_step(0), None);
    }

    #[test]
    fn test_base_tag_is_stable_and_lowercase() {
        let tag = base_image_tag(Language::Cpp);
        assert_eq!(tag, base_image_tag(Language::Cpp));
        assert!(tag.starts_with("code-runner-cpp-base:"));
        assert_eq!(tag, tag.to_lowercase());
        assert_ne!(tag, base_image_tag(Language::C));
    }
}
