//! Language registry
//!
//! Closed set of supported languages. Each variant maps to a static
//! [`LanguageSpec`] describing the entry file, the isolation recipe and the
//! compile/run command templates. Nothing here is mutated after startup.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::command::{Arg, CommandSlots, CommandTemplate, Slot};
use crate::core::error::EngineError;
use crate::deps::PackageManager;

/// Working directory of every sandbox
pub const SANDBOX_WORKDIR: &str = "/app";

/// Supported programming language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    Ruby,
    Php,
    Perl,
    C,
    Cpp,
    Java,
}

/// Static description of how a language is built and run
#[derive(Debug)]
pub struct LanguageSpec {
    /// Canonical identifier (e.g. "python")
    pub id: &'static str,
    /// Source file extension without the dot
    pub source_extension: &'static str,
    /// File name the submitted code is written to
    pub entry_file_name: &'static str,
    /// Upstream image the recipe starts FROM
    pub base_image: &'static str,
    /// Base isolation recipe (Dockerfile text)
    pub recipe: &'static str,
    /// Compile command (None for interpreted languages)
    pub compile_command: Option<CommandTemplate>,
    /// Run command
    pub run_command: CommandTemplate,
    /// Package manager for registry dependencies
    pub package_manager: Option<PackageManager>,
    /// Environment variable listing extra module search directories
    pub search_path_var: Option<&'static str>,
}

const PYTHON: LanguageSpec = LanguageSpec {
    id: "python",
    source_extension: "py",
    entry_file_name: "main.py",
    base_image: "python:3.11-slim",
    recipe: include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/recipes/python.Dockerfile")),
    compile_command: None,
    run_command: CommandTemplate(&[Arg::Lit("python3"), Arg::Slot(Slot::Source)]),
    package_manager: Some(PackageManager::Pip),
    search_path_var: Some("PYTHONPATH"),
};

const JAVASCRIPT: LanguageSpec = LanguageSpec {
    id: "javascript",
    source_extension: "js",
    entry_file_name: "main.js",
    base_image: "node:18-slim",
    recipe: include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/recipes/javascript.Dockerfile")),
    compile_command: None,
    run_command: CommandTemplate(&[Arg::Lit("node"), Arg::Slot(Slot::Source)]),
    package_manager: Some(PackageManager::Npm),
    search_path_var: Some("NODE_PATH"),
};

const RUBY: LanguageSpec = LanguageSpec {
    id: "ruby",
    source_extension: "rb",
    entry_file_name: "main.rb",
    base_image: "ruby:3.2-slim",
    recipe: include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/recipes/ruby.Dockerfile")),
    compile_command: None,
    run_command: CommandTemplate(&[Arg::Lit("ruby"), Arg::Slot(Slot::Source)]),
    package_manager: Some(PackageManager::Bundler),
    search_path_var: Some("RUBYLIB"),
};

const PHP: LanguageSpec = LanguageSpec {
    id: "php",
    source_extension: "php",
    entry_file_name: "main.php",
    base_image: "php:8.2-cli-alpine",
    recipe: include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/recipes/php.Dockerfile")),
    compile_command: None,
    run_command: CommandTemplate(&[Arg::Lit("php"), Arg::Slot(Slot::Source)]),
    package_manager: None,
    search_path_var: None,
};

const PERL: LanguageSpec = LanguageSpec {
    id: "perl",
    source_extension: "pl",
    entry_file_name: "main.pl",
    base_image: "perl:5.38-slim",
    recipe: include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/recipes/perl.Dockerfile")),
    compile_command: None,
    run_command: CommandTemplate(&[Arg::Lit("perl"), Arg::Slot(Slot::Source)]),
    package_manager: Some(PackageManager::Cpanm),
    search_path_var: Some("PERL5LIB"),
};

const C: LanguageSpec = LanguageSpec {
    id: "c",
    source_extension: "c",
    entry_file_name: "main.c",
    base_image: "gcc:13",
    recipe: include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/recipes/c.Dockerfile")),
    compile_command: Some(CommandTemplate(&[
        Arg::Lit("gcc"),
        Arg::Lit("-O2"),
        Arg::Lit("-o"),
        Arg::Slot(Slot::Output),
        Arg::Slot(Slot::Source),
        Arg::Lit("-lm"),
    ])),
    run_command: CommandTemplate(&[Arg::Slot(Slot::Output)]),
    package_manager: None,
    search_path_var: Some("CPATH"),
};

const CPP: LanguageSpec = LanguageSpec {
    id: "cpp",
    source_extension: "cpp",
    entry_file_name: "main.cpp",
    base_image: "gcc:13",
    recipe: include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/recipes/cpp.Dockerfile")),
    compile_command: Some(CommandTemplate(&[
        Arg::Lit("g++"),
        Arg::Lit("-O2"),
        Arg::Lit("-std=c++17"),
        Arg::Lit("-o"),
        Arg::Slot(Slot::Output),
        Arg::Slot(Slot::Source),
        Arg::Lit("-lm"),
    ])),
    run_command: CommandTemplate(&[Arg::Slot(Slot::Output)]),
    package_manager: None,
    search_path_var: Some("CPATH"),
};

const JAVA: LanguageSpec = LanguageSpec {
    id: "java",
    source_extension: "java",
    entry_file_name: "Solution.java",
    base_image: "eclipse-temurin:17-jdk",
    recipe: include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/recipes/java.Dockerfile")),
    compile_command: Some(CommandTemplate(&[
        Arg::Lit("javac"),
        Arg::Lit("-d"),
        Arg::Slot(Slot::OutputDir),
        Arg::Slot(Slot::Source),
    ])),
    run_command: CommandTemplate(&[
        Arg::Lit("java"),
        Arg::Lit("-cp"),
        Arg::Slot(Slot::OutputDir),
        Arg::Slot(Slot::EntryName),
    ]),
    package_manager: None,
    search_path_var: None,
};

impl Language {
    pub const ALL: [Language; 8] = [
        Language::Python,
        Language::JavaScript,
        Language::Ruby,
        Language::Php,
        Language::Perl,
        Language::C,
        Language::Cpp,
        Language::Java,
    ];

    /// Look up a language by identifier or alias (case-insensitive)
    pub fn lookup(id: &str) -> Result<Language, EngineError> {
        let language = match id.trim().to_lowercase().as_str() {
            "python" | "python3" | "py" => Language::Python,
            "javascript" | "js" | "node" | "nodejs" => Language::JavaScript,
            "ruby" | "rb" => Language::Ruby,
            "php" => Language::Php,
            "perl" | "pl" => Language::Perl,
            "c" => Language::C,
            "cpp" | "c++" | "cxx" => Language::Cpp,
            "java" => Language::Java,
            _ => return Err(EngineError::UnsupportedLanguage(id.to_string())),
        };
        Ok(language)
    }

    /// Detect language from a source file extension (without the dot)
    pub fn from_extension(ext: &str) -> Option<Language> {
        match ext.to_lowercase().as_str() {
            "py" => Some(Language::Python),
            "js" => Some(Language::JavaScript),
            "rb" => Some(Language::Ruby),
            "php" => Some(Language::Php),
            "pl" => Some(Language::Perl),
            "c" => Some(Language::C),
            "cpp" | "cc" | "cxx" => Some(Language::Cpp),
            "java" => Some(Language::Java),
            _ => None,
        }
    }

    pub fn spec(self) -> &'static LanguageSpec {
        match self {
            Language::Python => &PYTHON,
            Language::JavaScript => &JAVASCRIPT,
            Language::Ruby => &RUBY,
            Language::Php => &PHP,
            Language::Perl => &PERL,
            Language::C => &C,
            Language::Cpp => &CPP,
            Language::Java => &JAVA,
        }
    }

    pub fn id(self) -> &'static str {
        self.spec().id
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.id())
    }
}

impl FromStr for Language {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::lookup(s)
    }
}

impl LanguageSpec {
    /// Slot values for this language inside the sandbox working directory
    pub fn slots(&self) -> CommandSlots {
        let entry_name = self
            .entry_file_name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(self.entry_file_name);

        CommandSlots {
            source: self.entry_file_name.to_string(),
            output: format!("{}/main", SANDBOX_WORKDIR),
            output_dir: SANDBOX_WORKDIR.to_string(),
            entry_name: entry_name.to_string(),
        }
    }

    pub fn compile_argv(&self) -> Option<Vec<String>> {
        self.compile_command.map(|cmd| cmd.render(&self.slots()))
    }

    pub fn run_argv(&self) -> Vec<String> {
        self.run_command.render(&self.slots())
    }
}

/// Get all supported language names
pub fn supported_languages() -> Vec<&'static str> {
    Language::ALL.iter().map(|l| l.id()).collect()
}
