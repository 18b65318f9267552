//! Language-native dependency manifests
//!
//! Each package manager knows the manifest file it reads and the install
//! command run inside the image build. Manifests list packages in the order
//! they were requested.

use serde_json::{json, Map, Value};

/// Package manager used to install registry dependencies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    /// pip with requirements.txt
    Pip,
    /// npm with package.json
    Npm,
    /// Bundler with Gemfile
    Bundler,
    /// cpanminus with cpanfile
    Cpanm,
}

impl PackageManager {
    /// Manifest file name written into the build context
    pub fn manifest_file(self) -> &'static str {
        match self {
            PackageManager::Pip => "requirements.txt",
            PackageManager::Npm => "package.json",
            PackageManager::Bundler => "Gemfile",
            PackageManager::Cpanm => "cpanfile",
        }
    }

    /// Install command run from the sandbox working directory
    pub fn install_argv(self) -> Vec<String> {
        let argv: &[&str] = match self {
            PackageManager::Pip => &["pip", "install", "--no-cache-dir", "-r", "requirements.txt"],
            PackageManager::Npm => &["npm", "install", "--no-audit", "--no-fund"],
            PackageManager::Bundler => &["bundle", "install"],
            PackageManager::Cpanm => &["cpanm", "--notest", "--installdeps", "."],
        };
        argv.iter().map(|s| s.to_string()).collect()
    }

    /// Render the manifest contents for the given package tokens
    pub fn render(self, packages: &[String]) -> String {
        match self {
            PackageManager::Pip => {
                let mut out = String::new();
                for package in packages {
                    out.push_str(package);
                    out.push('\n');
                }
                out
            }
            PackageManager::Npm => {
                let mut dependencies = Map::new();
                for package in packages {
                    let (name, version) = split_version(package);
                    dependencies.insert(
                        name.to_string(),
                        Value::String(version.unwrap_or("latest").to_string()),
                    );
                }
                let manifest = json!({
                    "name": "code-runner",
                    "version": "1.0.0",
                    "dependencies": dependencies,
                });
                let mut out = serde_json::to_string_pretty(&manifest).unwrap_or_default();
                out.push('\n');
                out
            }
            PackageManager::Bundler => {
                let mut out = String::from("source \"https://rubygems.org\"\n\n");
                for package in packages {
                    match split_version(package) {
                        (name, Some(version)) => {
                            out.push_str(&format!("gem {:?}, {:?}\n", name, version))
                        }
                        (name, None) => out.push_str(&format!("gem {:?}\n", name)),
                    }
                }
                out
            }
            PackageManager::Cpanm => {
                let mut out = String::new();
                for package in packages {
                    match split_version(package) {
                        (name, Some(version)) => {
                            out.push_str(&format!("requires '{}', '{}';\n", name, version))
                        }
                        (name, None) => out.push_str(&format!("requires '{}';\n", name)),
                    }
                }
                out
            }
        }
    }

    /// Characters a package token may contain for this manager
    pub fn is_valid_token(self, token: &str) -> bool {
        let allowed = |c: char| match self {
            // pip requirement specifiers: name[extra]>=1.0,<2
            PackageManager::Pip => {
                c.is_ascii_alphanumeric() || "._-[],=<>!~*".contains(c)
            }
            PackageManager::Npm => c.is_ascii_alphanumeric() || "._-@/^~*<>=".contains(c),
            PackageManager::Bundler => c.is_ascii_alphanumeric() || "._-@~<>=".contains(c),
            PackageManager::Cpanm => c.is_ascii_alphanumeric() || "._-:@".contains(c),
        };
        !token.is_empty() && token.chars().all(allowed)
    }
}

/// Split `name@version`, keeping a leading scope marker (`@scope/pkg@1.0`)
fn split_version(token: &str) -> (&str, Option<&str>) {
    match token.rfind('@') {
        Some(idx) if idx > 0 && idx + 1 < token.len() => (&token[..idx], Some(&token[idx + 1..])),
        _ => (token, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packages(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_requirements_preserve_order() {
        let out = PackageManager::Pip.render(&packages(&["requests==2.31.0", "numpy"]));
        assert_eq!(out, "requests==2.31.0\nnumpy\n");
    }

    #[test]
    fn test_package_json_versions_and_order() {
        let out = PackageManager::Npm.render(&packages(&["zod", "left-pad@1.3.0", "@types/node"]));
        let value: Value = serde_json::from_str(&out).unwrap();
        let deps = value["dependencies"].as_object().unwrap();

        let keys: Vec<&String> = deps.keys().collect();
        assert_eq!(keys, vec!["zod", "left-pad", "@types/node"]);
        assert_eq!(deps["left-pad"], "1.3.0");
        assert_eq!(deps["@types/node"], "latest");
        assert_eq!(value["name"], "code-runner");
    }

    #[test]
    fn test_gemfile_and_cpanfile() {
        let gemfile = PackageManager::Bundler.render(&packages(&["colorize", "rake@13.0"]));
        assert!(gemfile.starts_with("source \"https://rubygems.org\""));
        assert!(gemfile.contains("gem \"colorize\"\n"));
        assert!(gemfile.contains("gem \"rake\", \"13.0\"\n"));

        let cpanfile = PackageManager::Cpanm.render(&packages(&["JSON::PP"]));
        assert_eq!(cpanfile, "requires 'JSON::PP';\n");
    }

    #[test]
    fn test_token_validation() {
        assert!(PackageManager::Pip.is_valid_token("pandas>=2.0"));
        assert!(!PackageManager::Pip.is_valid_token("x; curl evil"));
        assert!(PackageManager::Npm.is_valid_token("@scope/pkg@1.2.3"));
        assert!(!PackageManager::Npm.is_valid_token("git+ssh://host/repo"));
        assert!(!PackageManager::Cpanm.is_valid_token(""));
    }
}
