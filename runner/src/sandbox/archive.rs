//! In-memory tar archives used as image build contexts

use std::io;
use std::path::Path;

use crate::context::RECIPE_FILE;

/// Pack a whole build context directory
pub fn pack_dir(dir: &Path) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder.append_dir_all(".", dir)?;
    builder.into_inner()
}

/// Pack a context holding nothing but a Dockerfile
pub fn pack_recipe(recipe: &str) -> io::Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_size(recipe.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, RECIPE_FILE, recipe.as_bytes())?;
    builder.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Read;

    fn entries(bytes: &[u8]) -> BTreeMap<String, Vec<u8>> {
        let mut archive = tar::Archive::new(bytes);
        let mut out = BTreeMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            out.insert(path.trim_start_matches("./").to_string(), data);
        }
        out
    }

    #[test]
    fn test_pack_dir_keeps_structure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.py"), "print(1)\n").unwrap();
        std::fs::create_dir(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib").join("util.py"), "X = 2\n").unwrap();

        let files = entries(&pack_dir(dir.path()).unwrap());
        assert_eq!(files["main.py"], b"print(1)\n");
        assert_eq!(files["lib/util.py"], b"X = 2\n");
    }

    #[test]
    fn test_pack_recipe() {
        let files = entries(&pack_recipe("FROM gcc:13\n").unwrap());
        assert_eq!(files.len(), 1);
        assert_eq!(files["Dockerfile"], b"FROM gcc:13\n");
    }
}
