use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Name of the manifest written next to every artifact and cached model.
pub const CHECKSUMS_FILE: &str = "checksums.json";

pub fn sha256_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn sha256_file<P: AsRef<Path>>(path: P) -> io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(sha256_bytes(&bytes))
}

/// A file whose content no longer matches its recorded digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumMismatch {
    pub file: String,
    pub expected: String,
    /// `None` when the file is missing.
    pub actual: Option<String>,
}

impl std::fmt::Display for ChecksumMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.actual {
            Some(actual) => write!(
                f,
                "{}: expected sha256 {}, got {}",
                self.file, self.expected, actual
            ),
            None => write!(f, "{}: file is missing", self.file),
        }
    }
}

/// SHA-256 digests of the files in a directory, keyed by file name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksums {
    pub files: BTreeMap<String, String>,
}

impl Checksums {
    /// Hashes `names` inside `dir`.
    pub fn compute<P, I, S>(dir: P, names: I) -> io::Result<Self>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let dir = dir.as_ref();
        let mut files = BTreeMap::new();
        for name in names {
            let name = name.as_ref();
            files.insert(name.to_string(), sha256_file(dir.join(name))?);
        }
        Ok(Self { files })
    }

    pub fn insert(&mut self, name: impl Into<String>, digest: impl Into<String>) {
        self.files.insert(name.into(), digest.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn load<P: AsRef<Path>>(dir: P) -> io::Result<Self> {
        let contents = fs::read_to_string(dir.as_ref().join(CHECKSUMS_FILE))?;
        serde_json::from_str(&contents).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn save<P: AsRef<Path>>(&self, dir: P) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(dir.as_ref().join(CHECKSUMS_FILE), json)
    }

    /// Re-hashes every recorded file and returns the ones that differ.
    pub fn verify<P: AsRef<Path>>(&self, dir: P) -> io::Result<Vec<ChecksumMismatch>> {
        let dir = dir.as_ref();
        let mut mismatches = Vec::new();
        for (name, expected) in &self.files {
            let path = dir.join(name);
            if !path.exists() {
                mismatches.push(ChecksumMismatch {
                    file: name.clone(),
                    expected: expected.clone(),
                    actual: None,
                });
                continue;
            }
            let actual = sha256_file(&path)?;
            if &actual != expected {
                log::warn!("Checksum mismatch for {:?}", path);
                mismatches.push(ChecksumMismatch {
                    file: name.clone(),
                    expected: expected.clone(),
                    actual: Some(actual),
                });
            }
        }
        Ok(mismatches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            sha256_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_verify_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        fs::write(dir.path().join("b.txt"), "beta").unwrap();

        let checksums = Checksums::compute(dir.path(), ["a.txt", "b.txt"]).unwrap();
        checksums.save(dir.path()).unwrap();
        let loaded = Checksums::load(dir.path()).unwrap();
        assert_eq!(loaded, checksums);
        assert!(loaded.verify(dir.path()).unwrap().is_empty());

        fs::write(dir.path().join("a.txt"), "tampered").unwrap();
        fs::remove_file(dir.path().join("b.txt")).unwrap();
        let mismatches = loaded.verify(dir.path()).unwrap();
        assert_eq!(mismatches.len(), 2);
        assert_eq!(mismatches[0].file, "a.txt");
        assert!(mismatches[0].actual.is_some());
        assert_eq!(mismatches[1].actual, None);
    }
}
