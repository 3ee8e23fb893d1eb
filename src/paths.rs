//! Maps bucket/key pairs onto filesystem paths confined to the storage root.
//!
//! Every read, write, or delete in the emulator resolves its target through
//! this module, so the traversal check cannot be skipped by any caller.

use std::path::{Component, Path, PathBuf};

use tracing::warn;

use crate::error::SandbarError;

pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// Create a resolver rooted at `root`, creating and canonicalizing it.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SandbarError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `root/bucket/key`, rejecting anything that would escape the
    /// root. The check is purely lexical and runs before any filesystem
    /// access is attempted.
    pub fn resolve(&self, bucket: &str, key: &str) -> Result<PathBuf, SandbarError> {
        validate_bucket(bucket)?;
        validate_key(key)?;

        let path = self.root.join(bucket).join(key);
        if !path.starts_with(&self.root) {
            warn!(bucket = %bucket, key = %key, "Resolved path escapes storage root");
            return Err(SandbarError::InvalidPath(format!("{}/{}", bucket, key)));
        }
        Ok(path)
    }
}

fn validate_bucket(bucket: &str) -> Result<(), SandbarError> {
    if bucket.is_empty() || bucket == "." || bucket == ".." {
        return Err(SandbarError::InvalidPath(bucket.to_string()));
    }
    if bucket.contains('/') || bucket.contains('\\') || bucket.contains('\0') {
        return Err(SandbarError::InvalidPath(bucket.to_string()));
    }
    Ok(())
}

fn validate_key(key: &str) -> Result<(), SandbarError> {
    if key.is_empty() || key.contains('\0') {
        return Err(SandbarError::InvalidPath(key.to_string()));
    }
    for component in Path::new(key).components() {
        match component {
            Component::Normal(_) => {}
            // `..`, absolute keys, and drive prefixes all point outside the root
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(SandbarError::InvalidPath(key.to_string()));
            }
            Component::CurDir => {}
        }
    }
    Ok(())
}
