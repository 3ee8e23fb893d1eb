use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::SandbarError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl TryFrom<&PathBuf> for Credential {
    type Error = SandbarError;

    fn try_from(path: &PathBuf) -> Result<Self, Self::Error> {
        let contents = fs::read_to_string(path)?;
        let credential: Credential = serde_json::from_str(&contents)?;
        Ok(credential)
    }
}

/// Access-key to secret-key map, read once at startup and immutable after.
pub struct CredentialStore {
    credentials: HashMap<String, String>,
}

impl CredentialStore {
    /// Load credentials from a directory of JSON files.
    pub fn new(credentials_dir: PathBuf) -> Result<Self, SandbarError> {
        let mut credentials = HashMap::new();

        info!(credentials_dir = ?credentials_dir, "Loading credentials");

        if !credentials_dir.exists() {
            warn!(credentials_dir = ?credentials_dir, "Credentials directory does not exist, starting with no credentials");
            return Ok(Self { credentials });
        }

        if !credentials_dir.is_dir() {
            error!(credentials_dir = ?credentials_dir, "Credentials path is not a directory");
            return Err(SandbarError::Configuration(
                "Credentials path is not a directory".to_string(),
            ));
        }

        for entry in fs::read_dir(&credentials_dir)? {
            let entry = entry.inspect_err(|err| debug!("Failed to read {:?}", err))?;
            let path = entry.path();

            if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("json") {
                let credential = Credential::try_from(&path).inspect_err(
                    |e| error!(path = ?path, error = %e, "Failed to load credential"),
                )?;

                debug!(access_key = %credential.access_key_id, path = ?path, "Loaded credential");
                credentials.insert(credential.access_key_id, credential.secret_access_key);
            }
        }

        info!(loaded_credentials_count = credentials.len());
        if credentials.is_empty() {
            error!("No credentials loaded, server will reject every request");
        }
        Ok(Self { credentials })
    }

    /// Build a store directly from a map, for tests and embedding.
    pub fn from_map(credentials: HashMap<String, String>) -> Self {
        Self { credentials }
    }

    /// Get the secret access key for a given access key ID.
    pub fn get_secret_key(&self, access_key_id: &str) -> Option<&str> {
        self.credentials.get(access_key_id).map(|c| c.as_str())
    }

    /// Get the number of loaded credentials.
    pub fn credential_count(&self) -> usize {
        self.credentials.len()
    }
}
