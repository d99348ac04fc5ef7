//! Credential file and in-memory vault.
//!
//! Credentials live in a keyed text file in the user's home directory
//! (default `panzer.tmp`): one `NAME = "VALUE"` line per record, `#`
//! comments and unrecognized lines passed through verbatim on rewrite.
//! Sensitive values are stored as base64 AES ciphertext bound to this host
//! (see [`crate::cipher`]); public values are stored plaintext.
//!
//! The vault mirrors stored representations in memory, so sensitive values
//! are never held decrypted — decryption happens on each access. Missing
//! values are prompted for interactively when prompting is enabled, with
//! echo suppression for sensitive names.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{debug, warn};

use crate::cipher::AesCipher;
use crate::error::GatewayError;
use crate::metrics;
use crate::redact::Secret;

const FILE_BANNER: &str = "# mbx-gateway credentials. Sensitive values are encrypted for this host.\n";

/// Sensitivity heuristic, part of the public contract: names containing
/// `secret`, `api_key`, or `password`, or ending in `_id`, are stored
/// encrypted and prompted without echo.
pub fn is_sensitive_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.contains("secret")
        || lower.contains("api_key")
        || lower.contains("password")
        || lower.ends_with("_id")
}

/// Parse one credential line. `Ok(None)` for comments, blanks, and lines
/// that are not data lines; `Err` for a line that looks like a record but
/// is not well-formed.
fn parse_line(line: &str) -> Result<Option<(String, String)>, GatewayError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let Some((name, value)) = trimmed.split_once('=') else {
        return Ok(None);
    };
    let name = name.trim();
    let value = value.trim();
    if name.is_empty()
        || name.contains(char::is_whitespace)
        || value.len() < 2
        || !value.starts_with('"')
        || !value.ends_with('"')
    {
        return Err(GatewayError::CredentialParse {
            line: trimmed.to_string(),
        });
    }
    Ok(Some((
        name.to_string(),
        value[1..value.len() - 1].to_string(),
    )))
}

/// The on-disk credential file. Opened, fully read, and closed within each
/// operation — no long-lived handles.
pub struct CredentialFile {
    path: PathBuf,
}

impl CredentialFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$HOME/<file_name>`, the conventional location.
    pub fn in_home_dir(file_name: &str) -> Result<Self, GatewayError> {
        let home = dirs::home_dir().ok_or_else(|| {
            GatewayError::CredentialIo(io::Error::new(
                io::ErrorKind::NotFound,
                "home directory not resolvable",
            ))
        })?;
        Ok(Self::new(home.join(file_name)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_lines(&self) -> Result<Vec<String>, GatewayError> {
        if !self.path.exists() {
            fs::write(&self.path, FILE_BANNER)?;
            debug!(path = %self.path.display(), "created credential file");
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(content.lines().map(str::to_string).collect())
    }

    /// First well-formed record named `name`, or `None`. Malformed data
    /// lines are logged and treated as absent.
    pub fn read_value(&self, name: &str) -> Result<Option<String>, GatewayError> {
        for line in self.read_lines()? {
            match parse_line(&line) {
                Ok(Some((record, value))) if record == name => return Ok(Some(value)),
                Ok(_) => {}
                Err(err) => warn!(%err, "skipping malformed credential line"),
            }
        }
        Ok(None)
    }

    /// Whole-file rewrite: replace the record's line in place, or append a
    /// new one. Every other line is written back byte-for-byte.
    pub fn write_value(&self, name: &str, value: &str) -> Result<(), GatewayError> {
        let mut lines = self.read_lines()?;
        let record = format!("{} = \"{}\"", name, value);
        let mut replaced = false;
        for line in lines.iter_mut() {
            match parse_line(line) {
                Ok(Some((existing, _))) if existing == name => {
                    if *line == record {
                        // Identical record; leave the file untouched.
                        return Ok(());
                    }
                    *line = record.clone();
                    replaced = true;
                    break;
                }
                Ok(_) => {}
                Err(err) => warn!(%err, "passing malformed credential line through"),
            }
        }
        if !replaced {
            lines.push(record);
        }
        let mut content = lines.join("\n");
        content.push('\n');
        fs::write(&self.path, content)?;
        Ok(())
    }
}

/// In-memory mirror of the credential file, lazily loaded. Sensitive
/// entries stay ciphertext in memory.
pub struct CredentialVault {
    file: CredentialFile,
    cipher: AesCipher,
    cache: RwLock<HashMap<String, String>>,
    prompt_missing: bool,
}

impl CredentialVault {
    pub fn new(file: CredentialFile, cipher: AesCipher, prompt_missing: bool) -> Self {
        Self {
            file,
            cipher,
            cache: RwLock::new(HashMap::new()),
            prompt_missing,
        }
    }

    /// Fetch a credential: memory, then disk, then interactive prompt.
    /// With `decrypt`, the stored representation is run through the cipher.
    pub fn get(&self, name: &str, decrypt: bool) -> Result<Secret, GatewayError> {
        if let Some(stored) = self.cache.read().expect("vault lock poisoned").get(name) {
            return self.materialize(stored, decrypt);
        }

        if let Some(stored) = self.file.read_value(name)? {
            self.cache
                .write()
                .expect("vault lock poisoned")
                .insert(name.to_string(), stored.clone());
            return self.materialize(&stored, decrypt);
        }

        if !self.prompt_missing {
            return Err(GatewayError::CredentialMissing {
                name: name.to_string(),
            });
        }

        let sensitive = is_sensitive_name(name);
        let value = prompt_for(name, sensitive)?;
        metrics::record_credential_prompt(sensitive);
        let stored = self.add(name, value.expose(), sensitive)?;
        self.materialize(&stored, decrypt)
    }

    /// Store a credential in memory and on disk, encrypting iff
    /// `sensitive`. Returns the stored representation.
    pub fn add(&self, name: &str, value: &str, sensitive: bool) -> Result<String, GatewayError> {
        let stored = if sensitive {
            self.cipher.encrypt(value)
        } else {
            value.to_string()
        };
        self.file.write_value(name, &stored)?;
        self.cache
            .write()
            .expect("vault lock poisoned")
            .insert(name.to_string(), stored.clone());
        Ok(stored)
    }

    fn materialize(&self, stored: &str, decrypt: bool) -> Result<Secret, GatewayError> {
        if decrypt {
            Ok(Secret::new(self.cipher.decrypt(stored)?))
        } else {
            Ok(Secret::new(stored))
        }
    }
}

/// Interactive prompt. Sensitive names suppress echo. An abandoned prompt
/// (EOF, interrupt) surfaces as an I/O error before anything is written, so
/// the credential file stays untouched.
fn prompt_for(name: &str, sensitive: bool) -> Result<Secret, GatewayError> {
    if sensitive {
        let value = rpassword::prompt_password(format!("{}: ", name))?;
        Ok(Secret::new(value.trim().to_string()))
    } else {
        print!("{}: ", name);
        io::stdout().flush()?;
        let mut value = String::new();
        io::stdin().read_line(&mut value)?;
        Ok(Secret::new(value.trim().to_string()))
    }
}
