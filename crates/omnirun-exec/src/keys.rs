//! SSH credential resolution
//!
//! Turns an inventory entry's [`SshAuth`] into something russh can use:
//! a password, a private-key file on disk, or the agent. Keys delivered
//! through the environment (base64) are written to a 600-mode temp file
//! that disappears with the credential.

use std::io::Write;
use std::path::Path;

use omnirun_inventory::SshAuth;
use tracing::debug;

use crate::error::ExecError;

/// Resolved authentication material for one SSH target
#[derive(Debug)]
pub(crate) enum Credentials {
    /// Plain password
    Password(String),
    /// Private key file
    Key(KeyMaterial),
    /// SSH agent
    Agent,
}

/// A private key on disk, possibly temporary
#[derive(Debug)]
pub(crate) enum KeyMaterial {
    File(std::path::PathBuf),
    /// Decoded from the environment; the file is removed on drop
    Temp(tempfile::NamedTempFile),
}

impl KeyMaterial {
    pub(crate) fn path(&self) -> &Path {
        match self {
            KeyMaterial::File(p) => p,
            KeyMaterial::Temp(f) => f.path(),
        }
    }
}

/// Resolve inventory auth into usable credentials
///
/// # Errors
/// Returns [`ExecError::Key`] for unreadable or world-readable key files,
/// unset environment variables and undecodable key data.
pub(crate) fn resolve(auth: &SshAuth) -> Result<Credentials, ExecError> {
    match auth {
        SshAuth::Password(password) => Ok(Credentials::Password(password.clone())),
        SshAuth::Agent => Ok(Credentials::Agent),
        SshAuth::KeyPath(path) => {
            check_permissions(path)?;
            Ok(Credentials::Key(KeyMaterial::File(path.clone())))
        }
        SshAuth::KeyEnv(var) => {
            let encoded = std::env::var(var)
                .map_err(|_| ExecError::Key(format!("environment variable {var} not set")))?;
            let data = decode_base64(&encoded)
                .map_err(|_| ExecError::Key(format!("{var} is not valid base64")))?;
            Ok(Credentials::Key(KeyMaterial::Temp(write_temp_key(&data)?)))
        }
    }
}

fn decode_base64(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(input.trim())
}

/// Reject keys readable by group or other, like OpenSSH does
fn check_permissions(path: &Path) -> Result<(), ExecError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let metadata = std::fs::metadata(path)
            .map_err(|e| ExecError::Key(format!("{}: {e}", path.display())))?;
        if metadata.permissions().mode() & 0o77 != 0 {
            return Err(ExecError::Key(format!(
                "key file permissions too open: {} (should be 600)",
                path.display()
            )));
        }
    }
    Ok(())
}

fn write_temp_key(data: &[u8]) -> Result<tempfile::NamedTempFile, ExecError> {
    let mut file = tempfile::Builder::new()
        .prefix("omnirun_key_")
        .tempfile()
        .map_err(|e| ExecError::Key(e.to_string()))?;
    file.write_all(data)
        .map_err(|e| ExecError::Key(e.to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600))
            .map_err(|e| ExecError::Key(e.to_string()))?;
    }

    debug!(path = %file.path().display(), "wrote temporary SSH key");
    Ok(file)
}
