//! TLS termination
//!
//! Builds the acceptor used to wrap accepted TCP streams when the server
//! serves `wss://` itself.

use std::path::{Path, PathBuf};

use native_tls::Identity;
use thiserror::Error;
use tokio_native_tls::TlsAcceptor;

use crate::config::TlsPaths;

/// Errors that can occur while preparing TLS
#[derive(Error, Debug)]
pub enum TlsError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid certificate or private key: {0}")]
    Identity(#[source] native_tls::Error),

    #[error("Failed to build TLS acceptor: {0}")]
    Acceptor(#[source] native_tls::Error),
}

fn read_pem(path: &Path) -> Result<Vec<u8>, TlsError> {
    std::fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a PEM certificate chain and PKCS#8 key into a TLS acceptor
pub fn load_acceptor(paths: &TlsPaths) -> Result<TlsAcceptor, TlsError> {
    let cert = read_pem(&paths.cert)?;
    let key = read_pem(&paths.key)?;

    let identity = Identity::from_pkcs8(&cert, &key).map_err(TlsError::Identity)?;
    let acceptor = native_tls::TlsAcceptor::new(identity).map_err(TlsError::Acceptor)?;

    Ok(TlsAcceptor::from(acceptor))
}

/// Self-signed `localhost` certificate and key checked in under `testdata/`
#[cfg(test)]
pub(crate) fn fixture_paths() -> TlsPaths {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata");
    TlsPaths {
        key: dir.join("key.pem"),
        cert: dir.join("cert.pem"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_valid_identity() {
        assert!(load_acceptor(&fixture_paths()).is_ok());
    }

    #[test]
    fn test_key_and_cert_swapped() {
        let fixture = fixture_paths();
        let swapped = TlsPaths {
            key: fixture.cert,
            cert: fixture.key,
        };
        assert!(load_acceptor(&swapped).is_err());
    }

    #[test]
    fn test_missing_certificate() {
        let dir = tempdir().unwrap();
        let paths = TlsPaths {
            key: dir.path().join("key.pem"),
            cert: dir.path().join("cert.pem"),
        };

        match load_acceptor(&paths) {
            Err(TlsError::Read { path, .. }) => assert_eq!(path, paths.cert),
            other => panic!("Expected read error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_garbage_pem_is_rejected() {
        let dir = tempdir().unwrap();
        let paths = TlsPaths {
            key: dir.path().join("key.pem"),
            cert: dir.path().join("cert.pem"),
        };
        fs::write(&paths.key, "not a key").unwrap();
        fs::write(&paths.cert, "not a certificate").unwrap();

        assert!(matches!(
            load_acceptor(&paths),
            Err(TlsError::Identity(_))
        ));
    }
}
