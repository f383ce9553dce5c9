//! Local filesystem destination
//!
//! Stands in for the remote host when the destination folder is mounted or
//! lives on the same machine. Remote paths are used as local paths as-is.

use std::fs;
use std::io;
use std::path::Path;

use filetime::FileTime;

use super::{Connector, RemoteSession, TransportError, TransportResult};

/// Connector whose sessions copy into local folders
#[derive(Debug, Clone, Default)]
pub struct LocalConnector;

impl LocalConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for LocalConnector {
    type Session = LocalSession;

    fn connect(&mut self) -> TransportResult<LocalSession> {
        Ok(LocalSession)
    }

    fn endpoint(&self) -> String {
        "localhost (local filesystem)".to_string()
    }
}

/// Session over the local filesystem
#[derive(Debug)]
pub struct LocalSession;

fn map_io(path: &str, err: io::Error) -> TransportError {
    if err.kind() == io::ErrorKind::PermissionDenied {
        TransportError::PermissionDenied {
            path: path.to_string(),
            message: err.to_string(),
        }
    } else {
        TransportError::Io(err)
    }
}

impl RemoteSession for LocalSession {
    fn home_dir(&mut self) -> TransportResult<String> {
        dirs::home_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .ok_or_else(|| TransportError::Session("no home directory".to_string()))
    }

    fn is_dir(&mut self, path: &str) -> TransportResult<bool> {
        match fs::metadata(path) {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(map_io(path, e)),
        }
    }

    fn mkdir(&mut self, path: &str) -> TransportResult<()> {
        match fs::create_dir(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(map_io(path, e)),
        }
    }

    fn put(&mut self, local: &Path, remote: &str) -> TransportResult<u64> {
        let bytes = fs::copy(local, remote).map_err(|e| map_io(remote, e))?;

        // keep the source mtime on the copy
        if let Ok(meta) = fs::metadata(local) {
            let mtime = FileTime::from_last_modification_time(&meta);
            filetime::set_file_mtime(remote, mtime).ok();
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_mkdir_existing_is_ok() {
        let temp = tempdir().unwrap();
        let mut session = LocalConnector::new().connect().unwrap();
        let path = temp.path().to_str().unwrap();
        assert!(session.is_dir(path).unwrap());
        session.mkdir(path).unwrap();
    }

    #[test]
    fn test_is_dir_missing() {
        let temp = tempdir().unwrap();
        let mut session = LocalSession;
        let missing = temp.path().join("nope");
        assert!(!session.is_dir(missing.to_str().unwrap()).unwrap());
    }

    #[test]
    fn test_put_preserves_mtime() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("a.txt");
        fs::write(&source, b"abc").unwrap();
        let old = FileTime::from_unix_time(1_500_000_000, 0);
        filetime::set_file_mtime(&source, old).unwrap();

        let dest = temp.path().join("b.txt");
        let mut session = LocalSession;
        let bytes = session.put(&source, dest.to_str().unwrap()).unwrap();
        assert_eq!(bytes, 3);

        let meta = fs::metadata(&dest).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta), old);
    }
}
