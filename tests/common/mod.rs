//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use parcel::core::retry::Sleeper;
use parcel::transport::{
    Connector, LocalSession, RemoteSession, TransportError, TransportResult,
};
use tempfile::TempDir;

/// Failure injected into a connect or put
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Refused,
    NoResponse,
    PermissionDenied,
    Authentication,
}

impl Fault {
    fn into_error(self, what: &str) -> TransportError {
        match self {
            Fault::Refused => TransportError::ConnectionFailed {
                endpoint: "scripted".to_string(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
            },
            Fault::NoResponse => TransportError::NoResponse(format!("{}: no response", what)),
            Fault::PermissionDenied => TransportError::PermissionDenied {
                path: what.to_string(),
                message: "Permission denied".to_string(),
            },
            Fault::Authentication => TransportError::Authentication {
                user: "erik".to_string(),
                host: "scripted".to_string(),
                message: "no identities accepted".to_string(),
            },
        }
    }
}

/// What the scripted connector has been asked to do
#[derive(Debug, Default)]
pub struct Script {
    pub connect_faults: VecDeque<Fault>,
    pub put_faults: VecDeque<Fault>,
    pub connect_attempts: u32,
    pub put_attempts: u32,
    pub mkdirs: Vec<String>,
}

/// Local-filesystem connector that fails on cue
///
/// Clones share the script, so a test can keep one handle and inspect the
/// counters after handing the other to a dispatcher.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    script: Rc<RefCell<Script>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_connect(self, faults: &[Fault]) -> Self {
        self.script.borrow_mut().connect_faults.extend(faults);
        self
    }

    pub fn fail_put(self, faults: &[Fault]) -> Self {
        self.script.borrow_mut().put_faults.extend(faults);
        self
    }

    pub fn connect_attempts(&self) -> u32 {
        self.script.borrow().connect_attempts
    }

    pub fn put_attempts(&self) -> u32 {
        self.script.borrow().put_attempts
    }

    pub fn mkdirs(&self) -> Vec<String> {
        self.script.borrow().mkdirs.clone()
    }
}

impl Connector for ScriptedConnector {
    type Session = ScriptedSession;

    fn connect(&mut self) -> TransportResult<ScriptedSession> {
        let mut script = self.script.borrow_mut();
        script.connect_attempts += 1;
        if let Some(fault) = script.connect_faults.pop_front() {
            return Err(fault.into_error("connect"));
        }
        Ok(ScriptedSession {
            inner: LocalSession,
            script: self.script.clone(),
        })
    }

    fn endpoint(&self) -> String {
        "scripted".to_string()
    }
}

pub struct ScriptedSession {
    inner: LocalSession,
    script: Rc<RefCell<Script>>,
}

impl RemoteSession for ScriptedSession {
    fn home_dir(&mut self) -> TransportResult<String> {
        self.inner.home_dir()
    }

    fn is_dir(&mut self, path: &str) -> TransportResult<bool> {
        self.inner.is_dir(path)
    }

    fn mkdir(&mut self, path: &str) -> TransportResult<()> {
        self.script.borrow_mut().mkdirs.push(path.to_string());
        self.inner.mkdir(path)
    }

    fn put(&mut self, local: &Path, remote: &str) -> TransportResult<u64> {
        let fault = {
            let mut script = self.script.borrow_mut();
            script.put_attempts += 1;
            script.put_faults.pop_front()
        };
        match fault {
            Some(fault) => Err(fault.into_error(remote)),
            None => self.inner.put(local, remote),
        }
    }
}

/// Sleeper that only records the requested delays
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    slept: Rc<RefCell<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, delay: Duration) {
        self.slept.borrow_mut().push(delay);
    }
}

/// Temporary inbox, destination and archive folders
pub struct Workspace {
    _temp: TempDir,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub archive: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("inbox");
        let destination = temp.path().join("viral_load");
        let archive = temp.path().join("archive");
        for dir in [&source, &destination, &archive] {
            fs::create_dir_all(dir).unwrap();
        }
        Self {
            _temp: temp,
            source,
            destination,
            archive,
        }
    }

    pub fn destination_str(&self) -> &str {
        self.destination.to_str().unwrap()
    }

    /// Create a remote sub-folder under the destination
    pub fn remote_folder(&self, name: &str) -> PathBuf {
        let dir = self.destination.join(name);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    pub fn drop_pdf(&self, name: &str) -> PathBuf {
        let path = self.source.join(name);
        fs::write(&path, pdf_bytes(name)).unwrap();
        path
    }

    pub fn drop_bytes(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.source.join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    pub fn drop_text(&self, name: &str, text: &str) -> PathBuf {
        let path = self.source.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    pub fn archived(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.archive)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

/// Bytes that sniff as `application/pdf`
pub fn pdf_bytes(label: &str) -> Vec<u8> {
    format!(
        "%PDF-1.4\n% {}\n1 0 obj << /Type /Catalog >> endobj\ntrailer << /Root 1 0 R >>\n%%EOF\n",
        label
    )
    .into_bytes()
}

/// A one-page PDF whose text layer reads `text`
///
/// `text` must not contain parentheses or backslashes.
pub fn text_pdf(text: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 72 720 Td ({}) Tj ET", text);
    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
         /Resources << /Font << /F1 5 0 R >> >> /Contents 4 0 R >>"
            .to_string(),
        format!(
            "<< /Length {} >>\nstream\n{}\nendstream",
            content.len(),
            content
        ),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
            .to_string(),
    ];

    let mut pdf = String::from("%PDF-1.4\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.push_str(&format!("{} 0 obj\n{}\nendobj\n", i + 1, body));
    }

    let xref = pdf.len();
    pdf.push_str(&format!("xref\n0 {}\n", objects.len() + 1));
    pdf.push_str("0000000000 65535 f \n");
    for offset in offsets {
        pdf.push_str(&format!("{:010} 00000 n \n", offset));
    }
    pdf.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref
    ));
    pdf.into_bytes()
}
