use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use tracing::debug;

use super::{ReadStatus, Sink, Source, WriteStatus};

pub struct FileSource {
    file: Option<File>,
    read_size: usize,
}

impl FileSource {
    /// # Errors
    /// If the file cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, read_size: usize) -> io::Result<Self> {
        let file = File::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "opened source file");
        Ok(FileSource {
            file: Some(file),
            read_size,
        })
    }
}

impl Source for FileSource {
    fn read(&mut self, buf: &mut Vec<u8>) -> io::Result<ReadStatus> {
        let Some(file) = self.file.as_mut() else {
            return Ok(ReadStatus::EndOfStream);
        };
        buf.resize(self.read_size, 0);
        loop {
            match file.read(buf) {
                Ok(0) => return Ok(ReadStatus::EndOfStream),
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(ReadStatus::Data);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    fn close(&mut self) {
        self.file.take();
    }
}

/// Writes each frame straight to the file, so a write that returns `Ok` has been handed
/// to the operating system in full.
pub struct FileSink {
    file: Option<File>,
}

impl FileSink {
    /// Create, or truncate, the file at `path`.
    ///
    /// # Errors
    /// If the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::create(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "created sink file");
        Ok(FileSink {
            file: Some(file),
        })
    }
}

impl Sink for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<WriteStatus> {
        match self.file.as_mut() {
            Some(file) => file.write_all(buf).map(|()| WriteStatus::Written),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "file sink closed")),
        }
    }

    fn close(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(err) = file.sync_all() {
                debug!("failed to sync sink file: {err}");
            }
        }
    }
}
