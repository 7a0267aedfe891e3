use crate::{
    error::Error,
    metadata::render_metadata,
    stream::{Stream, StreamClass},
    trace::{Clock, Trace},
    types::Value,
};
use std::{
    cell::Cell,
    fs::{self, File},
    path::{Path, PathBuf},
};
use tracing::debug;

/// Top-level handle over one trace directory.
///
/// Owns the [`Trace`] and the directory layout: one `stream_<n>` file
/// per created stream plus the `metadata` document.
#[derive(Debug)]
pub struct Writer {
    trace: Trace,
    path: PathBuf,
    next_stream_file: Cell<u64>,
}

impl Writer {
    /// Create the trace directory (and parents) and a trace with a
    /// fresh v4 UUID.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_owned();
        fs::create_dir_all(&path)?;
        let trace = Trace::new()?;
        debug!(path = %path.display(), uuid = %trace.uuid(), "Created trace directory");
        Ok(Self {
            trace,
            path,
            next_stream_file: Cell::new(0),
        })
    }

    pub fn trace(&self) -> Trace {
        self.trace.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register a clock with the trace.
    pub fn add_clock(&self, clock: &Clock) -> Result<(), Error> {
        self.trace.add_clock(clock)
    }

    /// Add a string or integer entry to the trace environment.
    pub fn add_environment_field(&self, name: &str, value: impl Into<Value>) -> Result<(), Error> {
        self.trace.set_environment_field(name, value)
    }

    /// Produce a stream writing to the next `stream_<n>` file. Adds
    /// the stream class to the trace when needed and freezes both.
    pub fn create_stream(&self, stream_class: &StreamClass) -> Result<Stream, Error> {
        let n = self.next_stream_file.get();
        self.next_stream_file.set(n + 1);
        self.create_stream_with_file_name(stream_class, &format!("stream_{n}"))
    }

    /// Produce a stream writing to a caller-named file under the trace
    /// directory.
    pub fn create_stream_with_file_name(
        &self,
        stream_class: &StreamClass,
        file_name: &str,
    ) -> Result<Stream, Error> {
        let file = File::create(self.path.join(file_name))?;
        debug!(stream_class = %stream_class.name(), file_name, "Created stream");
        self.trace.create_stream(stream_class, file)
    }

    /// The trace's TSDL metadata document.
    pub fn metadata_string(&self) -> Result<String, Error> {
        render_metadata(&self.trace)
    }

    /// Render and write the `metadata` file.
    pub fn flush_metadata(&self) -> Result<(), Error> {
        let text = self.metadata_string()?;
        fs::write(self.path.join("metadata"), text.as_bytes())?;
        debug!(path = %self.path.display(), bytes = text.len(), "Flushed metadata");
        Ok(())
    }
}
