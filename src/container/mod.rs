//! Streaming tar containers and the bounded pool that hands them out.

mod queue;

use std::{
    fmt,
    io::{self, Write},
};

use clap::builder::styling::AnsiColor;
use log::debug;

use crate::{
    error::{Error, Result},
    file::{append_header, padding_len, FileHeader},
    format::{format_key, format_size},
    transform::WrappedWriter,
    upload::{UploadStream, Uploader},
};

pub use self::queue::ContainerQueue;

pub const TAR_PARTITIONS_DIR: &str = "tar_partitions";

/// Lifecycle of a [`Container`].
///
/// `Open` has no upload yet. The first write moves it to `Writable`, which
/// starts the upload. Retiring writes the tar trailer and waits for the
/// upload; `Closed` containers accept nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Open,
    Writable,
    Retiring,
    Closed,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ContainerState {
    fn as_str(self) -> &'static str {
        match self {
            ContainerState::Open => "open",
            ContainerState::Writable => "writable",
            ContainerState::Retiring => "retiring",
            ContainerState::Closed => "closed",
        }
    }
}

/// Counts the tar bytes going into the transform.
struct Counted {
    inner: Box<dyn WrappedWriter>,
    written: u64,
}

impl Write for Counted {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct Sink {
    builder: tar::Builder<Counted>,
    stream: UploadStream,
}

#[derive(Debug)]
struct OpenEntry {
    name: String,
    declared: u64,
    written: u64,
}

pub struct Container {
    name: String,
    key: String,
    size: u64,
    state: ContainerState,
    uploader: Uploader,
    sink: Option<Sink>,
    entry: Option<OpenEntry>,
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Container {
    pub fn new(number: u32, backup_name: &str, uploader: Uploader) -> Self {
        Container::named(&format!("part_{number:03}"), backup_name, uploader)
    }

    pub fn named(stem: &str, backup_name: &str, uploader: Uploader) -> Self {
        let extension = uploader.transform().extension();
        let name = format!("{stem}.tar{extension}");
        let key = format!("{backup_name}/{TAR_PARTITIONS_DIR}/{name}");

        Container {
            name,
            key,
            size: 0,
            state: ContainerState::Open,
            uploader,
            sink: None,
            entry: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    pub fn is_written(&self) -> bool {
        self.state != ContainerState::Open
    }

    fn invalid_state(&self, action: &'static str) -> Error {
        Error::InvalidContainerState {
            name: self.name.clone(),
            action,
            state: self.state.as_str(),
        }
    }

    pub fn set_up(&mut self) -> Result<()> {
        match self.state {
            ContainerState::Writable => Ok(()),
            ContainerState::Open => {
                let inner = self.uploader.transform().wrap()?;
                let builder = tar::Builder::new(Counted { inner, written: 0 });
                let stream = self.uploader.start_stream(self.key.clone());
                self.sink = Some(Sink { builder, stream });
                self.state = ContainerState::Writable;
                Ok(())
            }
            ContainerState::Retiring | ContainerState::Closed => Err(self.invalid_state("set up")),
        }
    }

    fn sink(&mut self) -> Result<&mut Sink> {
        self.set_up()?;
        self.sink.as_mut().ok_or(Error::InvalidContainerState {
            name: self.name.clone(),
            action: "write",
            state: "without a sink",
        })
    }

    async fn send_output(&mut self) -> Result<()> {
        let Some(sink) = self.sink.as_mut() else {
            return Err(self.invalid_state("flush"));
        };

        let writer = sink.builder.get_mut();
        self.size = writer.written;
        let output = writer.inner.drain();
        sink.stream.send(output).await
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.sink()?.builder.get_mut().write_all(bytes)?;
        self.send_output().await
    }

    pub async fn begin_entry(&mut self, header: &FileHeader, size: u64) -> Result<()> {
        if self.entry.is_some() {
            return Err(self.invalid_state("begin an entry"));
        }

        append_header(&mut self.sink()?.builder, header, size)?;
        self.send_output().await?;

        let declared = if header.is_file() { size } else { 0 };
        self.entry = Some(OpenEntry {
            name: header.name.clone(),
            declared,
            written: 0,
        });
        Ok(())
    }

    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let Some(entry) = self.entry.as_mut() else {
            return Err(self.invalid_state("write outside an entry"));
        };

        let written = entry.written + bytes.len() as u64;
        if written > entry.declared {
            return Err(Error::EntrySizeMismatch {
                name: entry.name.clone(),
                expected: entry.declared,
                actual: written,
            });
        }

        entry.written = written;
        self.write_raw(bytes).await
    }

    pub async fn end_entry(&mut self) -> Result<()> {
        let Some(entry) = self.entry.take() else {
            return Err(self.invalid_state("end an entry"));
        };

        if entry.written != entry.declared {
            return Err(Error::EntrySizeMismatch {
                name: entry.name,
                expected: entry.declared,
                actual: entry.written,
            });
        }

        let padding = padding_len(entry.written);
        if padding > 0 {
            self.write_raw(&vec![0; padding]).await?;
        }

        Ok(())
    }

    /// Writes an entry without a body: a directory, a symlink or an empty file.
    pub async fn append_header(&mut self, header: &FileHeader) -> Result<()> {
        self.begin_entry(header, 0).await?;
        self.end_entry().await
    }

    /// Finishes the tar stream and waits until storage holds the container.
    pub async fn retire(&mut self) -> Result<()> {
        match self.state {
            ContainerState::Open => {
                self.state = ContainerState::Closed;
                return Ok(());
            }
            ContainerState::Writable if self.entry.is_none() => {}
            _ => return Err(self.invalid_state("retire")),
        }

        self.state = ContainerState::Retiring;
        let Some(Sink { builder, mut stream }) = self.sink.take() else {
            return Err(self.invalid_state("retire"));
        };

        let Counted { mut inner, written } = builder.into_inner()?;
        self.size = written;
        let mut output = inner.drain();
        output.extend(inner.finish()?);
        stream.send(output).await?;
        stream.finish().await?;
        self.state = ContainerState::Closed;

        let style = AnsiColor::Blue.on_default();
        let size_style = AnsiColor::BrightBlack.on_default();
        debug!(
            "{style}uploaded container{style:#} {} {size_style}({}){size_style:#}",
            format_key(&self.key),
            format_size(self.size)
        );
        Ok(())
    }

    /// Drops any in-flight upload without publishing the container.
    pub fn abort(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stream.abort();
        }

        self.entry = None;
        self.state = ContainerState::Closed;
    }
}
