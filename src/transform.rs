use std::{
    fmt::Debug,
    io::{self, Write},
    mem,
    str::FromStr,
    sync::Arc,
};

use zstd::stream::write::Encoder;

use crate::error::{Error, Result};

pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Byte transform applied to everything written into a container.
pub trait Transform: Debug + Send + Sync {
    /// Suffix appended to the names of transformed objects, including the dot.
    fn extension(&self) -> &'static str;

    fn wrap(&self) -> Result<Box<dyn WrappedWriter>>;
}

pub type BoxedTransform = Arc<dyn Transform>;

/// A writer whose transformed output is pulled out in pieces.
pub trait WrappedWriter: Write + Send {
    fn drain(&mut self) -> Vec<u8>;

    /// Flushes any internal state and returns the remaining output.
    fn finish(self: Box<Self>) -> io::Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransformKind {
    Identity,
    Zstd { level: i32 },
}

impl TransformKind {
    pub fn build(self) -> BoxedTransform {
        match self {
            TransformKind::Identity => Arc::new(Identity),
            TransformKind::Zstd { level } => Arc::new(Zstd { level }),
        }
    }
}

impl FromStr for TransformKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(TransformKind::Identity),
            "zstd" => Ok(TransformKind::Zstd {
                level: DEFAULT_COMPRESSION_LEVEL,
            }),
            _ => Err(anyhow::anyhow!("unknown compression method `{s}`").into()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Identity;

impl Transform for Identity {
    fn extension(&self) -> &'static str {
        ""
    }

    fn wrap(&self) -> Result<Box<dyn WrappedWriter>> {
        Ok(Box::new(IdentityWriter { buffer: vec![] }))
    }
}

struct IdentityWriter {
    buffer: Vec<u8>,
}

impl Write for IdentityWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl WrappedWriter for IdentityWriter {
    fn drain(&mut self) -> Vec<u8> {
        mem::take(&mut self.buffer)
    }

    fn finish(self: Box<Self>) -> io::Result<Vec<u8>> {
        Ok(self.buffer)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Zstd {
    pub level: i32,
}

impl Transform for Zstd {
    fn extension(&self) -> &'static str {
        ".zst"
    }

    fn wrap(&self) -> Result<Box<dyn WrappedWriter>> {
        let encoder = Encoder::new(vec![], self.level)?;
        Ok(Box::new(ZstdWriter { encoder }))
    }
}

struct ZstdWriter {
    encoder: Encoder<'static, Vec<u8>>,
}

impl Write for ZstdWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}

impl WrappedWriter for ZstdWriter {
    fn drain(&mut self) -> Vec<u8> {
        mem::take(self.encoder.get_mut())
    }

    fn finish(self: Box<Self>) -> io::Result<Vec<u8>> {
        self.encoder.finish()
    }
}

#[cfg(test)]
mod tests;
