//! The downstream write target for the output thread: a file if
//! configured, stdout otherwise.

use std::fs::{File, OpenOptions};
use std::io::{self, Stdout, Write};

use crate::config::SinkConfig;

pub enum Sink {
    File(File),
    Stdout(Stdout),
}

impl Sink {
    pub fn open(config: &SinkConfig) -> anyhow::Result<Sink> {
        match &config.path {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| anyhow::anyhow!("opening sink {}: {e}", path.display()))?;
                Ok(Sink::File(file))
            }
            None => Ok(Sink::Stdout(io::stdout())),
        }
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::File(f) => f.write(buf),
            Sink::Stdout(s) => s.write(buf),
        }
    }

    fn write_vectored(&mut self, bufs: &[io::IoSlice<'_>]) -> io::Result<usize> {
        match self {
            Sink::File(f) => f.write_vectored(bufs),
            Sink::Stdout(s) => s.write_vectored(bufs),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::File(f) => f.flush(),
            Sink::Stdout(s) => s.flush(),
        }
    }
}
