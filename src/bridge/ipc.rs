//! Line-oriented I/O over the bridge socket.

use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::net::UnixStream;

use nix::errno::Errno;

const BUFFER_SIZE: usize = 64 * 1024;

/// A socket descriptor whose reads and writes retry on `EINTR`.
pub struct SocketFd {
    fd: OwnedFd,
}

impl From<UnixStream> for SocketFd {
    fn from(stream: UnixStream) -> Self {
        Self {
            fd: OwnedFd::from(stream),
        }
    }
}

impl AsFd for SocketFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl Read for SocketFd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::read(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from(e)),
            }
        }
    }
}

impl Write for SocketFd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::write(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from(e)),
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct LineReader {
    reader: BufReader<SocketFd>,
    line: String,
}

impl LineReader {
    pub fn new(fd: SocketFd) -> Self {
        Self {
            reader: BufReader::with_capacity(BUFFER_SIZE, fd),
            line: String::with_capacity(4096),
        }
    }

    /// Next line without its terminator, `None` once the peer hung up.
    pub fn read_line(&mut self) -> io::Result<Option<&str>> {
        self.line.clear();
        if self.reader.read_line(&mut self.line)? == 0 {
            return Ok(None);
        }
        let trimmed = self.line.trim_end_matches(['\n', '\r']).len();
        self.line.truncate(trimmed);
        Ok(Some(&self.line))
    }
}

pub struct LineWriter {
    writer: BufWriter<SocketFd>,
}

impl LineWriter {
    pub fn new(fd: SocketFd) -> Self {
        Self {
            writer: BufWriter::with_capacity(BUFFER_SIZE, fd),
        }
    }

    /// Write `line` plus a newline if it lacks one, then flush.
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        if !line.ends_with('\n') {
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()
    }
}

/// Split a connected stream into independent read and write halves.
pub fn split(stream: UnixStream) -> io::Result<(LineReader, LineWriter)> {
    let write_half = stream.try_clone()?;
    Ok((
        LineReader::new(SocketFd::from(stream)),
        LineWriter::new(SocketFd::from(write_half)),
    ))
}
