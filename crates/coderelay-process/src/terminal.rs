//! Pseudo-terminal plumbing for child output.
//!
//! Many programs switch to block buffering when stdout is a pipe, so a
//! script that prints and then sleeps would show nothing until it exits.
//! Attaching each output stream to its own pseudo-terminal keeps the child
//! line-buffered while stdout and stderr stay separate streams.

use std::{
    fmt,
    fs::File,
    io::{self, Read},
    os::fd::{AsRawFd, OwnedFd},
    pin::Pin,
    process::Stdio,
    str::FromStr,
    task::{Context, Poll, ready},
};

use nix::{
    errno::Errno,
    fcntl::{FcntlArg, FdFlag, OFlag, fcntl},
    pty::{Winsize, openpty},
    sys::termios::{self, OutputFlags, SetArg, Termios},
};
use tokio::io::{AsyncRead, ReadBuf, unix::AsyncFd};

const COLS: u16 = 80;
const ROWS: u16 = 24;

/// How child output streams are attached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OutputMode {
    /// One pseudo-terminal per stream.
    #[default]
    Terminal,
    /// Plain pipes.
    Pipe,
}

impl OutputMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Terminal => "terminal",
            Self::Pipe => "pipe",
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "terminal" | "pty" => Ok(Self::Terminal),
            "pipe" => Ok(Self::Pipe),
            other => Err(format!("unknown output mode: {other}")),
        }
    }
}

/// A pseudo-terminal whose slave end becomes one child output stream.
pub(crate) struct Terminal {
    master: OwnedFd,
    slave: OwnedFd,
}

impl Terminal {
    /// Allocate a terminal with output post-processing disabled, so `\n`
    /// reaches the client as written rather than as `\r\n`.
    pub(crate) fn open() -> nix::Result<Self> {
        let size = Winsize {
            ws_row: ROWS,
            ws_col: COLS,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let pty = openpty(&size, None::<&Termios>)?;

        let mut attrs = termios::tcgetattr(&pty.slave)?;
        attrs.output_flags.remove(OutputFlags::ONLCR);
        termios::tcsetattr(&pty.slave, SetArg::TCSANOW, &attrs)?;

        // The master stays with us: never inherited, never blocking.
        let master = pty.master.as_raw_fd();
        fcntl(master, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
        let flags = OFlag::from_bits_truncate(fcntl(master, FcntlArg::F_GETFL)?);
        fcntl(master, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;

        Ok(Self {
            master: pty.master,
            slave: pty.slave,
        })
    }

    /// Hand the slave to the child and keep the master for reading.
    ///
    /// Must be called within a Tokio runtime.
    pub(crate) fn split(self) -> io::Result<(Stdio, TerminalReader)> {
        let reader = TerminalReader::new(self.master)?;
        Ok((Stdio::from(self.slave), reader))
    }
}

/// Open a terminal and split it into the child's end and our reader.
pub(crate) fn attach() -> io::Result<(Stdio, TerminalReader)> {
    Terminal::open().map_err(io::Error::from)?.split()
}

/// Non-blocking reader over a terminal master, driven by the reactor.
///
/// Once every slave descriptor is closed Linux reports `EIO` instead of
/// end-of-file; that is mapped to a clean EOF.
pub struct TerminalReader {
    inner: AsyncFd<File>,
}

impl TerminalReader {
    fn new(master: OwnedFd) -> io::Result<Self> {
        Ok(Self {
            inner: AsyncFd::new(File::from(master))?,
        })
    }
}

impl AsyncRead for TerminalReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.inner.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| {
                let mut file = inner.get_ref();
                file.read(unfilled)
            }) {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) if e.raw_os_error() == Some(Errno::EIO as i32) => {
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => {}
            }
        }
    }
}
