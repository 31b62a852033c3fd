use super::{remaining, timed_out, Comm};
use log::{debug, info};
use parking_lot::{Mutex, MutexGuard};
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

#[allow(clippy::module_name_repetitions)]
pub struct TcpComm {
    path: String,
    stream: Mutex<Option<TcpStream>>,
    timeout: Duration,
    busy: Mutex<()>,
}

impl Comm for TcpComm {
    fn lock(&self) -> MutexGuard<()> {
        self.busy.lock()
    }
    fn reconnect(&self) {
        if self.stream.lock().take().is_some() {
            debug!("{} connection dropped", self.path);
        }
    }
    fn timeout(&self) -> Duration {
        self.timeout
    }
    fn write(&self, buf: &[u8], deadline: Instant) -> Result<(), std::io::Error> {
        let mut stream = self.get_stream(deadline)?;
        let result = stream
            .as_mut()
            .map_or_else(|| Err(not_connected()), |s| write_until(s, buf, deadline));
        if result.is_err() {
            stream.take();
        }
        result
    }
    fn read_exact(&self, buf: &mut [u8], deadline: Instant) -> Result<(), std::io::Error> {
        let mut stream = self.get_stream(deadline)?;
        let result = stream
            .as_mut()
            .map_or_else(|| Err(not_connected()), |s| read_until(s, buf, deadline));
        if result.is_err() {
            stream.take();
        }
        result
    }
}

fn not_connected() -> std::io::Error {
    std::io::Error::new(ErrorKind::NotConnected, "not connected")
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

// each syscall gets only the time left, so a trickling peer can not stretch
// the exchange past the deadline
fn read_until(
    stream: &mut TcpStream,
    mut buf: &mut [u8],
    deadline: Instant,
) -> Result<(), std::io::Error> {
    while !buf.is_empty() {
        stream.set_read_timeout(Some(remaining(deadline)?))?;
        match stream.read(buf) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                ))
            }
            Ok(n) => {
                let tmp = buf;
                buf = &mut tmp[n..];
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) if is_timeout(&e) => return Err(timed_out()),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn write_until(
    stream: &mut TcpStream,
    mut buf: &[u8],
    deadline: Instant,
) -> Result<(), std::io::Error> {
    while !buf.is_empty() {
        stream.set_write_timeout(Some(remaining(deadline)?))?;
        match stream.write(buf) {
            Ok(0) => return Err(std::io::Error::from(ErrorKind::WriteZero)),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) if is_timeout(&e) => return Err(timed_out()),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

impl TcpComm {
    /// The connection is opened lazily on the first exchange
    pub fn create(path: &str, timeout: Duration) -> Self {
        Self {
            path: path.to_owned(),
            stream: <_>::default(),
            busy: <_>::default(),
            timeout,
        }
    }
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }
    pub fn is_connected(&self) -> bool {
        self.stream.lock().is_some()
    }
    fn resolve(&self) -> Result<SocketAddr, std::io::Error> {
        // literal addresses skip the resolver
        if let Ok(addr) = self.path.parse::<SocketAddr>() {
            return Ok(addr);
        }
        self.path.to_socket_addrs()?.next().ok_or_else(|| {
            std::io::Error::new(
                ErrorKind::AddrNotAvailable,
                format!("unable to resolve {}", self.path),
            )
        })
    }
    fn get_stream(
        &self,
        deadline: Instant,
    ) -> Result<MutexGuard<Option<TcpStream>>, std::io::Error> {
        let mut lock = self.stream.lock();
        if lock.is_none() {
            let addr = self.resolve()?;
            let stream = TcpStream::connect_timeout(&addr, remaining(deadline)?)
                .map_err(|e| if is_timeout(&e) { timed_out() } else { e })?;
            stream.set_nodelay(true)?;
            info!("connected to {}", self.path);
            lock.replace(stream);
        }
        Ok(lock)
    }
}
