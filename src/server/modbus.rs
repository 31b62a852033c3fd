use crate::error::{EResult, Error};
use log::{debug, error, info};
use parking_lot::RwLock;
use rmodbus::{
    server::{context::ModbusContext, ModbusFrame},
    ModbusFrameBuf, ModbusProto,
};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const COILS: usize = 16;
pub const DEFAULT_MAXCONN: usize = 5;
pub const DEFAULT_STEP: Duration = Duration::from_secs(5);
/// Coils driven by the sequencer, one at a time
pub const SEQUENCE_COILS: u16 = 5;

pub type Context = ModbusContext<COILS, COILS, COILS, COILS>;

/// Shared coil table of the simulator
#[derive(Clone, Default)]
pub struct CoilBank {
    ctx: Arc<RwLock<Context>>,
}

impl CoilBank {
    pub fn set(&self, addr: u16, value: bool) -> EResult<()> {
        self.ctx.write().set_coil(addr, value)?;
        Ok(())
    }
    pub fn get(&self, addr: u16) -> EResult<bool> {
        Ok(self.ctx.read().get_coil(addr)?)
    }
    pub fn clear(&self) {
        let mut ctx = self.ctx.write();
        for addr in 0..COILS {
            #[allow(clippy::cast_possible_truncation)]
            let _ = ctx.set_coil(addr as u16, false);
        }
    }
    /// Sets `addr` and resets every other coil
    pub fn select(&self, addr: Option<u16>) -> EResult<()> {
        self.clear();
        if let Some(addr) = addr {
            self.set(addr, true)?;
        }
        Ok(())
    }
    /// Runs the demo sequence until `stop` is set: coils 0-4 go high one at a
    /// time, then all are low, one pattern per step
    pub fn run_sequence(&self, step: Duration, stop: &AtomicBool) -> EResult<()> {
        info!("coil sequence started, step {:?}", step);
        let patterns = (0..SEQUENCE_COILS).map(Some).chain([None]);
        for pattern in patterns.cycle() {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            self.select(pattern)?;
            match pattern {
                Some(addr) => info!("coil {} on", addr),
                None => info!("all coils off"),
            }
            sleep_unless(step, stop);
        }
        Ok(())
    }
}

fn sleep_unless(duration: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + duration;
    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(100)));
    }
}

/// Modbus TCP slave exposing a [`CoilBank`]
pub struct Simulator {
    unit: u8,
    listener: TcpListener,
    bank: CoilBank,
    timeout: Duration,
}

impl Simulator {
    pub fn bind(listen: &str, unit: u8, timeout: Duration) -> EResult<Self> {
        let listener = TcpListener::bind(listen)
            .map_err(|e| Error::connection(format!("unable to listen at {}: {}", listen, e)))?;
        Ok(Self {
            unit,
            listener,
            bank: <_>::default(),
            timeout,
        })
    }
    pub fn local_addr(&self) -> EResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
    #[inline]
    pub fn bank(&self) -> CoilBank {
        self.bank.clone()
    }
    /// Accepts clients forever, at most `maxconn` served at once
    pub fn serve(self, maxconn: usize) -> EResult<()> {
        let pool = threadpool::ThreadPool::new(maxconn);
        info!(
            "modbus listener started at: {}, unit {}",
            self.local_addr()?,
            self.unit
        );
        for stream in self.listener.incoming() {
            let bank = self.bank.clone();
            let unit = self.unit;
            let timeout = self.timeout;
            pool.execute(move || {
                if let Err(e) = handle_tcp_stream(stream, &bank, unit, timeout) {
                    error!("modbus server error: {}", e);
                }
            });
        }
        Ok(())
    }
    /// Serves in a background thread
    pub fn spawn(self, maxconn: usize) -> EResult<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("modbus-sim".to_owned())
            .spawn(move || {
                if let Err(e) = self.serve(maxconn) {
                    error!("modbus server: {}", e);
                }
            })
            .map_err(Into::into)
    }
}

fn handle_tcp_stream(
    stream: Result<TcpStream, std::io::Error>,
    bank: &CoilBank,
    unit: u8,
    timeout: Duration,
) -> EResult<()> {
    let mut stream = stream?;
    let peer = stream.peer_addr()?;
    debug!("modbus client connected: {}", peer);
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    loop {
        let mut buf: ModbusFrameBuf = [0; 256];
        let mut response = Vec::new();
        if stream.read(&mut buf).unwrap_or(0) == 0 {
            break;
        }
        let mut frame = ModbusFrame::new(unit, &buf, ModbusProto::TcpUdp, &mut response);
        frame.parse()?;
        if frame.processing_required {
            if frame.readonly {
                frame.process_read(&bank.ctx.read())?;
            } else {
                frame.process_write(&mut bank.ctx.write())?;
            };
        }
        if frame.response_required {
            frame.finalize_response()?;
            if stream.write_all(response.as_slice()).is_err() {
                break;
            }
        }
    }
    debug!("modbus client disconnected: {}", peer);
    Ok(())
}
