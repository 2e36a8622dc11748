//! WinDivert capture capability, loaded at runtime
//!
//! The driver library is resolved by its well-known name when a session is
//! opened. Nothing links against it, so the agent still runs (and reports a
//! clear error) on hosts where the driver is not installed.

use std::ffi::{c_char, c_int, c_void, CString, OsString};
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use libloading::Library;
use tracing::debug;

use crate::error::{ShaperError, ShaperResult};
use crate::traits::{CaptureSession, Packet, PacketCapture};

const CAPABILITY: &str = "WinDivert";

const LAYER_NETWORK: c_int = 0;
const SHUTDOWN_BOTH: c_int = 3;

/// Largest IPv4/IPv6 packet the driver hands out
const PACKET_BUFFER_LEN: usize = 0xFFFF;
/// WINDIVERT_ADDRESS is 80 bytes; keep headroom for newer driver versions
const ADDRESS_BUFFER_LEN: usize = 128;

const ERROR_FILE_NOT_FOUND: i32 = 2;
const ERROR_NO_DATA: i32 = 232;

type OpenFn = unsafe extern "system" fn(*const c_char, c_int, i16, u64) -> *mut c_void;
type RecvFn = unsafe extern "system" fn(*mut c_void, *mut c_void, u32, *mut u32, *mut c_void) -> c_int;
type SendFn = unsafe extern "system" fn(*mut c_void, *const c_void, u32, *mut u32, *const c_void) -> c_int;
type ShutdownFn = unsafe extern "system" fn(*mut c_void, c_int) -> c_int;
type CloseFn = unsafe extern "system" fn(*mut c_void) -> c_int;

/// Resolved entry points; `_library` keeps them valid
struct WinDivertApi {
    open: OpenFn,
    recv: RecvFn,
    send: SendFn,
    shutdown: ShutdownFn,
    close: CloseFn,
    _library: Library,
}

impl WinDivertApi {
    fn load(name: &OsString) -> ShaperResult<Self> {
        let unavailable = |detail: String| ShaperError::CaptureUnavailable {
            capability: CAPABILITY.to_string(),
            detail,
        };

        // SAFETY: loading runs the library initialisers; WinDivert's are side-effect free.
        let library = unsafe { Library::new(name) }
            .map_err(|e| unavailable(format!("cannot load {}: {}", name.to_string_lossy(), e)))?;

        // SAFETY: signatures match the WinDivert 2.x C API.
        unsafe {
            let open = *library
                .get::<OpenFn>(b"WinDivertOpen\0")
                .map_err(|e| unavailable(e.to_string()))?;
            let recv = *library
                .get::<RecvFn>(b"WinDivertRecv\0")
                .map_err(|e| unavailable(e.to_string()))?;
            let send = *library
                .get::<SendFn>(b"WinDivertSend\0")
                .map_err(|e| unavailable(e.to_string()))?;
            let shutdown = *library
                .get::<ShutdownFn>(b"WinDivertShutdown\0")
                .map_err(|e| unavailable(e.to_string()))?;
            let close = *library
                .get::<CloseFn>(b"WinDivertClose\0")
                .map_err(|e| unavailable(e.to_string()))?;

            Ok(Self {
                open,
                recv,
                send,
                shutdown,
                close,
                _library: library,
            })
        }
    }
}

/// Open driver handle, closed when the last user drops it
struct DivertHandle {
    api: Arc<WinDivertApi>,
    raw: usize,
}

impl DivertHandle {
    fn ptr(&self) -> *mut c_void {
        self.raw as *mut c_void
    }
}

impl Drop for DivertHandle {
    fn drop(&mut self) {
        // SAFETY: `raw` came from a successful WinDivertOpen and is closed once.
        unsafe {
            (self.api.close)(self.ptr());
        }
    }
}

/// Packet capture through the WinDivert driver
pub struct WinDivertCapture {
    library: OsString,
}

impl WinDivertCapture {
    pub fn new() -> Self {
        Self {
            library: libloading::library_filename("WinDivert"),
        }
    }

    /// Use an explicit library name or path instead of the default search name
    pub fn with_library(library: impl Into<OsString>) -> Self {
        Self { library: library.into() }
    }
}

impl Default for WinDivertCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PacketCapture for WinDivertCapture {
    fn name(&self) -> &str {
        CAPABILITY
    }

    /// Load the library and resolve its entry points; no handle is opened
    fn check_available(&self) -> ShaperResult<()> {
        WinDivertApi::load(&self.library).map(drop)
    }

    async fn open(&self, filter: &str) -> ShaperResult<Box<dyn CaptureSession>> {
        let library = self.library.clone();
        let filter = filter.to_string();

        let handle = tokio::task::spawn_blocking(move || open_blocking(&library, &filter))
            .await
            .map_err(|e| ShaperError::Capture {
                reason: format!("open task failed: {}", e),
            })??;

        debug!("WinDivert handle opened: 0x{:X}", handle.raw);
        Ok(Box::new(WinDivertSession {
            handle: Arc::new(handle),
        }))
    }
}

fn open_blocking(library: &OsString, filter: &str) -> ShaperResult<DivertHandle> {
    let api = Arc::new(WinDivertApi::load(library)?);
    let c_filter = CString::new(filter).map_err(|_| ShaperError::Open {
        filter: filter.to_string(),
        reason: "filter contains a NUL byte".to_string(),
    })?;

    // SAFETY: c_filter outlives the call; the remaining arguments are plain values.
    let raw = unsafe { (api.open)(c_filter.as_ptr(), LAYER_NETWORK, 0, 0) };
    if raw.is_null() || raw as isize == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(ERROR_FILE_NOT_FOUND) {
            return Err(ShaperError::CaptureUnavailable {
                capability: CAPABILITY.to_string(),
                detail: "driver files not found next to the library".to_string(),
            });
        }
        return Err(ShaperError::Open {
            filter: filter.to_string(),
            reason: err.to_string(),
        });
    }

    Ok(DivertHandle { api, raw: raw as usize })
}

struct WinDivertSession {
    handle: Arc<DivertHandle>,
}

#[async_trait]
impl CaptureSession for WinDivertSession {
    async fn recv(&mut self) -> ShaperResult<Option<Packet>> {
        let handle = self.handle.clone();
        tokio::task::spawn_blocking(move || {
            let mut data = vec![0u8; PACKET_BUFFER_LEN];
            let mut address = vec![0u8; ADDRESS_BUFFER_LEN];
            let mut received: u32 = 0;

            // SAFETY: both buffers are live and sized as advertised.
            let ok = unsafe {
                (handle.api.recv)(
                    handle.ptr(),
                    data.as_mut_ptr().cast(),
                    data.len() as u32,
                    &mut received,
                    address.as_mut_ptr().cast(),
                )
            };
            if ok == 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(ERROR_NO_DATA) {
                    return Ok(None);
                }
                return Err(ShaperError::Capture { reason: err.to_string() });
            }

            data.truncate(received as usize);
            Ok(Some(Packet { data, address }))
        })
        .await
        .map_err(|e| ShaperError::Capture {
            reason: format!("receive task failed: {}", e),
        })?
    }

    async fn send(&mut self, packet: &Packet) -> ShaperResult<()> {
        let handle = self.handle.clone();
        let data = packet.data.clone();
        let mut address = packet.address.clone();
        address.resize(ADDRESS_BUFFER_LEN.max(address.len()), 0);

        tokio::task::spawn_blocking(move || {
            let mut sent: u32 = 0;
            // SAFETY: both buffers are live for the duration of the call.
            let ok = unsafe {
                (handle.api.send)(
                    handle.ptr(),
                    data.as_ptr().cast(),
                    data.len() as u32,
                    &mut sent,
                    address.as_ptr().cast(),
                )
            };
            if ok == 0 {
                return Err(ShaperError::Inject {
                    reason: io::Error::last_os_error().to_string(),
                });
            }
            if sent as usize != data.len() {
                return Err(ShaperError::Inject {
                    reason: format!("partial send: {}/{}", sent, data.len()),
                });
            }
            Ok(())
        })
        .await
        .map_err(|e| ShaperError::Inject {
            reason: format!("send task failed: {}", e),
        })?
    }

    fn shutdown(&self) -> ShaperResult<()> {
        // SAFETY: the handle stays open until the last Arc is dropped.
        let ok = unsafe { (self.handle.api.shutdown)(self.handle.ptr(), SHUTDOWN_BOTH) };
        if ok == 0 {
            return Err(ShaperError::Capture {
                reason: io::Error::last_os_error().to_string(),
            });
        }
        Ok(())
    }
}
