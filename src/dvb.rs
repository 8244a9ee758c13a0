//! Linux DVB implementation of the capture interfaces.
//!
//! Talks to the classic frontend/demux/dvr character devices through `libc`
//! ioctls: the frontend is tuned with `FE_SET_FRONTEND`, the demux is set up
//! as a whole-stream TS tap, and the dvr node delivers the raw transport
//! stream through non-blocking reads.

use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::device::{CaptureSource, DeviceError, ReadChunk, Tuner};

/// Device-node paths for one DVB adapter.
#[derive(Debug, Clone)]
pub struct AdapterPaths {
    pub frontend: PathBuf,
    pub demux: PathBuf,
    pub dvr: PathBuf,
}

impl Default for AdapterPaths {
    fn default() -> Self {
        AdapterPaths {
            frontend: PathBuf::from("/dev/dvb/adapter0/frontend0"),
            demux: PathBuf::from("/dev/dvb/adapter0/demux0"),
            dvr: PathBuf::from("/dev/dvb/adapter0/dvr0"),
        }
    }
}

// DVBv3 ioctl plumbing. Numbers match linux/dvb/frontend.h and linux/dvb/dmx.h.

const DVB_IOC_MAGIC: libc::c_ulong = b'o' as libc::c_ulong;

const fn iow(nr: libc::c_ulong, size: usize) -> libc::c_ulong {
    ((1 as libc::c_ulong) << 30) | ((size as libc::c_ulong) << 16) | (DVB_IOC_MAGIC << 8) | nr
}

/// `struct dvb_frontend_parameters`. The C version carries a union of the
/// per-delivery-system parameter blocks; OFDM is the largest member and the
/// one terrestrial tuning uses, so it stands in for the union here.
#[repr(C)]
struct FrontendParameters {
    frequency: u32,
    inversion: u32,
    ofdm: OfdmParameters,
}

#[repr(C)]
struct OfdmParameters {
    bandwidth: u32,
    code_rate_hp: u32,
    code_rate_lp: u32,
    constellation: u32,
    transmission_mode: u32,
    guard_interval: u32,
    hierarchy_information: u32,
}

const FE_SET_FRONTEND: libc::c_ulong = iow(76, std::mem::size_of::<FrontendParameters>());

const INVERSION_AUTO: u32 = 2;
const BANDWIDTH_6_MHZ: u32 = 2;
const FEC_AUTO: u32 = 9;
const QAM_AUTO: u32 = 6;
const TRANSMISSION_MODE_AUTO: u32 = 2;
const GUARD_INTERVAL_AUTO: u32 = 4;
const HIERARCHY_AUTO: u32 = 4;

/// `struct dmx_pes_filter_params`.
#[repr(C)]
struct DmxPesFilterParams {
    pid: u16,
    input: u32,
    output: u32,
    pes_type: u32,
    flags: u32,
}

const DMX_SET_PES_FILTER: libc::c_ulong = iow(44, std::mem::size_of::<DmxPesFilterParams>());

const DMX_IN_FRONTEND: u32 = 0;
const DMX_OUT_TS_TAP: u32 = 2;
const DMX_PES_OTHER: u32 = 20;
const DMX_IMMEDIATE_START: u32 = 4;

/// Pseudo-PID that selects the whole transport stream.
const WHOLE_STREAM_PID: u16 = 0x2000;

fn dvb_ioctl<T>(file: &File, request: libc::c_ulong, arg: &T) -> std::io::Result<()> {
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), request, arg as *const T) };
    if rc < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn open_nonblocking(path: &Path, write: bool) -> Result<File, DeviceError> {
    OpenOptions::new()
        .read(true)
        .write(write)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .map_err(|e| DeviceError::OpenFailed {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Hardware path for one tuned channel: the frontend and demux nodes stay
/// open for the session's lifetime and are closed on release.
pub struct DvbHandle {
    frontend: File,
    demux: File,
}

/// Tuner backed by the adapter's device nodes.
pub struct DvbTuner {
    paths: AdapterPaths,
}

impl DvbTuner {
    pub fn new(paths: AdapterPaths) -> Self {
        DvbTuner { paths }
    }
}

impl Tuner for DvbTuner {
    type Handle = DvbHandle;
    type Capture = DvrSource;

    fn acquire(&mut self, frequency_hz: u32) -> Result<DvbHandle, DeviceError> {
        let frontend = open_nonblocking(&self.paths.frontend, true)?;

        let params = FrontendParameters {
            frequency: frequency_hz,
            inversion: INVERSION_AUTO,
            ofdm: OfdmParameters {
                bandwidth: BANDWIDTH_6_MHZ,
                code_rate_hp: FEC_AUTO,
                code_rate_lp: FEC_AUTO,
                constellation: QAM_AUTO,
                transmission_mode: TRANSMISSION_MODE_AUTO,
                guard_interval: GUARD_INTERVAL_AUTO,
                hierarchy_information: HIERARCHY_AUTO,
            },
        };
        dvb_ioctl(&frontend, FE_SET_FRONTEND, &params).map_err(|e| DeviceError::TuneFailed {
            frequency_hz,
            source: e,
        })?;

        let demux = open_nonblocking(&self.paths.demux, true)?;

        let filter = DmxPesFilterParams {
            pid: WHOLE_STREAM_PID,
            input: DMX_IN_FRONTEND,
            output: DMX_OUT_TS_TAP,
            pes_type: DMX_PES_OTHER,
            flags: DMX_IMMEDIATE_START,
        };
        dvb_ioctl(&demux, DMX_SET_PES_FILTER, &filter).map_err(DeviceError::DemuxSetupFailed)?;

        Ok(DvbHandle { frontend, demux })
    }

    fn open_capture(&mut self, _handle: &mut DvbHandle) -> Result<DvrSource, DeviceError> {
        let dvr = open_nonblocking(&self.paths.dvr, false)?;
        Ok(DvrSource { dvr })
    }

    fn release(&mut self, handle: DvbHandle) -> Result<(), DeviceError> {
        // Closing the descriptors is all the kernel interface offers.
        drop(handle.demux);
        drop(handle.frontend);
        Ok(())
    }
}

/// Raw transport-stream source read from the adapter's dvr node.
pub struct DvrSource {
    dvr: File,
}

impl CaptureSource for DvrSource {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<ReadChunk, DeviceError> {
        match self.dvr.read(buf) {
            Ok(0) => Ok(ReadChunk::Empty),
            Ok(n) => Ok(ReadChunk::Data(n)),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::Interrupted =>
            {
                Ok(ReadChunk::Empty)
            }
            Err(e) => Err(DeviceError::ReadFailed(e)),
        }
    }
}
