//! Session setup: allocate storage, start the echo responder, drive the
//! harness, tear everything down.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use duplex_slot::{
    Channel, Endpoint, FileStorage, MappedStorage, SegmentStorage, Side, SlotStorage,
};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, fork};

use crate::config::{BackendKind, BenchConfig};
use crate::error::{Error, Result};
use crate::harness::{BenchReport, Harness};

/// Where the echo responder runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponderMode {
    /// Forked child process.
    #[default]
    Process,
    /// Thread in the current process.
    Thread,
}

/// Echoes every message back until a read comes back empty. The empty
/// stop signal is never written back.
pub fn echo_responder<S: SlotStorage>(endpoint: &mut Endpoint<S>) -> Result<u64> {
    let mut buf = Vec::with_capacity(endpoint.payload_capacity());
    echo_with_buffer(endpoint, &mut buf)
}

/// [`echo_responder`] with a caller-provided buffer; does not allocate if
/// `buf` already has room for the largest message.
pub fn echo_with_buffer<S: SlotStorage>(
    endpoint: &mut Endpoint<S>,
    buf: &mut Vec<u8>,
) -> Result<u64> {
    let mut echoed = 0;
    loop {
        if endpoint.read_into(buf)? == 0 {
            return Ok(echoed);
        }
        endpoint.write_bytes(buf)?;
        echoed += 1;
    }
}

/// Runs one full benchmark session for `kind`.
///
/// `file_path` is only used by [`BackendKind::File`]; the file is removed
/// when the session ends.
pub fn run_session(
    kind: BackendKind,
    config: &BenchConfig,
    file_path: &Path,
    mode: ResponderMode,
) -> Result<BenchReport> {
    config.validate()?;
    let len = config.storage_len();
    match kind {
        BackendKind::File => {
            let storage = Arc::new(FileStorage::create(file_path, len)?);
            let result = drive(Arc::clone(&storage), kind, config, mode);
            if let Err(e) = storage.remove() {
                tracing::warn!(path = %file_path.display(), "failed to remove channel file: {}", e);
            }
            result
        }
        BackendKind::Mapped => {
            let storage = Arc::new(MappedStorage::create(len)?);
            drive(storage, kind, config, mode)
        }
        BackendKind::Segment => {
            let storage = Arc::new(SegmentStorage::create(len)?);
            let result = drive(Arc::clone(&storage), kind, config, mode);
            let removed = storage.remove();
            let report = result?;
            removed?;
            Ok(report)
        }
    }
}

fn drive<S>(
    storage: S,
    kind: BackendKind,
    config: &BenchConfig,
    mode: ResponderMode,
) -> Result<BenchReport>
where
    S: SlotStorage + Clone + Send + 'static,
{
    let mut channel = Channel::create(storage)?.with_policy(config.poll);
    let mut driver = channel.endpoint(Side::Zero)?;
    let responder = channel.endpoint(Side::One)?;
    tracing::debug!(backend = kind.name(), ?mode, "session started");

    match mode {
        ResponderMode::Process => drive_forked(&mut driver, responder, kind, config),
        ResponderMode::Thread => drive_threaded(&mut driver, responder, kind, config),
    }
}

fn drive_forked<S: SlotStorage>(
    driver: &mut Endpoint<S>,
    mut responder: Endpoint<S>,
    kind: BackendKind,
    config: &BenchConfig,
) -> Result<BenchReport> {
    // The child must not allocate or inherit half-written output.
    let mut buf = Vec::with_capacity(responder.payload_capacity());
    std::io::stdout().flush()?;
    std::io::stderr().flush()?;

    match unsafe { fork() }.map_err(Error::Fork)? {
        ForkResult::Child => {
            let code = match echo_with_buffer(&mut responder, &mut buf) {
                Ok(_) => 0,
                Err(e) => {
                    eprintln!("responder: {}", e);
                    1
                }
            };
            // Skip destructors: the parent owns every shared resource.
            unsafe { libc::_exit(code) }
        }
        ForkResult::Parent { child } => {
            drop(responder);
            let result = Harness::new(driver, config).run(kind);
            let closed = driver.close();

            let status = waitpid(child, None).map_err(Error::Wait)?;
            tracing::debug!(?status, "responder reaped");
            let report = result?;
            closed?;
            match status {
                WaitStatus::Exited(_, 0) => Ok(report),
                WaitStatus::Exited(_, code) => {
                    Err(Error::ResponderFailed(format!("exit code {}", code)))
                }
                WaitStatus::Signaled(_, signal, _) => {
                    Err(Error::ResponderFailed(format!("killed by {:?}", signal)))
                }
                other => Err(Error::ResponderFailed(format!("{:?}", other))),
            }
        }
    }
}

fn drive_threaded<S: SlotStorage + Send + 'static>(
    driver: &mut Endpoint<S>,
    mut responder: Endpoint<S>,
    kind: BackendKind,
    config: &BenchConfig,
) -> Result<BenchReport> {
    let handle = thread::spawn(move || echo_responder(&mut responder));
    let result = Harness::new(driver, config).run(kind);
    let closed = driver.close();

    let echoed = handle
        .join()
        .map_err(|_| Error::ResponderFailed("responder thread panicked".to_string()))?;
    let report = result?;
    closed?;
    let echoed = echoed?;
    tracing::debug!(echoed, "responder finished");
    Ok(report)
}
