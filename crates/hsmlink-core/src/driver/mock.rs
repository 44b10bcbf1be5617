//! Mock device driver for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::traits::{DeviceDriver, TransportError};
use crate::status::StatusCode;

/// Handle issued by [`MockDriver`].
#[derive(Debug, PartialEq, Eq)]
pub struct MockHandle(u32);

impl MockHandle {
    pub fn id(&self) -> u32 {
        self.0
    }
}

/// A driver call as seen by the mock, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Open,
    Close(u32),
    Reset(u32),
    Write { handle: u32, data: Vec<u8> },
    Read { handle: u32 },
}

#[derive(Debug, Clone, Copy)]
enum OpenScript {
    Missing,
    Fail(StatusCode),
}

#[derive(Debug, Clone, Copy)]
enum WriteScript {
    Fail(StatusCode),
    Short(usize),
}

#[derive(Default)]
struct MockState {
    next_handle: u32,
    open_handles: Vec<u32>,
    calls: Vec<DriverCall>,
    open_script: VecDeque<OpenScript>,
    write_script: VecDeque<WriteScript>,
    read_script: VecDeque<Result<Vec<u8>, StatusCode>>,
    reset_failure: Option<StatusCode>,
    last_payload: Option<Vec<u8>>,
    echo: bool,
    io_delay: Option<Duration>,
}

/// Scripted driver for unit testing session and proxy logic.
///
/// Clones share state, so a test can keep one clone for inspection while the
/// session owns another.
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock that answers every read with the last non-empty payload written.
    pub fn echo() -> Self {
        let mock = Self::new();
        mock.state.lock().unwrap().echo = true;
        mock
    }

    /// Next open enumerates successfully but finds no device.
    pub fn queue_open_missing(&self) {
        self.state
            .lock()
            .unwrap()
            .open_script
            .push_back(OpenScript::Missing);
    }

    /// Next open fails with `code`.
    pub fn queue_open_error(&self, code: StatusCode) {
        self.state
            .lock()
            .unwrap()
            .open_script
            .push_back(OpenScript::Fail(code));
    }

    /// Next write fails with `code`.
    pub fn queue_write_error(&self, code: StatusCode) {
        self.state
            .lock()
            .unwrap()
            .write_script
            .push_back(WriteScript::Fail(code));
    }

    /// Next write reports only `n` bytes transferred.
    pub fn queue_short_write(&self, n: usize) {
        self.state
            .lock()
            .unwrap()
            .write_script
            .push_back(WriteScript::Short(n));
    }

    /// Queue a response to be returned on a later read.
    pub fn queue_response(&self, data: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .read_script
            .push_back(Ok(data.to_vec()));
    }

    /// Next read fails with `code`.
    pub fn queue_read_error(&self, code: StatusCode) {
        self.state
            .lock()
            .unwrap()
            .read_script
            .push_back(Err(code));
    }

    /// Next reset fails with `code`.
    pub fn fail_next_reset(&self, code: StatusCode) {
        self.state.lock().unwrap().reset_failure = Some(code);
    }

    /// Sleep inside every write and read, to widen race windows.
    pub fn set_io_delay(&self, delay: Duration) {
        self.state.lock().unwrap().io_delay = Some(delay);
    }

    /// All calls so far.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Payloads of all writes so far.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                DriverCall::Write { data, .. } => Some(data),
                _ => None,
            })
            .collect()
    }

    pub fn open_count(&self) -> usize {
        self.count(|c| matches!(c, DriverCall::Open))
    }

    pub fn close_count(&self) -> usize {
        self.count(|c| matches!(c, DriverCall::Close(_)))
    }

    pub fn reset_count(&self) -> usize {
        self.count(|c| matches!(c, DriverCall::Reset(_)))
    }

    /// Number of handles currently open.
    pub fn open_handles(&self) -> usize {
        self.state.lock().unwrap().open_handles.len()
    }

    fn count(&self, pred: impl Fn(&DriverCall) -> bool) -> usize {
        self.state.lock().unwrap().calls.iter().filter(|c| pred(c)).count()
    }

    fn delay(&self) {
        let delay = self.state.lock().unwrap().io_delay;
        if let Some(d) = delay {
            thread::sleep(d);
        }
    }
}

fn stale(handle: &MockHandle) -> TransportError {
    TransportError::status(
        StatusCode::InvalidHandle,
        format!("Mock handle {} is closed", handle.0),
    )
}

impl DeviceDriver for MockDriver {
    type Handle = MockHandle;

    fn open(
        &self,
        _vendor_id: u16,
        _product_id: u16,
        _serial: Option<&str>,
    ) -> Result<Option<MockHandle>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(DriverCall::Open);
        match state.open_script.pop_front() {
            Some(OpenScript::Missing) => Ok(None),
            Some(OpenScript::Fail(code)) => Err(TransportError::status(code, "Mock open failed")),
            None => {
                state.next_handle += 1;
                let id = state.next_handle;
                state.open_handles.push(id);
                Ok(Some(MockHandle(id)))
            }
        }
    }

    fn close(&self, handle: MockHandle) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(DriverCall::Close(handle.0));
        state.open_handles.retain(|&id| id != handle.0);
    }

    fn reset(&self, handle: &MockHandle) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(DriverCall::Reset(handle.0));
        match state.reset_failure.take() {
            Some(code) => Err(TransportError::status(code, "Mock reset failed")),
            None => Ok(()),
        }
    }

    fn write(&self, handle: &MockHandle, data: &[u8]) -> Result<usize, TransportError> {
        self.delay();
        let mut state = self.state.lock().unwrap();
        state.calls.push(DriverCall::Write {
            handle: handle.0,
            data: data.to_vec(),
        });
        if !state.open_handles.contains(&handle.0) {
            return Err(stale(handle));
        }
        match state.write_script.pop_front() {
            Some(WriteScript::Fail(code)) => {
                Err(TransportError::status(code, "Mock write failed"))
            }
            Some(WriteScript::Short(n)) => Ok(n.min(data.len())),
            None => {
                if !data.is_empty() {
                    state.last_payload = Some(data.to_vec());
                }
                Ok(data.len())
            }
        }
    }

    fn read(&self, handle: &MockHandle, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.delay();
        let mut state = self.state.lock().unwrap();
        state.calls.push(DriverCall::Read { handle: handle.0 });
        if !state.open_handles.contains(&handle.0) {
            return Err(stale(handle));
        }
        let data = match state.read_script.pop_front() {
            Some(Ok(data)) => data,
            Some(Err(code)) => return Err(TransportError::status(code, "Mock read failed")),
            None if state.echo => state.last_payload.clone().unwrap_or_default(),
            None => {
                return Err(TransportError::status(
                    StatusCode::Timeout,
                    "Mock read queue empty",
                ));
            }
        };
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }
}
