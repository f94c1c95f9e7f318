#![allow(dead_code)]

use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

/// In-memory destination whose contents stay readable after the sink takes it.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8(self.bytes.lock().unwrap().clone()).unwrap()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Counts complete writes without keeping the bytes.
#[derive(Clone, Default)]
pub struct CountingWriter {
    writes: Arc<AtomicUsize>,
}

impl CountingWriter {
    pub fn count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Fails every write.
pub struct FailingWriter;

impl Write for FailingWriter {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "destination gone"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Blocks every write until the gate is opened.
#[derive(Clone, Default)]
pub struct GatedWriter {
    gate: Arc<(Mutex<bool>, Condvar)>,
    inner: SharedBuffer,
}

impl GatedWriter {
    pub fn open(&self) {
        let (lock, cond) = &*self.gate;
        *lock.lock().unwrap() = true;
        cond.notify_all();
    }

    pub fn contents(&self) -> String {
        self.inner.contents()
    }
}

impl Write for GatedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let (lock, cond) = &*self.gate;
        let mut open = lock.lock().unwrap();
        while !*open {
            open = cond.wait(open).unwrap();
        }
        drop(open);
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Takes a fixed pause before every write.
#[derive(Clone)]
pub struct SlowWriter {
    delay: Duration,
    inner: SharedBuffer,
}

impl SlowWriter {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: SharedBuffer::new(),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.inner.lines()
    }
}

impl Write for SlowWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        thread::sleep(self.delay);
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
