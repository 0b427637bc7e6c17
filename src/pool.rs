//! A small global pool of recycled chunk buffers, so the codec workers
//! do not reallocate per chunk.

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::{fmt, mem};

pub(crate) struct Pool {
    buffers: Mutex<Vec<Vec<u8>>>,
    max_retained: usize,
}

impl Pool {
    fn new(prefill: usize, max_retained: usize) -> Self {
        let mut buffers = Vec::with_capacity(max_retained);
        buffers.resize_with(prefill, Vec::new);
        Self {
            buffers: Mutex::new(buffers),
            max_retained,
        }
    }

    pub(crate) fn get(&self) -> Buffer<'_> {
        let value = self.buffers.lock().pop().unwrap_or_default();
        Buffer {
            value: ManuallyDrop::new(value),
            pool: self,
        }
    }

    pub(crate) fn attach(&self, value: Vec<u8>) -> Buffer<'_> {
        Buffer {
            value: ManuallyDrop::new(value),
            pool: self,
        }
    }

    fn return_buffer(&self, mut value: Vec<u8>) {
        let mut buffers = self.buffers.lock();
        if buffers.len() < self.max_retained {
            value.clear();
            buffers.push(value);
        }
    }
}

/// A pooled byte buffer; returns to its pool on drop.
pub struct Buffer<'a> {
    value: ManuallyDrop<Vec<u8>>,
    pool: &'a Pool,
}

impl Buffer<'_> {
    /// Take the underlying vector out of the pool's custody.
    pub fn detach(mut self) -> Vec<u8> {
        let value = unsafe { ManuallyDrop::take(&mut self.value) };
        mem::forget(self);
        value
    }
}

impl Deref for Buffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl DerefMut for Buffer<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.value
    }
}

impl fmt::Debug for Buffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl Drop for Buffer<'_> {
    fn drop(&mut self) {
        let value = unsafe { ManuallyDrop::take(&mut self.value) };
        self.pool.return_buffer(value);
    }
}

fn chunks() -> &'static Pool {
    static INSTANCE: OnceCell<Pool> = OnceCell::new();

    INSTANCE.get_or_init(|| {
        let workers = num_cpus::get();
        Pool::new(workers, workers * 2)
    })
}

pub(crate) fn chunk() -> Buffer<'static> {
    chunks().get()
}

pub(crate) fn attach_chunk(value: Vec<u8>) -> Buffer<'static> {
    chunks().attach(value)
}
