//! 信封对象池
//! Envelope pool
//!
//! Request and response envelopes are handed out zeroed and returned on the
//! way out. Maps are cleared, not reallocated, so a warm pool avoids
//! per-request allocation of metadata and headers.

use mentat_kernel::middleware::{MiddlewareRequest, MiddlewareResponse};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

pub const DEFAULT_POOL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Envelopes served from the pool
    pub reused: u64,
    /// Envelopes freshly allocated
    pub allocated: u64,
    pub idle_requests: usize,
    pub idle_responses: usize,
}

#[derive(Debug)]
pub struct EnvelopePool {
    requests: Mutex<Vec<MiddlewareRequest>>,
    responses: Mutex<Vec<MiddlewareResponse>>,
    capacity: usize,
    reused: AtomicU64,
    allocated: AtomicU64,
}

impl Default for EnvelopePool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

impl EnvelopePool {
    /// `capacity` bounds the number of idle envelopes of each kind.
    pub fn new(capacity: usize) -> Self {
        Self {
            requests: Mutex::new(Vec::with_capacity(capacity)),
            responses: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            reused: AtomicU64::new(0),
            allocated: AtomicU64::new(0),
        }
    }

    pub fn acquire_request(&self) -> MiddlewareRequest {
        match self.requests.lock().pop() {
            Some(req) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                req
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                MiddlewareRequest::default()
            }
        }
    }

    pub fn release_request(&self, mut request: MiddlewareRequest) {
        request.reset();
        let mut idle = self.requests.lock();
        if idle.len() < self.capacity {
            idle.push(request);
        }
    }

    pub fn acquire_response(&self) -> MiddlewareResponse {
        match self.responses.lock().pop() {
            Some(resp) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                resp
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                MiddlewareResponse::default()
            }
        }
    }

    pub fn release_response(&self, mut response: MiddlewareResponse) {
        response.reset();
        let mut idle = self.responses.lock();
        if idle.len() < self.capacity {
            idle.push(response);
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            reused: self.reused.load(Ordering::Relaxed),
            allocated: self.allocated.load(Ordering::Relaxed),
            idle_requests: self.requests.lock().len(),
            idle_responses: self.responses.lock().len(),
        }
    }
}
