//! Frame-to-frame registration service used by the agent solver.
//!
//! The service itself (visual/geometric keyframe matching) lives outside this
//! crate. [`FrameRegistrationService`] is the blocking request/response seam;
//! [`ChannelRegistrationService`] is an in-process transport that runs a
//! handler on a worker thread and bounds every request with a timeout.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use nalgebra::{Quaternion, Vector3};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

/// Depth of the request queue in front of the worker.
const REQUEST_QUEUE_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    #[error("service is not running")]
    Unavailable,

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("service disconnected before replying")]
    Disconnected,
}

/// Request to register two sensor frames, identified by frame number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRegistrationRequest {
    pub query: u64,
    pub matched: u64,
}

/// Service answer: validity plus the match-to-query pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRegistrationResponse {
    pub valid: bool,
    /// Not necessarily normalized.
    pub orientation: Quaternion<f64>,
    pub position: Vector3<f64>,
}

impl FrameRegistrationResponse {
    pub fn rejected() -> Self {
        Self {
            valid: false,
            orientation: Quaternion::identity(),
            position: Vector3::zeros(),
        }
    }
}

/// Blocking frame-registration endpoint.
pub trait FrameRegistrationService: Send + Sync {
    /// Reachability check. Callers call this before [`register`](Self::register).
    fn exists(&self) -> bool;

    fn register(
        &self,
        request: FrameRegistrationRequest,
    ) -> Result<FrameRegistrationResponse, ServiceError>;
}

/// Handler run by the worker thread for every request.
pub type RegistrationHandler =
    Box<dyn FnMut(FrameRegistrationRequest) -> FrameRegistrationResponse + Send + 'static>;

struct Job {
    request: FrameRegistrationRequest,
    reply: Sender<FrameRegistrationResponse>,
}

/// Clears the alive flag when the worker exits, including by panic.
struct AliveGuard(Arc<AtomicBool>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// In-process [`FrameRegistrationService`] over crossbeam channels.
pub struct ChannelRegistrationService {
    requests: Mutex<Option<Sender<Job>>>,
    alive: Arc<AtomicBool>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    request_timeout: Duration,
}

impl ChannelRegistrationService {
    /// Start the worker thread.
    pub fn spawn(handler: RegistrationHandler, request_timeout: Duration) -> Self {
        let (sender, receiver) = bounded::<Job>(REQUEST_QUEUE_SIZE);
        let alive = Arc::new(AtomicBool::new(true));

        let guard = AliveGuard(alive.clone());
        let mut handler = handler;
        let worker = thread::spawn(move || {
            let _guard = guard;
            for job in receiver.iter() {
                let response = handler(job.request);
                // Caller may have timed out and dropped its end.
                let _ = job.reply.send(response);
            }
            debug!("Frame registration worker exiting");
        });

        Self {
            requests: Mutex::new(Some(sender)),
            alive,
            worker: Mutex::new(Some(worker)),
            request_timeout,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Stop accepting requests and wait for the worker to drain.
    pub fn shutdown(&self) {
        // Dropping the sender ends the worker's receive loop.
        self.requests.lock().take();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl FrameRegistrationService for ChannelRegistrationService {
    fn exists(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && self.requests.lock().is_some()
    }

    fn register(
        &self,
        request: FrameRegistrationRequest,
    ) -> Result<FrameRegistrationResponse, ServiceError> {
        let sender = self
            .requests
            .lock()
            .as_ref()
            .cloned()
            .ok_or(ServiceError::Unavailable)?;

        let (reply, response) = bounded(1);
        sender
            .send_timeout(Job { request, reply }, self.request_timeout)
            .map_err(|_| ServiceError::Unavailable)?;

        match response.recv_timeout(self.request_timeout) {
            Ok(response) => Ok(response),
            Err(RecvTimeoutError::Timeout) => Err(ServiceError::Timeout(self.request_timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(ServiceError::Disconnected),
        }
    }
}

impl Drop for ChannelRegistrationService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_handler() -> RegistrationHandler {
        Box::new(|request| FrameRegistrationResponse {
            valid: request.query != request.matched,
            orientation: Quaternion::identity(),
            position: Vector3::new(request.query as f64, request.matched as f64, 0.0),
        })
    }

    #[test]
    fn test_request_round_trip() {
        let service = ChannelRegistrationService::spawn(echo_handler(), Duration::from_secs(1));
        assert!(service.exists());

        let response = service
            .register(FrameRegistrationRequest { query: 3, matched: 8 })
            .unwrap();
        assert!(response.valid);
        assert_eq!(response.position, Vector3::new(3.0, 8.0, 0.0));

        let response = service
            .register(FrameRegistrationRequest { query: 4, matched: 4 })
            .unwrap();
        assert!(!response.valid);
    }

    #[test]
    fn test_slow_handler_times_out() {
        let handler: RegistrationHandler = Box::new(|_| {
            thread::sleep(Duration::from_millis(200));
            FrameRegistrationResponse::rejected()
        });
        let timeout = Duration::from_millis(20);
        let service = ChannelRegistrationService::spawn(handler, timeout);

        let err = service
            .register(FrameRegistrationRequest { query: 1, matched: 2 })
            .unwrap_err();
        assert_eq!(err, ServiceError::Timeout(timeout));
    }

    #[test]
    fn test_shutdown_makes_service_unavailable() {
        let service = ChannelRegistrationService::spawn(echo_handler(), Duration::from_secs(1));
        service.shutdown();

        assert!(!service.exists());
        let err = service
            .register(FrameRegistrationRequest { query: 1, matched: 2 })
            .unwrap_err();
        assert_eq!(err, ServiceError::Unavailable);
    }

    #[test]
    fn test_panicking_handler_marks_service_dead() {
        let handler: RegistrationHandler = Box::new(|_| panic!("matcher crashed"));
        let service = ChannelRegistrationService::spawn(handler, Duration::from_secs(1));

        let err = service
            .register(FrameRegistrationRequest { query: 1, matched: 2 })
            .unwrap_err();
        assert_eq!(err, ServiceError::Disconnected);

        // the guard runs while the worker unwinds; give it a moment
        for _ in 0..100 {
            if !service.exists() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!service.exists());
    }
}
