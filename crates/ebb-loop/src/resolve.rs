//! Name resolution requests.
//!
//! A request is a short-lived in-flight operation, tracked separately from
//! handles for the loop's "more work remains" accounting. Resolution runs
//! on a worker thread; the result comes back through the completion queue,
//! is collected after the backend wait, and the callback runs on the loop
//! thread in the next cycle's pending drain.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::thread;

use thiserror::Error;

use crate::reactor::Reactor;
use crate::trace::debug;

/// Identifier of an in-flight resolution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub(crate) u64);

/// Resolution failure, with the host-not-found condition distinguished
/// from transport-level errors.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no such host")]
    NoSuchHost,
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub(crate) type ResolveOutcome = Result<Vec<SocketAddr>, ResolveError>;
pub(crate) type Completion = (RequestId, ResolveOutcome);
pub(crate) type ResolveCb = Box<dyn FnOnce(&mut Reactor, ResolveOutcome)>;

pub(crate) struct RequestRecord {
    pub(crate) cb: ResolveCb,
}

impl Reactor {
    /// Resolve `host:port` off-thread and deliver the result to `cb` on
    /// the loop thread. The request holds the loop open until the callback
    /// has run. One worker thread per lookup; a pooled scheduler can sit
    /// behind the same completion route without changing this interface.
    pub fn resolve<F>(&mut self, host: &str, port: u16, cb: F) -> io::Result<RequestId>
    where
        F: FnOnce(&mut Reactor, ResolveOutcome) + 'static,
    {
        let id = RequestId(self.inner.next_request);
        self.inner.next_request += 1;
        debug!(host, port, "resolve requested");

        let shared = self.inner.backend.shared();
        let host = host.to_string();
        thread::Builder::new()
            .name("ebb-resolve".to_string())
            .spawn(move || {
                let outcome = lookup(&host, port);
                let _ = shared.completions.push((id, outcome));
                let _ = shared.poller.notify();
            })?;

        self.inner
            .requests
            .insert(id.0, RequestRecord { cb: Box::new(cb) });
        Ok(id)
    }

    /// Move completions from the cross-thread queue onto the dispatch
    /// list; they run with the next pending drain.
    pub(crate) fn drain_completions(&mut self) {
        while let Some(completion) = self.inner.backend.pop_completion() {
            self.inner.ready_requests.push_back(completion);
        }
    }

    /// Unregister the request, then run its callback. Once the completion
    /// is delivered the request no longer holds the loop open.
    pub(crate) fn finish_request(&mut self, id: RequestId, outcome: ResolveOutcome) {
        let Some(record) = self.inner.requests.remove(&id.0) else {
            return;
        };
        (record.cb)(self, outcome);
    }
}

fn lookup(host: &str, port: u16) -> ResolveOutcome {
    match (host, port).to_socket_addrs() {
        Ok(addrs) => {
            let addrs: Vec<SocketAddr> = addrs.collect();
            if addrs.is_empty() {
                Err(ResolveError::NoSuchHost)
            } else {
                Ok(addrs)
            }
        }
        // Resolver failures carry no OS errno; that is the no-such-host
        // condition. Real errnos pass through untouched.
        Err(e) if e.raw_os_error().is_none() => Err(ResolveError::NoSuchHost),
        Err(e) => Err(ResolveError::Io(e)),
    }
}
