//! The shared connection pool.
//!
//! # Design
//! A `ConnectionPool` pairs one `ureq::Agent` (which keeps idle keep-alive
//! connections) with a `ConnectionGate` that caps how many requests may be
//! in flight at once, both in aggregate and per host. ureq only bounds the
//! idle set, so the gate supplies the blocking half: a caller that finds
//! the pool exhausted waits on a condition variable until another caller
//! drops its permit.
//!
//! The pool is cheap to clone; every clone shares the same agent and gate.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::config::{ClientConfig, CONNECT_TIMEOUT};

#[derive(Debug, Default)]
struct GateState {
    total: usize,
    per_host: HashMap<String, usize>,
}

/// Counts in-flight requests and blocks callers above the limits.
#[derive(Debug)]
pub struct ConnectionGate {
    max_total: usize,
    max_per_host: usize,
    state: Mutex<GateState>,
    released: Condvar,
}

impl ConnectionGate {
    pub fn new(max_total: usize, max_per_host: usize) -> Self {
        Self {
            max_total: max_total.max(1),
            max_per_host: max_per_host.max(1),
            state: Mutex::new(GateState::default()),
            released: Condvar::new(),
        }
    }

    /// Block until a slot for `host` is free, then take it.
    pub fn acquire(self: &Arc<Self>, host: &str) -> ConnectionPermit {
        let mut state = self.state.lock();
        loop {
            let for_host = state.per_host.get(host).copied().unwrap_or(0);
            if state.total < self.max_total && for_host < self.max_per_host {
                break;
            }
            debug!(host, in_flight = state.total, "connection pool exhausted, waiting");
            self.released.wait(&mut state);
        }
        state.total += 1;
        *state.per_host.entry(host.to_string()).or_insert(0) += 1;
        ConnectionPermit {
            gate: Arc::clone(self),
            host: host.to_string(),
        }
    }

    /// Requests currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.state.lock().total
    }

    fn release(&self, host: &str) {
        let mut state = self.state.lock();
        state.total = state.total.saturating_sub(1);
        if let Some(count) = state.per_host.get_mut(host) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.per_host.remove(host);
            }
        }
        drop(state);
        self.released.notify_all();
    }
}

/// A held slot; dropping it frees the slot and wakes waiters.
#[derive(Debug)]
pub struct ConnectionPermit {
    gate: Arc<ConnectionGate>,
    host: String,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.gate.release(&self.host);
    }
}

/// Pooled HTTP agent shared by every transport built from it.
#[derive(Clone)]
pub struct ConnectionPool {
    agent: ureq::Agent,
    gate: Arc<ConnectionGate>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool").field("gate", &self.gate).finish_non_exhaustive()
    }
}

impl ConnectionPool {
    pub fn new(config: &ClientConfig) -> Self {
        let read_timeout = Some(config.read_timeout());
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_connect(Some(CONNECT_TIMEOUT))
            .timeout_recv_response(read_timeout)
            .timeout_recv_body(read_timeout)
            .max_idle_connections(config.max_connections)
            .max_idle_connections_per_host(config.max_connections_per_host)
            .build()
            .new_agent();
        Self {
            agent,
            gate: Arc::new(ConnectionGate::new(
                config.max_connections,
                config.max_connections_per_host,
            )),
        }
    }

    pub fn agent(&self) -> &ureq::Agent {
        &self.agent
    }

    pub fn acquire(&self, host: &str) -> ConnectionPermit {
        self.gate.acquire(host)
    }

    pub fn in_flight(&self) -> usize {
        self.gate.in_flight()
    }
}
