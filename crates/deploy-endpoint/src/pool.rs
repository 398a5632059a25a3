//! Bounded SFTP channel pool
//!
//! The remote driver multiplexes N concurrent SFTP channels over one
//! authenticated SSH session. Channels are leased through this pool;
//! acquisition blocks until a channel is free and waiters are served in
//! FIFO order. Shell execution never goes through the pool.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::{Condvar, Mutex};

use ssh2::Sftp;
use tracing::debug;

struct PoolState {
    channels: VecDeque<Sftp>,
    /// Ticket queue preserving arrival order of waiters
    waiters: VecDeque<u64>,
    next_ticket: u64,
}

/// Fixed-size pool of SFTP channels over a shared session.
pub struct SftpPool {
    state: Mutex<PoolState>,
    available: Condvar,
}

impl SftpPool {
    /// Build a pool from pre-opened channels.
    pub fn new(channels: Vec<Sftp>) -> Self {
        debug!("SFTP pool initialized with {} channel(s)", channels.len());
        Self {
            state: Mutex::new(PoolState {
                channels: channels.into(),
                waiters: VecDeque::new(),
                next_ticket: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Lease a channel, blocking until one is free.
    pub fn lease(&self) -> SftpLease<'_> {
        let mut state = self.state.lock().expect("sftp pool poisoned");
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.waiters.push_back(ticket);

        loop {
            let my_turn = state.waiters.front() == Some(&ticket);
            if my_turn {
                if let Some(sftp) = state.channels.pop_front() {
                    state.waiters.pop_front();
                    // Let the next waiter re-check once we are done here
                    self.available.notify_all();
                    return SftpLease {
                        pool: self,
                        sftp: Some(sftp),
                    };
                }
            }
            state = self.available.wait(state).expect("sftp pool poisoned");
        }
    }

    fn release(&self, sftp: Sftp) {
        let mut state = self.state.lock().expect("sftp pool poisoned");
        state.channels.push_back(sftp);
        drop(state);
        self.available.notify_all();
    }
}

/// A leased SFTP channel; returns to the pool on drop.
pub struct SftpLease<'a> {
    pool: &'a SftpPool,
    sftp: Option<Sftp>,
}

impl Deref for SftpLease<'_> {
    type Target = Sftp;

    fn deref(&self) -> &Sftp {
        self.sftp.as_ref().expect("lease already released")
    }
}

impl Drop for SftpLease<'_> {
    fn drop(&mut self) {
        if let Some(sftp) = self.sftp.take() {
            self.pool.release(sftp);
        }
    }
}
