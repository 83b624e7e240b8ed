//! In-process loopback device.
//!
//! [`SimTransport`] implements [`Transport`] without hardware: every OUT
//! transfer completes immediately and its data becomes available to the IN
//! endpoint on the following wait. Faults can be injected per chunk to
//! exercise the failure paths of a session deterministically.

use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use log::debug;

use crate::{
    endpoint::Direction,
    transfer::{Transfer, Transport},
    Error, ErrorKind, TransferError,
};

struct Pending {
    transfer: Transfer,
    cancelled: bool,
}

/// Data queued for the IN endpoint. `None` stands in for an echo the device
/// lost, so the IN transfer for that chunk times out.
struct Echo {
    data: Option<Vec<u8>>,
    ready_at: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Stats {
    submitted: usize,
    completed: usize,
    cancelled: usize,
    max_in_flight: usize,
}

/// Simulated loopback transport.
///
/// Chunk indices used by the fault builders count transfers per direction in
/// the order the simulated device processes them, starting at zero.
#[derive(Default)]
pub struct SimTransport {
    cycle: u64,
    pending: VecDeque<Pending>,
    echo: VecDeque<Echo>,
    out_seen: usize,
    in_seen: usize,

    out_faults: HashMap<usize, TransferError>,
    in_faults: HashMap<usize, TransferError>,
    short_in: HashMap<usize, usize>,
    dropped: Vec<usize>,
    flips: Vec<(usize, usize, u8)>,
    fatal_at: Option<u64>,
    hold_cancelled: bool,

    stats: HashMap<u8, Stats>,
}

impl SimTransport {
    /// A device that echoes every OUT chunk verbatim.
    pub fn loopback() -> SimTransport {
        SimTransport::default()
    }

    /// Complete OUT chunk `chunk` with `error` instead of sending it.
    pub fn fail_out(mut self, chunk: usize, error: TransferError) -> Self {
        self.out_faults.insert(chunk, error);
        self
    }

    /// Complete IN chunk `chunk` with `error` without receiving anything.
    pub fn fail_in(mut self, chunk: usize, error: TransferError) -> Self {
        self.in_faults.insert(chunk, error);
        self
    }

    /// Deliver only `len` bytes for IN chunk `chunk`, with a success status.
    pub fn short_in(mut self, chunk: usize, len: usize) -> Self {
        self.short_in.insert(chunk, len);
        self
    }

    /// Accept OUT chunk `chunk` but never echo it. The IN transfer for the
    /// same chunk completes with [`TransferError::Timeout`] when the echo
    /// would have arrived.
    pub fn drop_echo(mut self, chunk: usize) -> Self {
        self.dropped.push(chunk);
        self
    }

    /// Flip bit `bit` of byte `byte` in the echo of OUT chunk `chunk`.
    pub fn flip_bit(mut self, chunk: usize, byte: usize, bit: u8) -> Self {
        self.flips.push((chunk, byte, bit));
        self
    }

    /// Fail the `cycle`-th call to `wait_for_completion` (counting from 1).
    pub fn fatal_at(mut self, cycle: u64) -> Self {
        self.fatal_at = Some(cycle);
        self
    }

    /// Never return a transfer once it has been cancelled, like a device
    /// that stopped responding.
    pub fn hold_cancelled(mut self) -> Self {
        self.hold_cancelled = true;
        self
    }

    /// Number of `wait_for_completion` calls so far.
    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    /// Transfers submitted on `ep`.
    pub fn submissions(&self, ep: u8) -> usize {
        self.stats(ep).submitted
    }

    /// Transfers on `ep` returned with a status other than cancelled.
    pub fn completions(&self, ep: u8) -> usize {
        self.stats(ep).completed
    }

    /// Transfers on `ep` returned as cancelled.
    pub fn cancelled(&self, ep: u8) -> usize {
        self.stats(ep).cancelled
    }

    /// Largest number of transfers simultaneously pending on `ep`.
    pub fn max_in_flight(&self, ep: u8) -> usize {
        self.stats(ep).max_in_flight
    }

    /// Transfers currently pending.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn stats(&self, ep: u8) -> Stats {
        self.stats.get(&ep).copied().unwrap_or_default()
    }

    fn is_ready(&self, p: &Pending) -> bool {
        match p.transfer.direction() {
            Direction::Out => true,
            Direction::In => {
                self.in_faults.contains_key(&self.in_seen)
                    || self.echo.front().is_some_and(|e| e.ready_at <= self.cycle)
            }
        }
    }

    /// An IN transfer can only ever complete if data is queued or an OUT
    /// transfer is still pending to produce some.
    fn is_starved(&self) -> bool {
        self.echo.is_empty()
            && !self
                .pending
                .iter()
                .any(|p| p.transfer.direction() == Direction::Out)
    }

    fn complete_out(&mut self, t: &mut Transfer) {
        let chunk = self.out_seen;
        self.out_seen += 1;

        if let Some(&e) = self.out_faults.get(&chunk) {
            debug!("sim: failing OUT chunk {chunk} with {e:?}");
            t.set_completion(Err(e), 0);
            return;
        }

        let data = if self.dropped.contains(&chunk) {
            debug!("sim: dropping echo of OUT chunk {chunk}");
            None
        } else {
            let mut data = t.request().to_vec();
            for &(_, byte, bit) in self.flips.iter().filter(|f| f.0 == chunk) {
                if let Some(b) = data.get_mut(byte) {
                    *b ^= 1 << bit;
                }
            }
            Some(data)
        };
        self.echo.push_back(Echo {
            data,
            ready_at: self.cycle + 1,
        });

        t.set_completion(Ok(()), t.request_len());
    }

    fn complete_in(&mut self, t: &mut Transfer) {
        let chunk = self.in_seen;
        self.in_seen += 1;

        if let Some(&e) = self.in_faults.get(&chunk) {
            debug!("sim: failing IN chunk {chunk} with {e:?}");
            t.set_completion(Err(e), 0);
            return;
        }

        let Some(data) = self.echo.pop_front().and_then(|e| e.data) else {
            t.set_completion(Err(TransferError::Timeout), 0);
            return;
        };
        let mut len = data.len().min(t.request_len());
        if let Some(&short) = self.short_in.get(&chunk) {
            len = len.min(short);
        }
        t.request_mut()[..len].copy_from_slice(&data[..len]);
        t.set_completion(Ok(()), len);
    }

    fn finish(&mut self, mut p: Pending) -> Transfer {
        let ep = p.transfer.endpoint();
        if p.cancelled {
            p.transfer.set_completion(Err(TransferError::Cancelled), 0);
            self.stats.entry(ep).or_default().cancelled += 1;
        } else {
            match p.transfer.direction() {
                Direction::Out => self.complete_out(&mut p.transfer),
                Direction::In => self.complete_in(&mut p.transfer),
            }
            self.stats.entry(ep).or_default().completed += 1;
        }
        debug!("sim: cycle {} completed {:?}", self.cycle, p.transfer);
        p.transfer
    }
}

impl Transport for SimTransport {
    fn submit(&mut self, transfer: Transfer) {
        let ep = transfer.endpoint();
        self.pending.push_back(Pending {
            transfer,
            cancelled: false,
        });

        let in_flight = self
            .pending
            .iter()
            .filter(|p| p.transfer.endpoint() == ep)
            .count();
        let stats = self.stats.entry(ep).or_default();
        stats.submitted += 1;
        stats.max_in_flight = stats.max_in_flight.max(in_flight);
    }

    fn wait_for_completion(&mut self, _timeout: Duration) -> Result<Option<Transfer>, Error> {
        self.cycle += 1;
        if self.fatal_at == Some(self.cycle) {
            return Err(Error::new(ErrorKind::Other, "simulated transport failure").log_debug());
        }

        let pos = self
            .pending
            .iter()
            .position(|p| p.cancelled && !self.hold_cancelled)
            .or_else(|| {
                self.pending
                    .iter()
                    .position(|p| !p.cancelled && self.is_ready(p))
            })
            .or_else(|| {
                // Nothing will ever arrive; let the IN transfer time out.
                if !self.is_starved() {
                    return None;
                }
                self.pending
                    .iter()
                    .position(|p| !p.cancelled && p.transfer.direction() == Direction::In)
            });

        Ok(pos
            .and_then(|pos| self.pending.remove(pos))
            .map(|p| self.finish(p)))
    }

    fn cancel(&mut self, endpoint: u8) {
        for p in self.pending.iter_mut() {
            if p.transfer.endpoint() == endpoint {
                p.cancelled = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wait(sim: &mut SimTransport) -> Transfer {
        sim.wait_for_completion(Duration::from_secs(1))
            .unwrap()
            .expect("a completion")
    }

    #[test]
    fn echo_arrives_next_cycle() {
        let mut sim = SimTransport::loopback();
        let mut out = Transfer::new(0x01, 4, Duration::from_secs(1));
        out.load(&[1, 2, 3, 4]);
        sim.submit(Transfer::new(0x82, 4, Duration::from_secs(1)));
        sim.submit(out);

        let t = wait(&mut sim);
        assert_eq!(t.endpoint(), 0x01);
        assert_eq!(t.actual_len(), 4);

        let t = wait(&mut sim);
        assert_eq!(t.endpoint(), 0x82);
        assert_eq!(t.data(), &[1, 2, 3, 4]);
        assert_eq!(sim.cycles(), 2);
    }

    #[test]
    fn starved_in_times_out() {
        let mut sim = SimTransport::loopback();
        sim.submit(Transfer::new(0x82, 4, Duration::from_secs(1)));
        let t = wait(&mut sim);
        assert_eq!(t.status(), Err(TransferError::Timeout));
        assert_eq!(t.actual_len(), 0);
    }

    #[test]
    fn dropped_echo_times_out_its_own_in_chunk() {
        let mut sim = SimTransport::loopback().drop_echo(0);
        let mut out = Transfer::new(0x01, 4, Duration::from_secs(1));
        sim.submit(Transfer::new(0x82, 4, Duration::from_secs(1)));
        sim.submit(Transfer::new(0x01, 4, Duration::from_secs(1)));
        assert_eq!(wait(&mut sim).status(), Ok(()));
        out.load(&[5, 6, 7, 8]);
        sim.submit(out);

        // The next OUT chunk is echoed, but IN chunk 0 must not take it.
        assert_eq!(wait(&mut sim).status(), Err(TransferError::Timeout));
        assert_eq!(wait(&mut sim).endpoint(), 0x01);

        sim.submit(Transfer::new(0x82, 4, Duration::from_secs(1)));
        let t = wait(&mut sim);
        assert_eq!(t.status(), Ok(()));
        assert_eq!(t.data(), &[5, 6, 7, 8]);
    }

    #[test]
    fn held_cancellation_is_never_returned() {
        let mut sim = SimTransport::loopback().hold_cancelled();
        sim.submit(Transfer::new(0x82, 4, Duration::from_secs(1)));
        sim.cancel(0x82);
        assert!(sim
            .wait_for_completion(Duration::from_secs(1))
            .unwrap()
            .is_none());
        assert_eq!(sim.pending(), 1);
        assert_eq!(sim.cancelled(0x82), 0);
    }

    #[test]
    fn cancel_returns_transfer() {
        let mut sim = SimTransport::loopback();
        sim.submit(Transfer::new(0x01, 4, Duration::from_secs(1)));
        sim.cancel(0x01);
        let t = wait(&mut sim);
        assert_eq!(t.status(), Err(TransferError::Cancelled));
        assert_eq!(sim.cancelled(0x01), 1);
        assert_eq!(sim.completions(0x01), 0);
        assert!(sim
            .wait_for_completion(Duration::from_secs(1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn fatal_once() {
        let mut sim = SimTransport::loopback().fatal_at(1);
        sim.submit(Transfer::new(0x01, 4, Duration::from_secs(1)));
        assert!(sim.wait_for_completion(Duration::from_secs(1)).is_err());
        assert_eq!(wait(&mut sim).endpoint(), 0x01);
    }
}
