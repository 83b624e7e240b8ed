use std::{
    collections::VecDeque,
    path::PathBuf,
    time::{Duration, Instant},
};

use log::{debug, error, warn};
use rustix::{
    event::{poll, PollFd, PollFlags},
    fd::OwnedFd,
    fs::{Mode, OFlags},
    io::{retry_on_intr, Errno},
    time::Timespec,
};
use slab::Slab;

use super::{enumeration, errno_to_error, transfer::UrbTransfer, usbfs};
use crate::{
    transfer::{Transfer, Transport},
    Error,
};

/// Bulk transport over a Linux usbfs device node.
///
/// Transfers are submitted as URBs and completions are collected with
/// `poll(2)` and `USBDEVFS_REAPURBNDELAY` on the calling thread. usbfs has no
/// per-URB timeout, so each URB carries a deadline and is discarded once it
/// passes; its completion is then reported as
/// [`TransferError::Timeout`][crate::TransferError::Timeout].
pub struct UsbfsTransport {
    fd: OwnedFd,
    interface: Option<u8>,

    /// URBs owned by the kernel, keyed by the value in their `usercontext`.
    pending: Slab<UrbTransfer>,

    /// Transfers that failed to submit, completed in place.
    rejected: VecDeque<Transfer>,
}

impl UsbfsTransport {
    /// Open the device node `/dev/bus/usb/BBB/DDD`.
    pub fn open(busnum: u8, devnum: u8) -> Result<UsbfsTransport, Error> {
        let path = PathBuf::from(format!("/dev/bus/usb/{busnum:03}/{devnum:03}"));
        debug!("Opening usbfs device {}", path.display());
        let fd = rustix::fs::open(&path, OFlags::RDWR | OFlags::CLOEXEC, Mode::empty())
            .map_err(|e| errno_to_error(e, "failed to open device").log_error())?;

        debug!("Opened device bus={busnum} addr={devnum}");
        Ok(UsbfsTransport {
            fd,
            interface: None,
            pending: Slab::new(),
            rejected: VecDeque::new(),
        })
    }

    /// Open the first connected device with the given vendor and product id.
    pub fn open_by_id(vendor_id: u16, product_id: u16) -> Result<UsbfsTransport, Error> {
        let location = enumeration::find_device(vendor_id, product_id)?;
        Self::open(location.busnum, location.devnum)
    }

    /// Claim an interface for exclusive use.
    ///
    /// With `detach`, a kernel driver bound to the interface is disconnected
    /// first. The interface is released when the transport is dropped.
    pub fn claim_interface(&mut self, interface: u8, detach: bool) -> Result<(), Error> {
        let res = if detach {
            usbfs::detach_and_claim_interface(&self.fd, interface)
        } else {
            usbfs::claim_interface(&self.fd, interface)
        };
        res.map_err(|e| errno_to_error(e, "failed to claim interface").log_error())?;

        debug!("Claimed interface {interface}");
        self.interface = Some(interface);
        Ok(())
    }

    /// Clear a halt / stall condition on an endpoint and reset its data
    /// toggle. Must not be called while transfers are pending on it.
    pub fn clear_halt(&mut self, endpoint: u8) -> Result<(), Error> {
        usbfs::clear_halt(&self.fd, endpoint)
            .map_err(|e| errno_to_error(e, "failed to clear halt").log_error())?;
        debug!("Cleared halt on ep {endpoint:#04x}");
        Ok(())
    }

    fn discard(&mut self, key: usize) {
        let urb = self.pending[key].urb_ptr();
        // SAFETY: the URB was submitted on this fd and has not been reaped.
        if let Err(e) = unsafe { usbfs::discard_urb(&self.fd, urb) } {
            // EINVAL when it already completed and is waiting to be reaped.
            debug!("Failed to discard URB {urb:?}: {e}");
        }
    }

    /// Discard URBs whose deadline has passed.
    fn expire(&mut self, now: Instant) {
        let expired: Vec<usize> = self
            .pending
            .iter()
            .filter(|(_, u)| !u.timed_out && u.deadline <= now)
            .map(|(key, _)| key)
            .collect();

        for key in expired {
            debug!(
                "URB on ep {:#04x} passed its deadline, discarding",
                self.pending[key].endpoint()
            );
            self.pending[key].timed_out = true;
            self.discard(key);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .iter()
            .filter(|(_, u)| !u.timed_out)
            .map(|(_, u)| u.deadline)
            .min()
    }

    /// Reap one completed URB if any is ready.
    fn reap(&mut self) -> Result<Option<Transfer>, Error> {
        loop {
            match usbfs::reap_urb_ndelay(&self.fd) {
                Ok(urb_ptr) => {
                    let key = {
                        // SAFETY: the kernel returns pointers we submitted.
                        let urb = unsafe { &*urb_ptr };
                        debug!(
                            "URB {:?} for ep {:x} completed, status={} actual_length={}",
                            urb_ptr, urb.endpoint, urb.status, urb.actual_length
                        );
                        urb.usercontext as usize
                    };

                    if !self.pending.contains(key) {
                        error!("Reaped URB {urb_ptr:?} that is not pending");
                        continue;
                    }
                    return Ok(Some(self.pending.remove(key).into_completed()));
                }
                Err(Errno::AGAIN) => return Ok(None),
                Err(Errno::NODEV) => {
                    return Err(errno_to_error(Errno::NODEV, "device disconnected").log_debug())
                }
                Err(e) => {
                    return Err(errno_to_error(e, "failed to reap URB").log_error());
                }
            }
        }
    }

    /// Block until the fd signals a completion, an error, or `timeout`.
    fn poll(&self, timeout: Duration) -> Result<(), Error> {
        let timeout = Timespec {
            tv_sec: timeout.as_secs() as _,
            tv_nsec: timeout.subsec_nanos() as _,
        };
        let mut fds = [PollFd::new(&self.fd, PollFlags::OUT)];
        retry_on_intr(|| poll(&mut fds, Some(&timeout)))
            .map_err(|e| errno_to_error(e, "failed to poll device").log_error())?;
        Ok(())
    }
}

impl Transport for UsbfsTransport {
    fn submit(&mut self, transfer: Transfer) {
        let ep = transfer.endpoint();
        let entry = self.pending.vacant_entry();
        let key = entry.key();
        let urb = match UrbTransfer::new(transfer, key) {
            Ok(u) => entry.insert(u).urb_ptr(),
            Err(transfer) => {
                debug!("Transfer on ep {ep:#04x} too long for an URB");
                self.rejected.push_back(transfer);
                return;
            }
        };

        // SAFETY: the URB and its buffer are owned by `pending[key]`, whose
        // heap allocations do not move until it is removed after reaping.
        if let Err(e) = unsafe { usbfs::submit_urb(&self.fd, urb) } {
            debug!("Failed to submit URB {urb:?} on ep {ep:#04x}: {e}");
            // Not submitted, so we still own it and complete it in place.
            let transfer = self.pending.remove(key).into_failed(e);
            self.rejected.push_back(transfer);
        } else {
            debug!("Submitted URB {urb:?} on ep {ep:#04x}");
        }
    }

    fn wait_for_completion(&mut self, timeout: Duration) -> Result<Option<Transfer>, Error> {
        if let Some(transfer) = self.rejected.pop_front() {
            return Ok(Some(transfer));
        }

        let give_up = Instant::now() + timeout;
        loop {
            self.expire(Instant::now());

            if let Some(transfer) = self.reap()? {
                return Ok(Some(transfer));
            }

            let now = Instant::now();
            if self.pending.is_empty() || now >= give_up {
                return Ok(None);
            }

            let wake = self.next_deadline().map_or(give_up, |d| d.min(give_up));
            self.poll(wake.saturating_duration_since(now))?;
        }
    }

    fn cancel(&mut self, endpoint: u8) {
        let keys: Vec<usize> = self
            .pending
            .iter()
            .filter(|(_, u)| u.endpoint() == endpoint)
            .map(|(key, _)| key)
            .collect();
        for key in keys {
            self.discard(key);
        }
    }
}

impl Drop for UsbfsTransport {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            debug!("Discarding {} pending URBs", self.pending.len());
            let keys: Vec<usize> = self.pending.iter().map(|(key, _)| key).collect();
            for key in keys {
                self.discard(key);
            }

            let deadline = Instant::now() + Duration::from_millis(500);
            while !self.pending.is_empty() && Instant::now() < deadline {
                match self.reap() {
                    Ok(Some(t)) => debug!("Reaped {t:?} on close"),
                    Ok(None) => {
                        let _ = self.poll(Duration::from_millis(10));
                    }
                    Err(_) => break,
                }
            }

            // usbfs copies data to userspace at reap time, so URBs still
            // pending here are freed by the kernel when the fd closes.
            if !self.pending.is_empty() {
                warn!("Closing device with {} URBs not reaped", self.pending.len());
            }
        }

        if let Some(interface) = self.interface {
            let res = usbfs::release_interface(&self.fd, interface);
            debug!("Released interface {interface}: {res:?}");
        }
    }
}

impl std::fmt::Debug for UsbfsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbfsTransport")
            .field("fd", &self.fd)
            .field("interface", &self.interface)
            .field("pending", &self.pending.len())
            .finish()
    }
}

