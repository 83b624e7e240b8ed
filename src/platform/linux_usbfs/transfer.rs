use std::{
    ffi::{c_int, c_void},
    time::Instant,
};

use rustix::io::Errno;

use crate::{transfer::Transfer, TransferError};

use super::{
    errno_to_transfer_error,
    usbfs::{Urb, USBDEVFS_URB_TYPE_BULK},
};

/// A transfer owned by the kernel.
///
/// Holds the URB allocation out-of-line so its address stays fixed while
/// the record itself moves around inside the pending slab. The URB's buffer
/// points into the heap allocation of `transfer`, which is likewise stable.
pub(super) struct UrbTransfer {
    urb: Box<Urb>,
    transfer: Transfer,
    pub(super) deadline: Instant,
    pub(super) timed_out: bool,
}

impl UrbTransfer {
    /// Bind a URB to `transfer`'s buffer.
    ///
    /// A transfer too long for a URB is handed back completed with
    /// [`TransferError::InvalidArgument`].
    pub(super) fn new(mut transfer: Transfer, key: usize) -> Result<UrbTransfer, Transfer> {
        let Ok(buffer_length) = c_int::try_from(transfer.request_len()) else {
            transfer.set_completion(Err(TransferError::InvalidArgument), 0);
            return Err(transfer);
        };

        let urb = Box::new(Urb {
            ep_type: USBDEVFS_URB_TYPE_BULK,
            endpoint: transfer.endpoint(),
            status: 0,
            flags: 0,
            buffer: transfer.request_mut().as_mut_ptr(),
            buffer_length,
            actual_length: 0,
            start_frame: 0,
            number_of_packets_or_stream_id: 0,
            error_count: 0,
            signr: 0,
            usercontext: key as *mut c_void,
        });

        Ok(UrbTransfer {
            urb,
            deadline: Instant::now() + transfer.timeout(),
            timed_out: false,
            transfer,
        })
    }

    #[inline]
    pub(super) fn endpoint(&self) -> u8 {
        self.urb.endpoint
    }

    #[inline]
    pub(super) fn urb_ptr(&mut self) -> *mut Urb {
        &mut *self.urb
    }

    fn status(&self) -> Result<(), TransferError> {
        if self.urb.status == 0 {
            return Ok(());
        }

        // It's sometimes positive, sometimes negative, but rustix panics if negative.
        let errno = Errno::from_raw_os_error(self.urb.status.abs());

        // We discarded it ourselves when the deadline passed.
        if self.timed_out && matches!(errno, Errno::NOENT | Errno::CONNRESET) {
            return Err(TransferError::Timeout);
        }

        Err(errno_to_transfer_error(errno))
    }

    /// Give back the transfer with its completion recorded.
    ///
    /// Only call after the kernel returned this URB from a reap, or when it
    /// was never submitted.
    pub(super) fn into_completed(self) -> Transfer {
        let status = self.status();
        let actual_len = self.urb.actual_length.max(0) as usize;
        let mut transfer = self.transfer;
        transfer.set_completion(status, actual_len);
        transfer
    }

    /// Give back a transfer that the kernel refused to accept.
    pub(super) fn into_failed(self, errno: Errno) -> Transfer {
        let mut transfer = self.transfer;
        transfer.set_completion(Err(errno_to_transfer_error(errno)), 0);
        transfer
    }
}

impl std::fmt::Debug for UrbTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrbTransfer")
            .field("urb", &(&*self.urb as *const Urb))
            .field("endpoint", &format_args!("{:#04x}", self.urb.endpoint))
            .field("status", &self.urb.status)
            .field("actual_length", &self.urb.actual_length)
            .field("timed_out", &self.timed_out)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn urb_points_into_transfer_buffer() {
        let mut t = Transfer::new(0x01, 8, Duration::from_secs(1));
        t.load(&[1, 2, 3, 4]);
        let mut u = UrbTransfer::new(t, 7).unwrap();

        let urb = unsafe { &*u.urb_ptr() };
        assert_eq!(urb.endpoint, 0x01);
        assert_eq!(urb.buffer_length, 4);
        assert_eq!(urb.usercontext as usize, 7);
        assert_eq!(urb.ep_type, USBDEVFS_URB_TYPE_BULK);
        assert!(!urb.buffer.is_null());
    }

    #[test]
    fn completion_status() {
        let t = Transfer::new(0x82, 8, Duration::from_secs(1));
        let mut u = UrbTransfer::new(t, 0).unwrap();
        u.urb.status = 0;
        u.urb.actual_length = 8;
        let t = u.into_completed();
        assert_eq!(t.status(), Ok(()));
        assert_eq!(t.actual_len(), 8);

        let mut u = UrbTransfer::new(t, 0).unwrap();
        u.urb.status = -(Errno::PIPE.raw_os_error());
        assert_eq!(u.into_completed().status(), Err(TransferError::Stall));

        let t = Transfer::new(0x82, 8, Duration::from_secs(1));
        let mut u = UrbTransfer::new(t, 0).unwrap();
        u.urb.status = -(Errno::NOENT.raw_os_error());
        u.urb.actual_length = 3;
        u.timed_out = true;
        let t = u.into_completed();
        assert_eq!(t.status(), Err(TransferError::Timeout));
        assert_eq!(t.actual_len(), 3);
    }
}
