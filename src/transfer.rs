//! Transfer descriptors and the asynchronous transport contract.

use std::time::Duration;

use crate::{endpoint::Direction, Error, TransferError};

/// An asynchronous bulk transfer request bound to one endpoint.
///
/// The descriptor owns a fixed-capacity buffer. It is handed to a
/// [`Transport`] on submission and handed back, with `status` and
/// `actual_len` filled in, when it completes. The same descriptor is
/// re-submitted for every chunk of a direction, so no allocation happens
/// after the session starts.
///
/// * For OUT transfers, the first `request_len` bytes of the buffer are sent.
///   `actual_len` is the number of bytes the device accepted.
/// * For IN transfers, up to `request_len` bytes are received into the
///   buffer. `actual_len` is the number of bytes received.
pub struct Transfer {
    endpoint: u8,
    buffer: Vec<u8>,
    request_len: usize,
    actual_len: usize,
    timeout: Duration,
    status: Result<(), TransferError>,
    user_data: usize,
}

impl Transfer {
    /// Allocate a transfer with a zeroed buffer of `capacity` bytes.
    ///
    /// The request length starts out equal to the capacity.
    pub fn new(endpoint: u8, capacity: usize, timeout: Duration) -> Transfer {
        Transfer {
            endpoint,
            buffer: vec![0; capacity],
            request_len: capacity,
            actual_len: 0,
            timeout,
            status: Ok(()),
            user_data: 0,
        }
    }

    /// Endpoint address this transfer is bound to.
    #[inline]
    pub fn endpoint(&self) -> u8 {
        self.endpoint
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        Direction::from_address(self.endpoint)
    }

    /// Per-transfer timeout the transport must enforce.
    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn request_len(&self) -> usize {
        self.request_len
    }

    /// Set the number of bytes to send (OUT) or request (IN).
    ///
    /// ### Panics
    /// * If `len` exceeds the buffer capacity.
    #[inline]
    pub fn set_request_len(&mut self, len: usize) {
        assert!(len <= self.capacity(), "request length exceeds capacity");
        self.request_len = len;
    }

    /// Opaque value carried through submission and completion.
    #[inline]
    pub fn user_data(&self) -> usize {
        self.user_data
    }

    #[inline]
    pub fn set_user_data(&mut self, user_data: usize) {
        self.user_data = user_data;
    }

    /// The requested region of the buffer.
    ///
    /// For an OUT transfer this is the data that is (or was) sent.
    #[inline]
    pub fn request(&self) -> &[u8] {
        &self.buffer[..self.request_len]
    }

    /// Mutable access to the requested region, for transports receiving IN
    /// data and for filling OUT data before submission.
    #[inline]
    pub fn request_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[..self.request_len]
    }

    /// Copy `data` into the buffer and make it the OUT request.
    ///
    /// ### Panics
    /// * If `data` is larger than the buffer capacity.
    pub fn load(&mut self, data: &[u8]) {
        self.set_request_len(data.len());
        self.buffer[..data.len()].copy_from_slice(data);
    }

    /// Bytes actually transferred by the last completion.
    #[inline]
    pub fn actual_len(&self) -> usize {
        self.actual_len
    }

    /// Completed region of the buffer: the bytes actually sent or received.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.actual_len]
    }

    /// Status of the last completion.
    #[inline]
    pub fn status(&self) -> Result<(), TransferError> {
        self.status
    }

    /// Clear completion state before (re-)submitting.
    pub(crate) fn reset(&mut self) {
        self.actual_len = 0;
        self.status = Ok(());
    }

    /// Record the outcome of the transfer. Called by transports.
    ///
    /// `actual_len` is clamped to the request length.
    pub fn set_completion(&mut self, status: Result<(), TransferError>, actual_len: usize) {
        self.status = status;
        self.actual_len = actual_len.min(self.request_len);
    }
}

impl std::fmt::Debug for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transfer")
            .field("endpoint", &format_args!("{:#04x}", self.endpoint))
            .field("request_len", &self.request_len)
            .field("actual_len", &self.actual_len)
            .field("status", &self.status)
            .field("user_data", &self.user_data)
            .finish()
    }
}

/// The asynchronous submit / wait / complete contract of a device transport.
///
/// All methods are called from the single thread driving a session.
pub trait Transport {
    /// Submit a transfer.
    ///
    /// The transport owns the transfer until it is returned from
    /// [`wait_for_completion`][Transport::wait_for_completion]. A transfer
    /// that fails to submit must still be returned from a later
    /// `wait_for_completion` call with its error status, never dropped.
    fn submit(&mut self, transfer: Transfer);

    /// Block until any submitted transfer completes, or `timeout` elapses.
    ///
    /// Returns `Ok(None)` if nothing completed in time. An `Err` means the
    /// wait itself failed, which is fatal to the session; the status of an
    /// individual transfer is reported through [`Transfer::status`] instead.
    fn wait_for_completion(&mut self, timeout: Duration) -> Result<Option<Transfer>, Error>;

    /// Request cancellation of the transfers pending on `endpoint`.
    ///
    /// Cancelled transfers are still returned from `wait_for_completion`,
    /// typically with [`TransferError::Cancelled`].
    fn cancel(&mut self, endpoint: u8);
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn submit(&mut self, transfer: Transfer) {
        (**self).submit(transfer)
    }

    fn wait_for_completion(&mut self, timeout: Duration) -> Result<Option<Transfer>, Error> {
        (**self).wait_for_completion(timeout)
    }

    fn cancel(&mut self, endpoint: u8) {
        (**self).cancel(endpoint)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn submit(&mut self, transfer: Transfer) {
        (**self).submit(transfer)
    }

    fn wait_for_completion(&mut self, timeout: Duration) -> Result<Option<Transfer>, Error> {
        (**self).wait_for_completion(timeout)
    }

    fn cancel(&mut self, endpoint: u8) {
        (**self).cancel(endpoint)
    }
}
