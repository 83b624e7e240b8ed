//! Wrappers for the [usbfs] character device ioctls used by the bulk
//! transport, translated from the [C structures and ioctl definitions][uapi].
//!
//! [usbfs]: https://www.kernel.org/doc/html/latest/driver-api/usb/usb.html#the-usb-character-device-nodes
//! [uapi]: https://github.com/torvalds/linux/blob/master/tools/include/uapi/linux/usbdevice_fs.h
use std::ffi::{c_int, c_uchar, c_uint, c_void};

use rustix::{
    fd::AsFd,
    io,
    ioctl::{self, Ioctl, IoctlOutput, Opcode},
};

/// Opcodes used in ioctl with the usb device fs.
// We repeat the USBDEVFS_ prefix to keep the same names as what linux uses.
#[allow(non_camel_case_types)]
mod opcodes {
    use rustix::ioctl::{self, Opcode};

    use super::{DetachAndClaim, Urb};
    use std::ffi::c_uint;

    pub const USBDEVFS_SUBMITURB: Opcode = ioctl::opcode::read::<Urb>(b'U', 10);
    pub const USBDEVFS_DISCARDURB: Opcode = ioctl::opcode::none(b'U', 11);
    pub const USBDEVFS_REAPURBNDELAY: Opcode = ioctl::opcode::write::<*mut Urb>(b'U', 13);
    pub const USBDEVFS_CLAIMINTERFACE: Opcode = ioctl::opcode::read::<c_uint>(b'U', 15);
    pub const USBDEVFS_RELEASEINTERFACE: Opcode = ioctl::opcode::read::<c_uint>(b'U', 16);
    pub const USBDEVFS_CLEAR_HALT: Opcode = ioctl::opcode::read::<c_uint>(b'U', 21);
    pub const USBDEVFS_DISCONNECT_CLAIM: Opcode = ioctl::opcode::read::<DetachAndClaim>(b'U', 27);
}

pub fn claim_interface<Fd: AsFd>(fd: Fd, interface: u8) -> io::Result<()> {
    unsafe {
        let ctl = ioctl::Setter::<{ opcodes::USBDEVFS_CLAIMINTERFACE }, c_uint>::new(
            interface.into(),
        );
        ioctl::ioctl(fd, ctl)
    }
}

pub fn release_interface<Fd: AsFd>(fd: Fd, interface: u8) -> io::Result<()> {
    unsafe {
        let ctl = ioctl::Setter::<{ opcodes::USBDEVFS_RELEASEINTERFACE }, c_uint>::new(
            interface.into(),
        );
        ioctl::ioctl(fd, ctl)
    }
}

#[repr(C)]
pub struct DetachAndClaim {
    interface: c_uint,
    flags: c_uint,
    driver: [c_uchar; 255 + 1],
}

/// Claim an interface, disconnecting any kernel driver other than usbfs
/// that is bound to it.
pub fn detach_and_claim_interface<Fd: AsFd>(fd: Fd, interface: u8) -> io::Result<()> {
    const USBDEVFS_DISCONNECT_CLAIM_EXCEPT_DRIVER: c_uint = 0x02;
    unsafe {
        let mut dc = DetachAndClaim {
            interface: interface.into(),
            flags: USBDEVFS_DISCONNECT_CLAIM_EXCEPT_DRIVER,
            driver: [0; 256],
        };

        dc.driver[0..6].copy_from_slice(b"usbfs\0");

        let ctl = ioctl::Setter::<{ opcodes::USBDEVFS_DISCONNECT_CLAIM }, DetachAndClaim>::new(dc);

        ioctl::ioctl(&fd, ctl)
    }
}

pub fn clear_halt<Fd: AsFd>(fd: Fd, endpoint: u8) -> io::Result<()> {
    unsafe {
        let ctl =
            ioctl::Setter::<{ opcodes::USBDEVFS_CLEAR_HALT }, c_uint>::new(endpoint.into());
        ioctl::ioctl(fd, ctl)
    }
}

/// Ioctl passing a caller-owned pointer straight to the kernel.
pub struct PassPtr<const OPCODE: Opcode, Input> {
    input: *mut Input,
}

impl<const OPCODE: Opcode, Input> PassPtr<OPCODE, Input> {
    /// Create a new pointer setter-style `ioctl` object.
    ///
    /// # Safety
    ///
    /// - `Opcode` must provide a valid opcode.
    /// - For this opcode, `Input` must be the type that the kernel expects to
    ///   get.
    #[inline]
    pub unsafe fn new(input: *mut Input) -> Self {
        Self { input }
    }
}

unsafe impl<const OPCODE: Opcode, Input> Ioctl for PassPtr<OPCODE, Input> {
    type Output = ();

    const IS_MUTATING: bool = false;

    fn opcode(&self) -> ioctl::Opcode {
        OPCODE
    }

    fn as_ptr(&mut self) -> *mut c_void {
        self.input as *mut c_void
    }

    unsafe fn output_from_ptr(_: IoctlOutput, _: *mut c_void) -> rustix::io::Result<Self::Output> {
        Ok(())
    }
}

/// Submit an URB.
///
/// # Safety
///
/// `urb` and the buffer it points to must stay valid and unmoved until the
/// URB is returned from [`reap_urb_ndelay`] or the fd is closed.
pub unsafe fn submit_urb<Fd: AsFd>(fd: Fd, urb: *mut Urb) -> io::Result<()> {
    unsafe {
        let ctl = PassPtr::<{ opcodes::USBDEVFS_SUBMITURB }, Urb>::new(urb);
        ioctl::ioctl(fd, ctl)
    }
}

/// Take one completed URB without blocking, or fail with `EAGAIN`.
pub fn reap_urb_ndelay<Fd: AsFd>(fd: Fd) -> io::Result<*mut Urb> {
    unsafe {
        let ctl = ioctl::Getter::<{ opcodes::USBDEVFS_REAPURBNDELAY }, *mut Urb>::new();
        ioctl::ioctl(fd, ctl)
    }
}

/// Request cancellation of a submitted URB. It must still be reaped.
///
/// # Safety
///
/// `urb` must be a pointer previously passed to [`submit_urb`] on this fd.
pub unsafe fn discard_urb<Fd: AsFd>(fd: Fd, urb: *mut Urb) -> io::Result<()> {
    unsafe {
        let ctl = PassPtr::<{ opcodes::USBDEVFS_DISCARDURB }, Urb>::new(urb);
        ioctl::ioctl(fd, ctl)
    }
}

pub const USBDEVFS_URB_TYPE_BULK: c_uchar = 3;

#[repr(C)]
#[derive(Debug)]
pub struct Urb {
    pub ep_type: c_uchar,
    pub endpoint: c_uchar,
    pub status: c_int,
    pub flags: c_uint,
    pub buffer: *mut u8,
    pub buffer_length: c_int,
    pub actual_length: c_int,
    pub start_frame: c_int,
    pub number_of_packets_or_stream_id: c_uint, // a union in C
    pub error_count: c_int,
    pub signr: c_uint,
    pub usercontext: *mut c_void,
    // + variable size array of iso_packet_desc, unused for bulk
}
