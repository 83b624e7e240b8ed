mod transfer;
mod usbfs;

mod enumeration;
pub use enumeration::{find_device, list_devices, DeviceLocation, SysfsError, SysfsPath};

mod device;
pub use device::UsbfsTransport;

use rustix::io::Errno;

use crate::{Error, ErrorKind, TransferError};

pub(crate) fn errno_to_error(errno: Errno, message: &'static str) -> Error {
    let kind = match errno {
        Errno::NODEV | Errno::SHUTDOWN => ErrorKind::Disconnected,
        Errno::BUSY => ErrorKind::Busy,
        Errno::ACCESS | Errno::PERM => ErrorKind::PermissionDenied,
        Errno::NOENT => ErrorKind::NotFound,
        Errno::INVAL => ErrorKind::InvalidArgument,
        _ => ErrorKind::Other,
    };
    Error::new_os(kind, message, errno.raw_os_error() as u32)
}

fn errno_to_transfer_error(e: Errno) -> TransferError {
    match e {
        Errno::NODEV | Errno::SHUTDOWN => TransferError::Disconnected,
        Errno::PIPE => TransferError::Stall,
        Errno::NOENT | Errno::CONNRESET => TransferError::Cancelled,
        Errno::TIMEDOUT => TransferError::Timeout,
        Errno::PROTO | Errno::ILSEQ | Errno::OVERFLOW | Errno::COMM | Errno::TIME => {
            TransferError::Fault
        }
        Errno::INVAL => TransferError::InvalidArgument,
        _ => TransferError::Unknown(e.raw_os_error() as u32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(errno_to_transfer_error(Errno::PIPE), TransferError::Stall);
        assert_eq!(
            errno_to_transfer_error(Errno::NODEV),
            TransferError::Disconnected
        );
        assert_eq!(
            errno_to_transfer_error(Errno::IO),
            TransferError::Unknown(Errno::IO.raw_os_error() as u32)
        );

        let e = errno_to_error(Errno::BUSY, "failed to claim interface");
        assert_eq!(e.kind(), ErrorKind::Busy);
        assert_eq!(e.os_error(), Some(Errno::BUSY.raw_os_error() as u32));
    }
}
