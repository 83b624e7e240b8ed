use std::fs;
use std::io;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::str::FromStr;

use log::{debug, warn};

use crate::{Error, ErrorKind};

/// A directory under `/sys/bus/usb/devices`.
#[derive(Debug, Clone)]
pub struct SysfsPath(pub(crate) PathBuf);

#[derive(Debug)]
pub struct SysfsError(PathBuf, SysfsErrorKind);

#[derive(Debug)]
enum SysfsErrorKind {
    Io(io::Error),
    Parse(String),
}

impl std::fmt::Display for SysfsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to read sysfs attribute {}: ", self.0.display())?;
        match &self.1 {
            SysfsErrorKind::Io(e) => write!(f, "{e}"),
            SysfsErrorKind::Parse(v) => write!(f, "couldn't parse value {:?}", v.trim()),
        }
    }
}

impl std::error::Error for SysfsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self.1 {
            SysfsErrorKind::Io(ref e) => Some(e),
            _ => None,
        }
    }
}

impl SysfsPath {
    fn parse_attr<T, E>(
        &self,
        attr: &str,
        parse: impl FnOnce(&str) -> Result<T, E>,
    ) -> Result<T, SysfsError> {
        let attr_path = self.0.join(attr);
        fs::read_to_string(&attr_path)
            .map_err(SysfsErrorKind::Io)
            .and_then(|v| parse(v.trim()).map_err(|_| SysfsErrorKind::Parse(v)))
            .map_err(|e| SysfsError(attr_path, e))
    }

    fn read_attr<T: FromStr>(&self, attr: &str) -> Result<T, SysfsError> {
        self.parse_attr(attr, |s| s.parse())
    }

    fn read_attr_hex(&self, attr: &str) -> Result<u16, SysfsError> {
        self.parse_attr(attr, |s| parse_hex(s))
    }
}

fn parse_hex(s: &str) -> Result<u16, ParseIntError> {
    u16::from_str_radix(s.strip_prefix("0x").unwrap_or(s), 16)
}

const SYSFS_USB_PREFIX: &str = "/sys/bus/usb/devices/";

/// Where a device sits on the bus, as needed to open its usbfs node.
#[derive(Debug, Clone)]
pub struct DeviceLocation {
    pub busnum: u8,
    pub devnum: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub path: SysfsPath,
}

/// Device names look like `1-6` or `1-6.4.2`. Root hubs (`usb1`) and
/// interfaces (`1-6:1.0`) are skipped.
fn is_device_name(name: &[u8]) -> bool {
    !name.is_empty()
        && name
            .iter()
            .all(|c| matches!(c, b'0'..=b'9' | b'-' | b'.'))
}

fn probe_device(path: SysfsPath) -> Result<DeviceLocation, SysfsError> {
    debug!("Probing device {:?}", path.0);
    Ok(DeviceLocation {
        busnum: path.read_attr("busnum")?,
        devnum: path.read_attr("devnum")?,
        vendor_id: path.read_attr_hex("idVendor")?,
        product_id: path.read_attr_hex("idProduct")?,
        path,
    })
}

/// List connected USB devices.
pub fn list_devices() -> Result<impl Iterator<Item = DeviceLocation>, Error> {
    let dir = fs::read_dir(SYSFS_USB_PREFIX).map_err(|e| {
        let code = e.raw_os_error().unwrap_or(0) as u32;
        Error::new_os(ErrorKind::Unsupported, "failed to read sysfs", code).log_error()
    })?;

    Ok(dir.flat_map(|entry| {
        let path = entry.ok()?.path();
        if !is_device_name(path.file_name()?.as_encoded_bytes()) {
            return None;
        }

        probe_device(SysfsPath(path))
            .inspect_err(|e| warn!("{e}; ignoring device"))
            .ok()
    }))
}

/// Find the first connected device with the given vendor and product id.
pub fn find_device(vendor_id: u16, product_id: u16) -> Result<DeviceLocation, Error> {
    list_devices()?
        .find(|d| d.vendor_id == vendor_id && d.product_id == product_id)
        .inspect(|d| {
            debug!(
                "Found {vendor_id:04x}:{product_id:04x} at bus {} addr {}",
                d.busnum, d.devnum
            )
        })
        .ok_or_else(|| Error::new(ErrorKind::NotFound, "device not found").log_debug())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_names() {
        assert!(is_device_name(b"1-6"));
        assert!(is_device_name(b"1-6.4.2"));
        assert!(!is_device_name(b"usb1"));
        assert!(!is_device_name(b"1-6:1.0"));
        assert!(!is_device_name(b""));
    }

    #[test]
    fn hex_attrs() {
        assert_eq!(parse_hex("0471"), Ok(0x0471));
        assert_eq!(parse_hex("0x3630"), Ok(0x3630));
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn probe_from_fake_sysfs() {
        let dir = std::env::temp_dir().join(format!("bulkloop-sysfs-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        for (attr, value) in [
            ("busnum", "3\n"),
            ("devnum", "17\n"),
            ("idVendor", "0471\n"),
            ("idProduct", "3630\n"),
        ] {
            fs::write(dir.join(attr), value).unwrap();
        }

        let d = probe_device(SysfsPath(dir.clone())).unwrap();
        assert_eq!((d.busnum, d.devnum), (3, 17));
        assert_eq!((d.vendor_id, d.product_id), (0x0471, 0x3630));

        fs::write(dir.join("devnum"), "x\n").unwrap();
        let err = probe_device(SysfsPath(dir.clone())).unwrap_err();
        assert!(err.to_string().contains("couldn't parse value"));

        fs::remove_dir_all(&dir).unwrap();
    }
}
