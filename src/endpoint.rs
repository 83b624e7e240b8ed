use std::fmt::Debug;

/// Transfer direction, from the host's point of view.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Host to device.
    Out = 0,

    /// Device to host.
    In = 1,
}

impl Direction {
    /// Get the direction from the top bit of a USB endpoint address.
    pub const fn from_address(addr: u8) -> Direction {
        match addr & 0x80 {
            0 => Self::Out,
            _ => Self::In,
        }
    }

    pub(crate) const fn label(self) -> &'static str {
        match self {
            Direction::Out => "OUT",
            Direction::In => "IN",
        }
    }
}

/// A bulk endpoint taking part in the loopback.
///
/// Fixed for the lifetime of a session: the address determines the direction,
/// and the maximum packet size is the chunk size used for every transfer.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Endpoint {
    address: u8,
    max_packet_size: usize,
}

impl Endpoint {
    /// Describe an endpoint by its address and maximum packet size.
    pub const fn new(address: u8, max_packet_size: usize) -> Endpoint {
        Endpoint {
            address,
            max_packet_size,
        }
    }

    /// Endpoint address, including the direction bit.
    pub const fn address(&self) -> u8 {
        self.address
    }

    /// Direction of the endpoint.
    pub const fn direction(&self) -> Direction {
        Direction::from_address(self.address)
    }

    /// Maximum packet size, which is also the size of one chunk.
    pub const fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }
}

impl Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("address", &format_args!("{:#04x}", self.address))
            .field("direction", &self.direction())
            .field("max_packet_size", &self.max_packet_size)
            .finish()
    }
}

/// Bitset capable of storing endpoint addresses 0x00..=0x0f and 0x80..=0x8f
///
/// Used to track which endpoints currently have a transfer outstanding.
#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub struct EndpointBitSet(u32);

impl EndpointBitSet {
    fn mask(ep: u8) -> u32 {
        let bit = ((ep & 0x0f) << 1) | (ep >> 7);
        1 << bit
    }

    pub fn is_set(&self, ep: u8) -> bool {
        self.0 & Self::mask(ep) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn set(&mut self, ep: u8) {
        self.0 |= Self::mask(ep)
    }

    pub fn clear(&mut self, ep: u8) {
        self.0 &= !Self::mask(ep)
    }

    /// Iterate over the endpoint addresses in the set.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..32u8)
            .filter(|bit| self.0 & (1 << bit) != 0)
            .map(|bit| (bit >> 1) | ((bit & 1) << 7))
    }
}

impl Debug for EndpointBitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set()
            .entries(self.iter().map(|ep| format!("{ep:#04x}")))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_from_address() {
        assert_eq!(Direction::from_address(0x01), Direction::Out);
        assert_eq!(Direction::from_address(0x82), Direction::In);
        assert_eq!(Endpoint::new(0x82, 64).direction(), Direction::In);
    }

    #[test]
    fn bitset() {
        let mut set = EndpointBitSet::default();
        assert!(set.is_empty());

        set.set(0x01);
        set.set(0x82);
        assert!(set.is_set(0x01));
        assert!(set.is_set(0x82));
        assert!(!set.is_set(0x81));
        assert!(!set.is_set(0x02));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0x01, 0x82]);

        set.clear(0x01);
        assert!(!set.is_set(0x01));
        set.clear(0x82);
        assert!(set.is_empty());
    }
}
