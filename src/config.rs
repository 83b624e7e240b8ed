use std::{fmt::Display, str::FromStr, time::Duration};

use crate::{
    endpoint::{Direction, Endpoint},
    ConfigError,
};

/// Largest chunk a single transfer can carry. usbfs takes the URB length as
/// a C `int`.
pub const MAX_CHUNK_SIZE: usize = i32::MAX as usize;

/// Parameters of a loopback session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackConfig {
    /// Address of the bulk OUT endpoint.
    pub out_endpoint: u8,

    /// Address of the bulk IN endpoint.
    pub in_endpoint: u8,

    /// Endpoint maximum packet size; every transfer moves exactly one chunk
    /// of this size.
    pub chunk_size: usize,

    /// Bytes to send (and expect back). Must be a positive multiple of
    /// `chunk_size`.
    pub total_bytes: usize,

    /// Timeout of each individual transfer.
    pub timeout: Duration,

    /// How long to wait for cancelled transfers to be returned on shutdown.
    pub cancel_grace: Duration,

    /// Upper bound on a single wait for completion. Reaching it is not an
    /// error; the dispatcher simply waits again.
    pub poll_interval: Duration,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        LoopbackConfig {
            out_endpoint: 0x01,
            in_endpoint: 0x82,
            chunk_size: 64,
            total_bytes: 1024 * 768 * 3,
            timeout: Duration::from_secs(10),
            cancel_grace: Duration::from_secs(1),
            poll_interval: Duration::from_secs(60),
        }
    }
}

impl LoopbackConfig {
    /// Check the parameters and return the number of chunks per direction.
    pub fn validate(&self) -> Result<usize, ConfigError> {
        if Direction::from_address(self.out_endpoint) != Direction::Out {
            return Err(ConfigError::WrongDirection(self.out_endpoint));
        }
        if Direction::from_address(self.in_endpoint) != Direction::In {
            return Err(ConfigError::WrongDirection(self.in_endpoint));
        }
        for ep in [self.out_endpoint, self.in_endpoint] {
            if ep & 0x0f == 0 {
                return Err(ConfigError::ControlEndpoint(ep));
            }
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::ChunkTooLarge {
                chunk_size: self.chunk_size,
                max: MAX_CHUNK_SIZE,
            });
        }
        if self.total_bytes == 0 {
            return Err(ConfigError::ZeroLength);
        }
        if self.total_bytes % self.chunk_size != 0 {
            return Err(ConfigError::NotMultiple {
                total: self.total_bytes,
                chunk_size: self.chunk_size,
            });
        }
        Ok(self.total_bytes / self.chunk_size)
    }

    pub fn out_endpoint(&self) -> Endpoint {
        Endpoint::new(self.out_endpoint, self.chunk_size)
    }

    pub fn in_endpoint(&self) -> Endpoint {
        Endpoint::new(self.in_endpoint, self.chunk_size)
    }
}

/// Data pattern written to the OUT endpoint.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Byte `i` is `i mod 256`.
    Incrementing,

    /// All bytes `0x00`.
    Zeros,

    /// All bytes `0xff`.
    Ones,

    /// Xorshift64 pseudo-random stream from the given seed.
    Random(u64),
}

impl Pattern {
    /// Produce `len` bytes of the pattern.
    pub fn fill(self, len: usize) -> Vec<u8> {
        match self {
            Pattern::Incrementing => (0..len).map(|i| i as u8).collect(),
            Pattern::Zeros => vec![0x00; len],
            Pattern::Ones => vec![0xff; len],
            Pattern::Random(seed) => {
                // xorshift gets stuck at zero
                let mut state = if seed == 0 { 0x9e37_79b9_7f4a_7c15 } else { seed };
                (0..len)
                    .map(|_| {
                        state ^= state << 13;
                        state ^= state >> 7;
                        state ^= state << 17;
                        (state >> 56) as u8
                    })
                    .collect()
            }
        }
    }
}

impl Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pattern::Incrementing => write!(f, "incrementing"),
            Pattern::Zeros => write!(f, "zeros"),
            Pattern::Ones => write!(f, "ones"),
            Pattern::Random(seed) => write!(f, "random:{seed}"),
        }
    }
}

/// Error parsing a [`Pattern`] name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsePatternError(String);

impl Display for ParsePatternError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unknown pattern {:?} (expected incrementing, zeros, ones, random or random:SEED)",
            self.0
        )
    }
}

impl std::error::Error for ParsePatternError {}

impl FromStr for Pattern {
    type Err = ParsePatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incrementing" | "inc" => Ok(Pattern::Incrementing),
            "zeros" => Ok(Pattern::Zeros),
            "ones" => Ok(Pattern::Ones),
            "random" => Ok(Pattern::Random(0)),
            _ => s
                .strip_prefix("random:")
                .and_then(|seed| seed.parse().ok())
                .map(Pattern::Random)
                .ok_or_else(|| ParsePatternError(s.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = LoopbackConfig::default();
        assert_eq!(config.validate(), Ok(1024 * 768 * 3 / 64));
    }

    #[test]
    fn rejects_non_multiple() {
        let config = LoopbackConfig {
            total_bytes: 100,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::NotMultiple {
                total: 100,
                chunk_size: 64
            })
        );
    }

    #[test]
    fn rejects_zero() {
        let config = LoopbackConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroChunkSize));

        let config = LoopbackConfig {
            total_bytes: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroLength));
    }

    #[test]
    fn rejects_oversized_chunk() {
        let chunk_size = MAX_CHUNK_SIZE + 1;
        let config = LoopbackConfig {
            chunk_size,
            total_bytes: chunk_size,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ChunkTooLarge {
                chunk_size,
                max: MAX_CHUNK_SIZE
            })
        );

        let config = LoopbackConfig {
            chunk_size: MAX_CHUNK_SIZE,
            total_bytes: MAX_CHUNK_SIZE,
            ..Default::default()
        };
        assert_eq!(config.validate(), Ok(1));
    }

    #[test]
    fn rejects_wrong_direction() {
        let config = LoopbackConfig {
            out_endpoint: 0x81,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::WrongDirection(0x81)));

        let config = LoopbackConfig {
            in_endpoint: 0x02,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::WrongDirection(0x02)));
    }

    #[test]
    fn rejects_control_endpoint() {
        let config = LoopbackConfig {
            in_endpoint: 0x80,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ControlEndpoint(0x80)));
    }

    #[test]
    fn incrementing_wraps() {
        let data = Pattern::Incrementing.fill(300);
        assert_eq!(data[0], 0);
        assert_eq!(data[255], 255);
        assert_eq!(data[256], 0);
        assert_eq!(data[299], 43);
    }

    #[test]
    fn random_is_deterministic() {
        assert_eq!(Pattern::Random(7).fill(32), Pattern::Random(7).fill(32));
        assert_ne!(Pattern::Random(7).fill(32), Pattern::Random(8).fill(32));
    }

    #[test]
    fn parse_pattern() {
        assert_eq!("inc".parse(), Ok(Pattern::Incrementing));
        assert_eq!("random:42".parse(), Ok(Pattern::Random(42)));
        assert!("random:x".parse::<Pattern>().is_err());
        assert!("stripes".parse::<Pattern>().is_err());
    }
}
