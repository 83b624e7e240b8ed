use std::fmt::Display;

/// Result of comparing what was sent with what came back.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Every byte matched.
    Match {
        /// Bytes compared.
        len: usize,
    },

    /// At least one byte differs.
    Mismatch {
        /// Offset of the first differing byte.
        offset: usize,
        /// Block (chunk) containing the first differing byte.
        block: usize,
        /// Number of blocks containing at least one differing byte.
        mismatched_blocks: usize,
    },
}

impl Verdict {
    pub fn is_match(&self) -> bool {
        matches!(self, Verdict::Match { .. })
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Match { len } => write!(f, "success: {len} bytes match"),
            Verdict::Mismatch {
                offset,
                block,
                mismatched_blocks,
            } => write!(
                f,
                "miscompare at byte {offset} (block {block}, {mismatched_blocks} blocks differ)"
            ),
        }
    }
}

/// Compare the OUT and IN buffers block by block.
///
/// Both buffers must be the same length, and `block_size` non-zero.
pub fn compare(sent: &[u8], received: &[u8], block_size: usize) -> Verdict {
    assert_eq!(sent.len(), received.len(), "buffers differ in length");
    assert!(block_size > 0);

    let mut first = None;
    let mut mismatched_blocks = 0;

    for (block, (a, b)) in sent
        .chunks(block_size)
        .zip(received.chunks(block_size))
        .enumerate()
    {
        if a == b {
            continue;
        }
        mismatched_blocks += 1;
        if first.is_none() {
            let pos = a.iter().zip(b).position(|(x, y)| x != y).unwrap_or(0);
            first = Some((block, block * block_size + pos));
        }
    }

    match first {
        None => Verdict::Match { len: sent.len() },
        Some((block, offset)) => Verdict::Mismatch {
            offset,
            block,
            mismatched_blocks,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal() {
        let data: Vec<u8> = (0..192).map(|i| i as u8).collect();
        assert_eq!(compare(&data, &data, 64), Verdict::Match { len: 192 });
    }

    #[test]
    fn first_mismatch_in_block_two() {
        let sent: Vec<u8> = (0..192).map(|i| i as u8).collect();
        let mut received = sent.clone();
        received[128] ^= 0x01;
        assert_eq!(
            compare(&sent, &received, 64),
            Verdict::Mismatch {
                offset: 128,
                block: 2,
                mismatched_blocks: 1
            }
        );
    }

    #[test]
    fn counts_every_bad_block() {
        let sent = vec![0u8; 256];
        let mut received = sent.clone();
        received[70] = 1;
        received[71] = 1;
        received[255] = 1;
        assert_eq!(
            compare(&sent, &received, 64),
            Verdict::Mismatch {
                offset: 70,
                block: 1,
                mismatched_blocks: 2
            }
        );
    }
}
