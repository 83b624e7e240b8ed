/// Contiguous storage that collects completed chunks of one direction.
///
/// Sized once for `chunks * chunk_size` bytes; chunk `i` lives at byte
/// offset `i * chunk_size`.
pub struct ReassemblyBuffer {
    data: Vec<u8>,
    chunk_size: usize,
    written: usize,
}

impl ReassemblyBuffer {
    pub fn new(chunk_size: usize, chunks: usize) -> ReassemblyBuffer {
        let len = chunk_size
            .checked_mul(chunks)
            .expect("reassembly buffer length overflow");
        ReassemblyBuffer {
            data: vec![0; len],
            chunk_size,
            written: 0,
        }
    }

    /// Store a completed chunk at its offset.
    ///
    /// ### Panics
    /// * If `index` is out of range or `chunk` is not exactly one chunk long.
    pub fn write_chunk(&mut self, index: usize, chunk: &[u8]) {
        assert_eq!(chunk.len(), self.chunk_size, "partial chunk");
        let offset = self.offset_of(index);
        assert!(offset < self.data.len(), "chunk {index} out of range");
        self.data[offset..offset + self.chunk_size].copy_from_slice(chunk);
        self.written += 1;
    }

    /// Byte offset of chunk `index`.
    pub fn offset_of(&self, index: usize) -> usize {
        index * self.chunk_size
    }

    pub fn chunk(&self, index: usize) -> &[u8] {
        let offset = self.offset_of(index);
        &self.data[offset..offset + self.chunk_size]
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks written so far.
    pub fn chunks_written(&self) -> usize {
        self.written
    }

    /// Number of bytes written so far.
    pub fn bytes_written(&self) -> usize {
        self.written * self.chunk_size
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl std::fmt::Debug for ReassemblyBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReassemblyBuffer")
            .field("len", &self.data.len())
            .field("chunk_size", &self.chunk_size)
            .field("written", &self.written)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::ReassemblyBuffer;

    #[test]
    fn chunk_lands_at_offset() {
        let mut buf = ReassemblyBuffer::new(64, 3);
        assert_eq!(buf.len(), 192);

        buf.write_chunk(1, &[0xaa; 64]);
        assert_eq!(buf.offset_of(1), 64);
        assert!(buf.as_slice()[..64].iter().all(|&b| b == 0));
        assert!(buf.as_slice()[64..128].iter().all(|&b| b == 0xaa));
        assert!(buf.as_slice()[128..].iter().all(|&b| b == 0));
        assert_eq!(buf.chunk(1), &[0xaa; 64]);
        assert_eq!(buf.bytes_written(), 64);
    }

    #[test]
    #[should_panic]
    fn out_of_range() {
        let mut buf = ReassemblyBuffer::new(4, 2);
        buf.write_chunk(2, &[0; 4]);
    }

    #[test]
    #[should_panic]
    fn short_chunk() {
        let mut buf = ReassemblyBuffer::new(4, 2);
        buf.write_chunk(0, &[0; 3]);
    }
}
