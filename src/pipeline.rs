use std::fmt::Display;

use log::{debug, warn};

use crate::{
    endpoint::{Direction, Endpoint},
    reassembly::ReassemblyBuffer,
    scheduler::ChunkScheduler,
    transfer::Transfer,
    TransferError,
};

/// Progress of one direction of the loopback.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PipelineState {
    /// A transfer is outstanding or about to be submitted.
    Running,

    /// All chunks completed successfully.
    Done,

    /// A transfer failed. The pipeline submits nothing further.
    Failed,
}

/// Why a transfer ended its pipeline.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// The transfer completed with a non-success status.
    Status(TransferError),

    /// The transfer reported success but moved fewer bytes than one chunk.
    Truncated {
        /// Chunk size that was requested.
        expected: usize,
    },
}

/// A terminal per-transfer failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Failure {
    pub direction: Direction,
    pub endpoint: u8,
    /// Index of the chunk whose transfer failed.
    pub chunk: usize,
    /// Bytes the failed transfer moved before it ended.
    pub actual_len: usize,
    pub cause: FailureCause,
}

impl Failure {
    /// The transfer status, if the failure came from one.
    pub fn status(&self) -> Option<TransferError> {
        match self.cause {
            FailureCause::Status(e) => Some(e),
            FailureCause::Truncated { .. } => None,
        }
    }
}

impl Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} endpoint {:#04x} chunk {}: ",
            self.direction.label(),
            self.endpoint,
            self.chunk
        )?;
        match self.cause {
            FailureCause::Status(e) => write!(f, "{e} (actual length {})", self.actual_len),
            FailureCause::Truncated { expected } => {
                write!(f, "short transfer, {} of {expected} bytes", self.actual_len)
            }
        }
    }
}

impl std::error::Error for Failure {}

/// What the session should do with a descriptor after a completion.
#[derive(Debug)]
pub(crate) enum Step {
    /// The descriptor was rebound to the next chunk; submit it again.
    Resubmit,

    /// The last chunk completed; retire the descriptor.
    Done,

    /// The pipeline failed; retire the descriptor.
    Failed(Failure),
}

/// Per-direction state machine: chunk cursor, completion count and the
/// reassembly buffer.
///
/// At most one transfer per pipeline is outstanding, so completions arrive in
/// submission order and chunk `completed` is always the one that just
/// finished.
#[derive(Debug)]
pub struct Pipeline {
    endpoint: Endpoint,
    scheduler: ChunkScheduler,
    reassembly: ReassemblyBuffer,
    completed: usize,
    state: PipelineState,
    failure: Option<Failure>,
}

impl Pipeline {
    pub(crate) fn new(endpoint: Endpoint, chunks: usize) -> Pipeline {
        Pipeline {
            endpoint,
            scheduler: ChunkScheduler::new(chunks),
            reassembly: ReassemblyBuffer::new(endpoint.max_packet_size(), chunks),
            completed: 0,
            state: PipelineState::Running,
            failure: None,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn direction(&self) -> Direction {
        self.endpoint.direction()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    /// Number of chunks that completed successfully.
    pub fn chunks_completed(&self) -> usize {
        self.completed
    }

    /// Number of chunks handed to the transport so far.
    pub fn chunks_submitted(&self) -> usize {
        self.scheduler.submitted()
    }

    pub fn chunks_total(&self) -> usize {
        self.scheduler.total()
    }

    pub fn bytes_completed(&self) -> usize {
        self.reassembly.bytes_written()
    }

    pub fn reassembly(&self) -> &ReassemblyBuffer {
        &self.reassembly
    }

    fn chunk_size(&self) -> usize {
        self.endpoint.max_packet_size()
    }

    /// Take the next chunk index from the scheduler.
    pub(crate) fn next_chunk(&mut self) -> Option<usize> {
        self.scheduler.next()
    }

    /// Bind the descriptor to `chunk`.
    ///
    /// OUT transfers are loaded with the chunk's slice of `source`. IN
    /// transfers keep receiving into the same buffer, so only the request
    /// length is reset.
    pub(crate) fn prepare(&self, transfer: &mut Transfer, chunk: usize, source: &[u8]) {
        let chunk_size = self.chunk_size();
        match self.direction() {
            Direction::Out => {
                let offset = chunk * chunk_size;
                transfer.load(&source[offset..offset + chunk_size]);
            }
            Direction::In => transfer.set_request_len(chunk_size),
        }
        transfer.set_user_data(chunk);
        transfer.reset();
    }

    /// Apply a completion to the pipeline.
    ///
    /// On success the transferred bytes are copied into the reassembly buffer
    /// and the descriptor is rebound to the next chunk if there is one. Any
    /// non-success status or short transfer fails the pipeline without retry.
    pub(crate) fn complete(&mut self, transfer: &mut Transfer, source: &[u8]) -> Step {
        debug_assert_eq!(self.state, PipelineState::Running);
        let chunk = self.completed;
        debug_assert_eq!(transfer.user_data(), chunk, "completion out of order");

        if let Err(e) = transfer.status() {
            return self.fail(chunk, transfer.actual_len(), FailureCause::Status(e));
        }

        if transfer.actual_len() != self.chunk_size() {
            let expected = self.chunk_size();
            return self.fail(chunk, transfer.actual_len(), FailureCause::Truncated { expected });
        }

        self.reassembly.write_chunk(chunk, transfer.data());
        self.completed += 1;

        match self.next_chunk() {
            Some(next) => {
                self.prepare(transfer, next, source);
                Step::Resubmit
            }
            None => {
                debug!(
                    "{} pipeline on ep {:#04x} done after {} chunks",
                    self.direction().label(),
                    self.endpoint.address(),
                    self.completed
                );
                self.state = PipelineState::Done;
                Step::Done
            }
        }
    }

    fn fail(&mut self, chunk: usize, actual_len: usize, cause: FailureCause) -> Step {
        let failure = Failure {
            direction: self.direction(),
            endpoint: self.endpoint.address(),
            chunk,
            actual_len,
            cause,
        };
        warn!("{failure}");
        self.state = PipelineState::Failed;
        self.failure = Some(failure);
        Step::Failed(failure)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn source() -> Vec<u8> {
        (0..12u8).collect()
    }

    #[test]
    fn out_rebinds_to_next_chunk() {
        let src = source();
        let mut p = Pipeline::new(Endpoint::new(0x01, 4), 3);
        let mut t = Transfer::new(0x01, 4, Duration::from_secs(1));

        let first = p.next_chunk().unwrap();
        p.prepare(&mut t, first, &src);
        assert_eq!(t.request(), &[0, 1, 2, 3]);

        t.set_completion(Ok(()), 4);
        assert!(matches!(p.complete(&mut t, &src), Step::Resubmit));
        assert_eq!(t.request(), &[4, 5, 6, 7]);
        assert_eq!(t.user_data(), 1);
        assert_eq!(p.chunks_completed(), 1);
        assert_eq!(p.reassembly().chunk(0), &[0, 1, 2, 3]);
    }

    #[test]
    fn in_finishes_after_last_chunk() {
        let src = source();
        let mut p = Pipeline::new(Endpoint::new(0x82, 4), 2);
        let mut t = Transfer::new(0x82, 4, Duration::from_secs(1));

        let first = p.next_chunk().unwrap();
        p.prepare(&mut t, first, &src);

        t.request_mut().copy_from_slice(&[9, 9, 9, 9]);
        t.set_completion(Ok(()), 4);
        assert!(matches!(p.complete(&mut t, &src), Step::Resubmit));

        t.request_mut().copy_from_slice(&[8, 8, 8, 8]);
        t.set_completion(Ok(()), 4);
        assert!(matches!(p.complete(&mut t, &src), Step::Done));

        assert_eq!(p.state(), PipelineState::Done);
        assert_eq!(p.reassembly().as_slice(), &[9, 9, 9, 9, 8, 8, 8, 8]);
    }

    #[test]
    fn timeout_is_terminal() {
        let src = source();
        let mut p = Pipeline::new(Endpoint::new(0x01, 4), 3);
        let mut t = Transfer::new(0x01, 4, Duration::from_secs(1));

        let first = p.next_chunk().unwrap();
        p.prepare(&mut t, first, &src);
        t.set_completion(Err(TransferError::Timeout), 1);

        let Step::Failed(failure) = p.complete(&mut t, &src) else {
            panic!("expected failure");
        };
        assert_eq!(failure.chunk, 0);
        assert_eq!(failure.actual_len, 1);
        assert_eq!(failure.status(), Some(TransferError::Timeout));
        assert_eq!(p.state(), PipelineState::Failed);
        assert_eq!(p.chunks_completed(), 0);
        assert_eq!(p.chunks_submitted(), 1);
    }

    #[test]
    fn short_success_is_truncation() {
        let src = source();
        let mut p = Pipeline::new(Endpoint::new(0x82, 4), 3);
        let mut t = Transfer::new(0x82, 4, Duration::from_secs(1));

        let first = p.next_chunk().unwrap();
        p.prepare(&mut t, first, &src);
        t.set_completion(Ok(()), 2);

        let Step::Failed(failure) = p.complete(&mut t, &src) else {
            panic!("expected failure");
        };
        assert_eq!(failure.cause, FailureCause::Truncated { expected: 4 });
        assert_eq!(failure.status(), None);
        assert_eq!(p.bytes_completed(), 0);
    }
}
