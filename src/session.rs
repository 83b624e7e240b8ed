//! The loopback session: both pipelines, the termination gate and the
//! completion dispatcher that drives them.
//!
//! A session keeps exactly one transfer outstanding per direction. Each
//! completion is popped from the transport and applied to the pipeline of
//! its direction, which either rebinds and resubmits the same descriptor,
//! retires it, or fails. Everything happens on the thread calling
//! [`LoopbackSession::run`]; the only blocking call is the transport's wait.

use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::{
    config::{LoopbackConfig, Pattern},
    endpoint::{Direction, EndpointBitSet},
    pipeline::{Pipeline, PipelineState, Step},
    report::{ReportSink, Summary},
    transfer::{Transfer, Transport},
    verify::{self, Verdict},
    ConfigError, Error, ErrorKind,
};

/// Flag raised once, when the IN pipeline has received every chunk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TerminationGate {
    set: bool,
}

impl TerminationGate {
    fn raise(&mut self) {
        debug_assert!(!self.set, "termination gate raised twice");
        self.set = true;
    }

    pub fn is_set(&self) -> bool {
        self.set
    }
}

/// Context of one loopback run.
pub struct LoopbackSession<S: ReportSink> {
    config: LoopbackConfig,
    source: Vec<u8>,
    out: Pipeline,
    inp: Pipeline,
    gate: TerminationGate,

    /// Endpoints with a transfer currently owned by the transport.
    outstanding: EndpointBitSet,

    fatal: Option<Error>,
    abandoned: usize,
    started: Option<Instant>,
    elapsed: Duration,
    cycles: u64,
    sink: S,
}

impl<S: ReportSink> LoopbackSession<S> {
    /// Create a session that sends `source` and expects it back.
    ///
    /// `source` must be exactly `config.total_bytes` long.
    pub fn new(config: LoopbackConfig, source: Vec<u8>, sink: S) -> Result<Self, ConfigError> {
        let chunks = config.validate()?;
        if source.len() != config.total_bytes {
            return Err(ConfigError::SourceLength {
                expected: config.total_bytes,
                actual: source.len(),
            });
        }

        Ok(LoopbackSession {
            out: Pipeline::new(config.out_endpoint(), chunks),
            inp: Pipeline::new(config.in_endpoint(), chunks),
            config,
            source,
            gate: TerminationGate::default(),
            outstanding: EndpointBitSet::default(),
            fatal: None,
            abandoned: 0,
            started: None,
            elapsed: Duration::ZERO,
            cycles: 0,
            sink,
        })
    }

    /// Create a session sending `pattern`.
    pub fn with_pattern(
        config: LoopbackConfig,
        pattern: Pattern,
        sink: S,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let source = pattern.fill(config.total_bytes);
        Self::new(config, source, sink)
    }

    pub fn config(&self) -> &LoopbackConfig {
        &self.config
    }

    /// The data submitted on the OUT endpoint.
    pub fn source(&self) -> &[u8] {
        &self.source
    }

    pub fn out_pipeline(&self) -> &Pipeline {
        &self.out
    }

    pub fn in_pipeline(&self) -> &Pipeline {
        &self.inp
    }

    pub fn gate(&self) -> TerminationGate {
        self.gate
    }

    /// Number of wait calls made by the dispatcher.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn fatal_error(&self) -> Option<&Error> {
        self.fatal.as_ref()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// True once the gate is raised, either pipeline failed, or the
    /// transport failed.
    pub fn is_finished(&self) -> bool {
        self.gate.is_set()
            || self.out.state() == PipelineState::Failed
            || self.inp.state() == PipelineState::Failed
            || self.fatal.is_some()
    }

    /// Compare both reassembly buffers. Only available after the gate is set.
    pub fn verify(&self) -> Option<Verdict> {
        self.gate.is_set().then(|| {
            verify::compare(
                self.out.reassembly().as_slice(),
                self.inp.reassembly().as_slice(),
                self.config.chunk_size,
            )
        })
    }

    /// Allocate one descriptor per direction and submit the first chunk on
    /// each.
    ///
    /// Fails with [`ErrorKind::Other`] if the session was already started.
    pub fn start<T: Transport>(&mut self, transport: &mut T) -> Result<(), Error> {
        if self.started.is_some() {
            return Err(Error::new(ErrorKind::Other, "session already started").log_error());
        }
        self.submit_first(transport);
        Ok(())
    }

    fn submit_first<T: Transport>(&mut self, transport: &mut T) {
        self.started = Some(Instant::now());

        for direction in [Direction::Out, Direction::In] {
            let pipeline = match direction {
                Direction::Out => &mut self.out,
                Direction::In => &mut self.inp,
            };
            let endpoint = pipeline.endpoint();
            let Some(chunk) = pipeline.next_chunk() else {
                continue;
            };
            let mut transfer = Transfer::new(
                endpoint.address(),
                endpoint.max_packet_size(),
                self.config.timeout,
            );
            pipeline.prepare(&mut transfer, chunk, &self.source);
            self.submit(transport, transfer);
        }
    }

    fn submit<T: Transport>(&mut self, transport: &mut T, transfer: Transfer) {
        let ep = transfer.endpoint();
        debug_assert!(!self.outstanding.is_set(ep), "second transfer on ep {ep:#04x}");
        self.outstanding.set(ep);
        debug!("Submitting chunk {} on ep {ep:#04x}", transfer.user_data());
        transport.submit(transfer);
    }

    /// Apply one completion to its pipeline.
    ///
    /// This is the whole per-event transition: copy into the reassembly
    /// buffer and resubmit, retire, or fail. Completions for endpoints
    /// without an outstanding transfer, or for a pipeline that is no longer
    /// running, are discarded.
    pub fn dispatch<T: Transport>(&mut self, transport: &mut T, mut transfer: Transfer) {
        let ep = transfer.endpoint();
        if !self.outstanding.is_set(ep) {
            warn!("Completion on ep {ep:#04x} with no transfer outstanding: {transfer:?}");
            return;
        }
        self.outstanding.clear(ep);

        let pipeline = match transfer.direction() {
            Direction::Out => &mut self.out,
            Direction::In => &mut self.inp,
        };
        if pipeline.endpoint().address() != ep || pipeline.state() != PipelineState::Running {
            debug!("Discarding completion {transfer:?}");
            return;
        }

        debug!(
            "Chunk {} on ep {ep:#04x} completed: {:?}, {} bytes",
            transfer.user_data(),
            transfer.status(),
            transfer.actual_len()
        );

        match pipeline.complete(&mut transfer, &self.source) {
            Step::Resubmit => self.submit(transport, transfer),
            Step::Done => {
                if transfer.direction() == Direction::In {
                    self.gate.raise();
                }
            }
            Step::Failed(failure) => self.sink.transfer_failed(&failure),
        }
    }

    /// Wait for and dispatch completions until `done` returns true.
    ///
    /// Fails if the wait itself fails, or if nothing is outstanding that
    /// could ever make `done` true. An individual transfer's failure does
    /// not end the loop by itself.
    pub fn run_until<T: Transport>(
        &mut self,
        transport: &mut T,
        mut done: impl FnMut(&Self) -> bool,
    ) -> Result<(), Error> {
        while !done(self) {
            if self.outstanding.is_empty() {
                return Err(Error::new(ErrorKind::Other, "no transfers pending").log_error());
            }
            self.cycles += 1;
            match transport.wait_for_completion(self.config.poll_interval) {
                Ok(Some(transfer)) => self.dispatch(transport, transfer),
                Ok(None) => debug!("No completion within {:?}", self.config.poll_interval),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Run the whole loopback and report the result.
    pub fn run<T: Transport>(&mut self, transport: &mut T) -> Summary {
        if self.started.is_none() {
            self.submit_first(transport);
        }

        if let Err(e) = self.run_until(transport, |s| s.is_finished()) {
            self.sink.fatal(&e);
            self.fatal = Some(e);
        }
        self.elapsed = self.started.map(|t| t.elapsed()).unwrap_or_default();

        self.shutdown(transport);

        let summary = self.summary();
        self.sink.finished(&summary);
        summary
    }

    /// Cancel whatever is still outstanding and wait, up to `cancel_grace`,
    /// for the transport to return it. Drained completions are not applied.
    fn shutdown<T: Transport>(&mut self, transport: &mut T) {
        if self.outstanding.is_empty() {
            return;
        }

        let pending = self.outstanding;
        for ep in pending.iter() {
            debug!("Cancelling transfer on ep {ep:#04x}");
            transport.cancel(ep);
        }

        let deadline = Instant::now() + self.config.cancel_grace;
        while !self.outstanding.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match transport.wait_for_completion(remaining) {
                Ok(Some(transfer)) => {
                    debug!("Drained {transfer:?}");
                    self.outstanding.clear(transfer.endpoint());
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Failed to drain cancelled transfers: {e}");
                    break;
                }
            }
        }

        self.abandoned = self.outstanding.iter().count();
        if self.abandoned > 0 {
            warn!(
                "Abandoning {} transfers still pending on {:?}",
                self.abandoned, self.outstanding
            );
        }
    }

    fn summary(&self) -> Summary {
        Summary {
            out_bytes: self.out.bytes_completed(),
            in_bytes: self.inp.bytes_completed(),
            out_state: self.out.state(),
            in_state: self.inp.state(),
            elapsed: self.elapsed,
            failures: [self.out.failure(), self.inp.failure()]
                .into_iter()
                .flatten()
                .copied()
                .collect(),
            fatal: self.fatal.clone(),
            abandoned: self.abandoned,
            verdict: self.verify(),
        }
    }
}
