//! Reporting of session results.
//!
//! A session tells its [`ReportSink`] about every terminal condition as it
//! happens, and hands it a [`Summary`] once the run is over.

use std::{fmt::Display, time::Duration};

use log::{error, info, warn};

use crate::{pipeline::Failure, pipeline::PipelineState, verify::Verdict, Error};

/// Overall classification of a finished session.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// All chunks looped back and the data matched.
    Match,

    /// All chunks looped back but the data differed.
    Mismatch,

    /// A transfer failed, ending its pipeline.
    TransferFailed,

    /// Waiting for completions failed.
    Fatal,
}

/// End-of-session statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    /// Bytes completed on the OUT endpoint.
    pub out_bytes: usize,
    /// Bytes completed on the IN endpoint.
    pub in_bytes: usize,
    pub out_state: PipelineState,
    pub in_state: PipelineState,
    /// Time from the first submission until the dispatch loop stopped.
    pub elapsed: Duration,
    /// Per-transfer failures, at most one per direction.
    pub failures: Vec<Failure>,
    pub fatal: Option<Error>,
    /// Transfers still pending with the transport when the session gave up
    /// waiting for them.
    pub abandoned: usize,
    /// Integrity check, only present once the IN side received everything.
    pub verdict: Option<Verdict>,
}

impl Summary {
    pub fn outcome(&self) -> Outcome {
        if self.fatal.is_some() {
            Outcome::Fatal
        } else if !self.failures.is_empty() {
            Outcome::TransferFailed
        } else {
            match self.verdict {
                Some(v) if v.is_match() => Outcome::Match,
                _ => Outcome::Mismatch,
            }
        }
    }

    /// Bytes per second for the given byte count over the session time.
    pub fn rate(&self, bytes: usize) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            bytes as f64 / secs
        } else {
            0.0
        }
    }
}

impl Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "OUT: {} bytes ({:?}), {:.1} kB/s",
            self.out_bytes,
            self.out_state,
            self.rate(self.out_bytes) / 1000.0
        )?;
        writeln!(
            f,
            "IN:  {} bytes ({:?}), {:.1} kB/s",
            self.in_bytes,
            self.in_state,
            self.rate(self.in_bytes) / 1000.0
        )?;
        writeln!(f, "elapsed: {:.3} s", self.elapsed.as_secs_f64())?;
        for failure in &self.failures {
            writeln!(f, "failed: {failure}")?;
        }
        if let Some(e) = &self.fatal {
            writeln!(f, "fatal: {e}")?;
        }
        if self.abandoned > 0 {
            writeln!(f, "abandoned {} pending transfers", self.abandoned)?;
        }
        match &self.verdict {
            Some(v) => write!(f, "{v}"),
            None => write!(f, "not verified: loopback incomplete"),
        }
    }
}

/// Receiver of session results.
///
/// Every method has an empty default so sinks only implement what they use.
pub trait ReportSink {
    /// A transfer failed and ended its pipeline.
    fn transfer_failed(&mut self, failure: &Failure) {
        let _ = failure;
    }

    /// Waiting for completions failed and the session is aborting.
    fn fatal(&mut self, error: &Error) {
        let _ = error;
    }

    /// The session finished.
    fn finished(&mut self, summary: &Summary) {
        let _ = summary;
    }
}

impl<S: ReportSink + ?Sized> ReportSink for &mut S {
    fn transfer_failed(&mut self, failure: &Failure) {
        (**self).transfer_failed(failure)
    }

    fn fatal(&mut self, error: &Error) {
        (**self).fatal(error)
    }

    fn finished(&mut self, summary: &Summary) {
        (**self).finished(summary)
    }
}

/// Sink that writes everything through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReport;

impl ReportSink for LogReport {
    fn transfer_failed(&mut self, failure: &Failure) {
        warn!("transfer failed: {failure}");
    }

    fn fatal(&mut self, e: &Error) {
        error!("transport error: {e}");
    }

    fn finished(&mut self, summary: &Summary) {
        match summary.outcome() {
            Outcome::Match => info!("loopback complete: {summary}"),
            _ => warn!("loopback failed: {summary}"),
        }
    }
}

/// Sink that records everything it is told.
#[derive(Debug, Default, Clone)]
pub struct Report {
    pub failures: Vec<Failure>,
    pub fatal: Option<Error>,
    pub summary: Option<Summary>,
}

impl ReportSink for Report {
    fn transfer_failed(&mut self, failure: &Failure) {
        self.failures.push(*failure);
    }

    fn fatal(&mut self, error: &Error) {
        self.fatal = Some(error.clone());
    }

    fn finished(&mut self, summary: &Summary) {
        self.summary = Some(summary.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{endpoint::Direction, pipeline::FailureCause, ErrorKind, TransferError};

    fn summary() -> Summary {
        Summary {
            out_bytes: 192,
            in_bytes: 192,
            out_state: PipelineState::Done,
            in_state: PipelineState::Done,
            elapsed: Duration::from_millis(500),
            failures: Vec::new(),
            fatal: None,
            abandoned: 0,
            verdict: Some(Verdict::Match { len: 192 }),
        }
    }

    #[test]
    fn outcome_precedence() {
        let mut s = summary();
        assert_eq!(s.outcome(), Outcome::Match);
        assert_eq!(s.rate(192), 384.0);

        s.verdict = Some(Verdict::Mismatch {
            offset: 128,
            block: 2,
            mismatched_blocks: 1,
        });
        assert_eq!(s.outcome(), Outcome::Mismatch);

        s.failures.push(Failure {
            direction: Direction::In,
            endpoint: 0x82,
            chunk: 1,
            actual_len: 0,
            cause: FailureCause::Status(TransferError::Timeout),
        });
        assert_eq!(s.outcome(), Outcome::TransferFailed);

        s.fatal = Some(Error::new(ErrorKind::Disconnected, "device disconnected"));
        assert_eq!(s.outcome(), Outcome::Fatal);
    }

    #[test]
    fn unverified_is_not_a_match() {
        let mut s = summary();
        s.verdict = None;
        assert_eq!(s.outcome(), Outcome::Mismatch);
        assert!(s.to_string().ends_with("not verified: loopback incomplete"));
    }

    #[test]
    fn report_records() {
        let mut report = Report::default();
        let sink: &mut dyn ReportSink = &mut report;
        sink.fatal(&Error::new(ErrorKind::Other, "boom"));
        sink.finished(&summary());
        assert!(report.fatal.is_some());
        assert_eq!(report.summary, Some(summary()));
    }
}
