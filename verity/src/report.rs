//! Corruption reporting.
//!
//! Every failed verification is reported once, with enough context to find the
//! bad block: the file, the data position, where in the tree the mismatch was
//! found, and both digests. Where reports go is up to the [`Reporter`]; the
//! default one writes them to the log.

use auto_impl::auto_impl;
use log::error;
use std::fmt;

use crate::utils::hasher::HashAlgorithm;

/// Where a digest mismatch was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptionSite {
    /// A hash block at `level` did not match its parent's digest
    HashBlock { level: usize },
    /// A data block did not match its digest in level 0
    DataBlock,
    /// A block past the end of the file was not all zeros
    PastEof,
}

impl fmt::Display for CorruptionSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorruptionSite::HashBlock { level } => write!(f, "level {}", level),
            CorruptionSite::DataBlock => write!(f, "data block"),
            CorruptionSite::PastEof => write!(f, "past EOF"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptionReport {
    pub file_id: u64,
    pub pos: u64,
    pub site: CorruptionSite,
    pub hash_alg: HashAlgorithm,
    pub want: Vec<u8>,
    pub real: Vec<u8>,
}

impl fmt::Display for CorruptionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FILE CORRUPTED! file {} pos={} {} want_hash={}:{} real_hash={}:{}",
            self.file_id,
            self.pos,
            self.site,
            self.hash_alg,
            hex::encode(&self.want),
            self.hash_alg,
            hex::encode(&self.real),
        )
    }
}

/// Sink for verification failures.
#[auto_impl(&, Arc)]
pub trait Reporter: Send + Sync {
    fn report_corruption(&self, report: &CorruptionReport);
    fn report_error(&self, file_id: u64, message: &str);
}

/// Writes reports with `log::error!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report_corruption(&self, report: &CorruptionReport) {
        error!("{}", report);
    }

    fn report_error(&self, file_id: u64, message: &str) {
        error!("file {}: {}", file_id, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_display() {
        let report = CorruptionReport {
            file_id: 7,
            pos: 8192,
            site: CorruptionSite::HashBlock { level: 1 },
            hash_alg: HashAlgorithm::Sha256,
            want: vec![0xab, 0xcd],
            real: vec![0x01, 0x02],
        };
        assert_eq!(
            report.to_string(),
            "FILE CORRUPTED! file 7 pos=8192 level 1 want_hash=sha256:abcd real_hash=sha256:0102"
        );
        assert_eq!(CorruptionSite::PastEof.to_string(), "past EOF");
        LogReporter.report_corruption(&report);
    }
}
