//! Configuration types for the sender and receiver.

use crate::error::{Error, Result};

/// Producer-side configuration.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Maximum number of writes in flight.
    /// Default: 16
    pub tx_depth: usize,
    /// Request a completion on every Nth write.
    /// Default: 4
    pub signal_interval: usize,
    /// Records whose framed length is at most this many bytes are sent inline.
    /// Default: 0 (never)
    pub max_inline: usize,
    /// Advise huge pages for the local staging ring.
    /// Default: false
    pub hugepages: bool,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            tx_depth: 16,
            signal_interval: 4,
            max_inline: 0,
            hugepages: false,
        }
    }
}

impl SenderConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of writes in flight.
    pub fn with_tx_depth(mut self, tx_depth: usize) -> Self {
        self.tx_depth = tx_depth;
        self
    }

    /// Set the signaling batch size.
    pub fn with_signal_interval(mut self, signal_interval: usize) -> Self {
        self.signal_interval = signal_interval;
        self
    }

    /// Set the inline threshold.
    pub fn with_max_inline(mut self, max_inline: usize) -> Self {
        self.max_inline = max_inline;
        self
    }

    pub fn with_hugepages(mut self, hugepages: bool) -> Self {
        self.hugepages = hugepages;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.tx_depth == 0 {
            return Err(Error::InvalidConfig("tx_depth must be at least 1".into()));
        }
        if self.signal_interval == 0 || self.signal_interval > self.tx_depth {
            return Err(Error::InvalidConfig(format!(
                "signal_interval {} must be in 1..={}",
                self.signal_interval, self.tx_depth
            )));
        }
        Ok(())
    }
}

/// Consumer-side configuration.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Report the read cursor once it moved more than this many bytes.
    /// Default: None (half the ring)
    pub report_threshold: Option<u64>,
    /// Also report pending progress when the ring is found empty.
    /// Default: false
    pub report_when_idle: bool,
    /// Drain the completion queue every Nth receive call.
    /// Default: 8
    pub poll_interval: usize,
    /// Maximum number of credit writes awaiting completion.
    /// Default: 16
    pub max_outstanding_reports: usize,
    /// Advise huge pages for the ring.
    /// Default: false
    pub hugepages: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            report_threshold: None,
            report_when_idle: false,
            poll_interval: 8,
            max_outstanding_reports: 16,
            hugepages: false,
        }
    }
}

impl ReceiverConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the credit report threshold in bytes.
    pub fn with_report_threshold(mut self, threshold: u64) -> Self {
        self.report_threshold = Some(threshold);
        self
    }

    pub fn with_report_when_idle(mut self, report_when_idle: bool) -> Self {
        self.report_when_idle = report_when_idle;
        self
    }

    /// Set how often the completion queue is drained.
    pub fn with_poll_interval(mut self, poll_interval: usize) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_max_outstanding_reports(mut self, max: usize) -> Self {
        self.max_outstanding_reports = max;
        self
    }

    pub fn with_hugepages(mut self, hugepages: bool) -> Self {
        self.hugepages = hugepages;
        self
    }

    /// Validate against the ring size and return the effective threshold.
    pub fn validate(&self, ring_size: u64) -> Result<u64> {
        if self.poll_interval == 0 {
            return Err(Error::InvalidConfig("poll_interval must be at least 1".into()));
        }
        if self.max_outstanding_reports == 0 {
            return Err(Error::InvalidConfig(
                "max_outstanding_reports must be at least 1".into(),
            ));
        }
        let threshold = self.report_threshold.unwrap_or(ring_size / 2);
        if threshold >= ring_size {
            return Err(Error::InvalidConfig(format!(
                "report_threshold {} must be below the ring size {}",
                threshold, ring_size
            )));
        }
        Ok(threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_defaults_are_valid() {
        let config = SenderConfig::default();
        assert_eq!(config.tx_depth, 16);
        assert_eq!(config.signal_interval, 4);
        assert_eq!(config.max_inline, 0);
        config.validate().unwrap();
    }

    #[test]
    fn test_sender_rejects_bad_batching() {
        assert!(SenderConfig::new().with_tx_depth(0).validate().is_err());
        assert!(SenderConfig::new().with_signal_interval(0).validate().is_err());
        assert!(
            SenderConfig::new()
                .with_tx_depth(4)
                .with_signal_interval(8)
                .validate()
                .is_err()
        );
        SenderConfig::new()
            .with_tx_depth(4)
            .with_signal_interval(4)
            .validate()
            .unwrap();
    }

    #[test]
    fn test_receiver_threshold_defaults_to_half() {
        assert_eq!(ReceiverConfig::default().validate(4096).unwrap(), 2048);
        assert_eq!(
            ReceiverConfig::new()
                .with_report_threshold(100)
                .validate(4096)
                .unwrap(),
            100
        );
    }

    #[test]
    fn test_receiver_rejects_bad_values() {
        assert!(matches!(
            ReceiverConfig::new().with_report_threshold(4096).validate(4096),
            Err(Error::InvalidConfig(_))
        ));
        assert!(ReceiverConfig::new().with_poll_interval(0).validate(4096).is_err());
        assert!(
            ReceiverConfig::new()
                .with_max_outstanding_reports(0)
                .validate(4096)
                .is_err()
        );
    }
}
