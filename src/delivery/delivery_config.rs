use std::time::Duration;
use anyhow::bail;


/// What [crate::delivery::engine::DeliveryEngine::commit] does when the store fails to persist
///  a new message
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CommitFailurePolicy {
    /// log the error and drop the message - the caller is not notified
    Log,
    /// return the error to the caller
    Propagate,
}

#[derive(Debug)]
pub struct DeliveryConfig {
    /// Retransmissions back off linearly: the n-th retransmission of a packet is due `n` times
    ///  this step after it was armed.
    pub retry_step: Duration,
    /// This is the maximum number of stored packets that are (re)transmitted in response to a
    ///  single request. It bounds both the size of response buffers and the work done per
    ///  request.
    pub retry_batch_size: usize,
    pub commit_failure: CommitFailurePolicy,
}

impl DeliveryConfig {
    pub fn new() -> DeliveryConfig {
        DeliveryConfig {
            retry_step: Duration::from_secs(5),
            retry_batch_size: 5,
            commit_failure: CommitFailurePolicy::Log,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.retry_step.is_zero() {
            bail!("retry step must be positive");
        }
        if self.retry_batch_size == 0 {
            bail!("retry batch size must be at least 1");
        }
        Ok(())
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        DeliveryConfig::new()
    }
}
