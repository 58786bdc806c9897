use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::cloud::{CloudError, EventBus, InstanceMetadata, JoinAttempt};
use crate::descriptor::{DescriptorCell, StartingText};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeOutcome {
    AlreadyTriggered,
    Published,
    /// Metadata or publish failed. The gate stays closed until `reset`.
    Abandoned,
}

enum WakeFailure {
    Metadata(CloudError),
    Publish(CloudError),
}

/// Single-flight join notifier. Only `reset` reopens the gate.
pub struct WakeTrigger {
    triggering: AtomicBool,
    metadata: Arc<dyn InstanceMetadata>,
    events: Arc<dyn EventBus>,
    starting: StartingText,
}

impl WakeTrigger {
    pub fn new(
        metadata: Arc<dyn InstanceMetadata>,
        events: Arc<dyn EventBus>,
        starting: StartingText,
    ) -> Self {
        Self {
            triggering: AtomicBool::new(false),
            metadata,
            events,
            starting,
        }
    }

    pub fn is_triggering(&self) -> bool {
        self.triggering.load(Ordering::SeqCst)
    }

    pub fn trigger(&self, client_address: &str, descriptor: &DescriptorCell) -> WakeOutcome {
        if self
            .triggering
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(client = client_address, "wake already in progress");
            return WakeOutcome::AlreadyTriggered;
        }

        match self.notify(client_address) {
            Ok(receipt) => {
                info!(client = client_address, response = %receipt, "join attempt published");
                descriptor.update(|current| current.apply_starting(&self.starting));
                WakeOutcome::Published
            }
            Err(WakeFailure::Metadata(err)) => {
                error!("Instance metadata could not be retrieved! ({err})");
                WakeOutcome::Abandoned
            }
            Err(WakeFailure::Publish(err)) => {
                error!("join attempt could not be published: {err}");
                WakeOutcome::Abandoned
            }
        }
    }

    pub fn reset(&self, descriptor: &DescriptorCell) {
        descriptor.restore_configured();
        self.triggering.store(false, Ordering::SeqCst);
        info!("wake trigger reset");
    }

    fn notify(&self, client_address: &str) -> Result<String, WakeFailure> {
        let stack = self.metadata.stack_identifier();
        let identity = self.metadata.instance_identity();
        let (stack, identity) = match (stack, identity) {
            (Ok(stack), Ok(identity)) => (stack, identity),
            (Err(err), _) | (_, Err(err)) => return Err(WakeFailure::Metadata(err)),
        };
        let attempt = JoinAttempt::new(stack, identity, client_address);
        self.events
            .publish_join_attempt(&attempt)
            .map_err(WakeFailure::Publish)
    }
}

impl std::fmt::Debug for WakeTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeTrigger")
            .field("triggering", &self.is_triggering())
            .field("starting", &self.starting)
            .finish()
    }
}
