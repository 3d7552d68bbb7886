//! Creation and lookup policies.

/// What to do with a message given whether its instance already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Build a new instance seeded with the message's correlation id.
    CreateNew,
    /// Load and update the existing instance.
    UseExisting,
    /// Drop the message without error.
    Ignore,
    /// Contract violation: fail this message's dispatch.
    Reject,
}

/// Decides creation versus lookup for messages of shape `M`.
pub trait SagaPolicy<M>: Send + Sync {
    /// Whether `message` may start a new instance.
    fn should_create(&self, message: &M) -> bool;

    fn decide(&self, message: &M, instance_exists: bool) -> PolicyDecision;
}

/// For pure initiators: creates when absent, rejects when present.
#[derive(Debug, Clone, Copy, Default)]
pub struct InitiatingPolicy;

impl<M> SagaPolicy<M> for InitiatingPolicy {
    fn should_create(&self, _message: &M) -> bool {
        true
    }

    fn decide(&self, _message: &M, instance_exists: bool) -> PolicyDecision {
        if instance_exists {
            PolicyDecision::Reject
        } else {
            PolicyDecision::CreateNew
        }
    }
}

/// For correlated or observed messages: updates when present, ignores when absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelatedPolicy;

impl<M> SagaPolicy<M> for CorrelatedPolicy {
    fn should_create(&self, _message: &M) -> bool {
        false
    }

    fn decide(&self, _message: &M, instance_exists: bool) -> PolicyDecision {
        if instance_exists {
            PolicyDecision::UseExisting
        } else {
            PolicyDecision::Ignore
        }
    }
}

/// Creates when absent, updates when present.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOrUseExistingPolicy;

impl<M> SagaPolicy<M> for CreateOrUseExistingPolicy {
    fn should_create(&self, _message: &M) -> bool {
        true
    }

    fn decide(&self, _message: &M, instance_exists: bool) -> PolicyDecision {
        if instance_exists {
            PolicyDecision::UseExisting
        } else {
            PolicyDecision::CreateNew
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initiating_policy_rejects_existing_instance() {
        let policy = InitiatingPolicy;
        assert!(SagaPolicy::<()>::should_create(&policy, &()));
        assert_eq!(policy.decide(&(), false), PolicyDecision::CreateNew);
        assert_eq!(policy.decide(&(), true), PolicyDecision::Reject);
    }

    #[test]
    fn correlated_policy_never_creates() {
        let policy = CorrelatedPolicy;
        assert!(!SagaPolicy::<()>::should_create(&policy, &()));
        assert_eq!(policy.decide(&(), false), PolicyDecision::Ignore);
        assert_eq!(policy.decide(&(), true), PolicyDecision::UseExisting);
    }

    #[test]
    fn create_or_use_existing_covers_both_cases() {
        let policy = CreateOrUseExistingPolicy;
        assert_eq!(policy.decide(&(), false), PolicyDecision::CreateNew);
        assert_eq!(policy.decide(&(), true), PolicyDecision::UseExisting);
    }
}
