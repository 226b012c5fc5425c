//! Single-writer discipline for messages.
//!
//! The first thread that touches a message becomes its owner. Only the owner
//! may write, and only while the message is mutable. Handing a message to
//! another thread requires a thread copy or an explicit reset.

use crate::config::AccessControlConfig;
use crate::error::AccessError;
use std::sync::OnceLock;
use std::thread::{self, ThreadId};
use tracing::warn;

#[derive(Debug)]
pub(crate) struct AccessControl {
    owner: OnceLock<ThreadId>,
    mutable: bool,
}

impl AccessControl {
    pub(crate) fn new() -> Self {
        Self {
            owner: OnceLock::new(),
            mutable: true,
        }
    }

    /// Record the current thread as owner if there is none yet.
    pub(crate) fn touch(&self, policy: &AccessControlConfig) {
        if policy.assert_message_access {
            self.owner.get_or_init(|| thread::current().id());
        }
    }

    pub(crate) fn check(&self, write: bool, policy: &AccessControlConfig) -> Result<(), AccessError> {
        if !policy.assert_message_access {
            return Ok(());
        }
        let current = thread::current().id();
        let owner = *self.owner.get_or_init(|| current);

        let violation = if !write {
            None
        } else if owner != current {
            Some(AccessError::NonOwnerWrite { owner, current })
        } else if !self.mutable {
            Some(AccessError::ImmutableWrite)
        } else {
            None
        };

        match violation {
            None => Ok(()),
            Some(error) if policy.fail_on_message_scribbling => Err(error),
            Some(error) => {
                warn!(%error, "message access violation ignored");
                Ok(())
            }
        }
    }

    pub(crate) fn owner(&self) -> Option<ThreadId> {
        self.owner.get().copied()
    }

    pub(crate) fn is_mutable(&self) -> bool {
        self.mutable
    }

    pub(crate) fn reset(&mut self) {
        self.owner = OnceLock::new();
        self.mutable = true;
    }

    pub(crate) fn mark_immutable(&mut self) {
        self.mutable = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRICT: AccessControlConfig = AccessControlConfig {
        assert_message_access: true,
        fail_on_message_scribbling: true,
    };

    #[test]
    fn test_first_access_claims_ownership() {
        let access = AccessControl::new();
        assert!(access.owner().is_none());
        access.check(false, &STRICT).unwrap();
        assert_eq!(access.owner(), Some(thread::current().id()));
    }

    #[test]
    fn test_non_owner_write_fails() {
        let access = AccessControl::new();
        access.check(true, &STRICT).unwrap();

        let result = thread::scope(|s| s.spawn(|| access.check(true, &STRICT)).join());
        assert!(matches!(
            result.unwrap(),
            Err(AccessError::NonOwnerWrite { .. })
        ));
    }

    #[test]
    fn test_non_owner_read_is_allowed() {
        let access = AccessControl::new();
        access.check(true, &STRICT).unwrap();

        let result = thread::scope(|s| s.spawn(|| access.check(false, &STRICT)).join());
        assert!(result.unwrap().is_ok());
    }

    #[test]
    fn test_immutable_write_fails() {
        let mut access = AccessControl::new();
        access.mark_immutable();
        assert_eq!(access.check(true, &STRICT), Err(AccessError::ImmutableWrite));

        access.reset();
        assert!(access.check(true, &STRICT).is_ok());
    }

    #[test]
    fn test_violation_logged_when_failures_disabled() {
        let lenient = AccessControlConfig {
            fail_on_message_scribbling: false,
            ..STRICT
        };
        let mut access = AccessControl::new();
        access.mark_immutable();
        assert!(access.check(true, &lenient).is_ok());
    }

    #[test]
    fn test_disabled_checks_never_claim_owner() {
        let off = AccessControlConfig {
            assert_message_access: false,
            ..STRICT
        };
        let access = AccessControl::new();
        access.check(true, &off).unwrap();
        assert!(access.owner().is_none());
    }
}
