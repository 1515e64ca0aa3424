use serde::Serialize;
use utoipa::ToSchema;

use crate::identity::{Identity, IdentityEvent};

/// Authentication state of the process-wide session.
///
/// An identity exists only in the `Authenticated` variant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "state", content = "identity", rename_all = "snake_case")]
pub enum SessionState {
    /// The provider has not finished its initial session check.
    Loading,
    Unauthenticated,
    Authenticated(Identity),
}

impl SessionState {
    #[must_use]
    pub const fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Authenticated(identity) => Some(identity),
            Self::Loading | Self::Unauthenticated => None,
        }
    }

    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticated(_) => "authenticated",
        }
    }
}

/// Tracks the sequence of the last applied provider event.
#[derive(Debug)]
pub(crate) struct Transitions {
    applied: u64,
}

impl Transitions {
    pub(crate) const fn new() -> Self {
        Self { applied: 0 }
    }

    #[cfg(test)]
    pub(crate) const fn applied(&self) -> u64 {
        self.applied
    }

    /// Apply a provider notification. Returns `true` when `state` changed.
    ///
    /// Events at or below the applied sequence are stale or duplicated and
    /// leave everything untouched. A notification never produces `Loading`.
    pub(crate) fn apply(&mut self, state: &mut SessionState, event: &IdentityEvent) -> bool {
        if event.sequence <= self.applied {
            return false;
        }
        self.applied = event.sequence;
        let next = event
            .identity
            .clone()
            .map_or(SessionState::Unauthenticated, SessionState::Authenticated);
        if *state == next {
            return false;
        }
        *state = next;
        true
    }

    /// Drop the local session and ignore every event up to `floor`.
    pub(crate) fn clear(&mut self, state: &mut SessionState, floor: u64) -> bool {
        self.applied = self.applied.max(floor);
        if *state == SessionState::Unauthenticated {
            return false;
        }
        *state = SessionState::Unauthenticated;
        true
    }
}
