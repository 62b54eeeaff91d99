//! Stream lifecycle states and the transition table

use std::fmt;

/// Lifecycle state of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// No publisher yet (or waiting for one to come back)
    WaitPublish,
    /// A publisher is attached
    Publishing,
    /// Publishing without subscribers, counting down to close
    WaitClose,
    /// Closed; removed from the directory after a short grace
    Closed,
    /// Terminal
    Destroyed,
}

/// Inputs of the lifecycle state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamAction {
    Publish,
    Timeout,
    PublishLost,
    Close,
    LastLeave,
    FirstEnter,
    NoTracks,
}

impl StreamState {
    /// Target state for `action`, or `None` when the action does not apply
    pub fn next(self, action: StreamAction) -> Option<StreamState> {
        use StreamAction::*;
        use StreamState::*;

        match (self, action) {
            (WaitPublish, Publish) => Some(Publishing),
            (WaitPublish, Timeout | Close | LastLeave) => Some(Closed),

            (Publishing, PublishLost | NoTracks) => Some(WaitPublish),
            (Publishing, Close) => Some(Closed),
            (Publishing, LastLeave) => Some(WaitClose),

            (WaitClose, Timeout | PublishLost | Close) => Some(Closed),
            (WaitClose, FirstEnter) => Some(Publishing),

            (Closed, Timeout) => Some(Destroyed),

            _ => None,
        }
    }

    /// Closed or destroyed: refuses publishers and subscribers
    pub fn is_closed(self) -> bool {
        matches!(self, StreamState::Closed | StreamState::Destroyed)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamState::WaitPublish => "wait-publish",
            StreamState::Publishing => "publishing",
            StreamState::WaitClose => "wait-close",
            StreamState::Closed => "closed",
            StreamState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use StreamAction::*;
    use StreamState::*;

    const ACTIONS: [StreamAction; 7] = [Publish, Timeout, PublishLost, Close, LastLeave, FirstEnter, NoTracks];

    fn row(state: StreamState) -> Vec<Option<StreamState>> {
        ACTIONS.iter().map(|a| state.next(*a)).collect()
    }

    #[test]
    fn test_transition_table() {
        assert_eq!(
            row(WaitPublish),
            vec![Some(Publishing), Some(Closed), None, Some(Closed), Some(Closed), None, None]
        );
        assert_eq!(
            row(Publishing),
            vec![None, None, Some(WaitPublish), Some(Closed), Some(WaitClose), None, Some(WaitPublish)]
        );
        assert_eq!(
            row(WaitClose),
            vec![None, Some(Closed), Some(Closed), Some(Closed), None, Some(Publishing), None]
        );
        assert_eq!(row(Closed), vec![None, Some(Destroyed), None, None, None, None, None]);
        assert!(row(Destroyed).iter().all(Option::is_none));
    }

    #[test]
    fn test_closed_states() {
        assert!(Closed.is_closed());
        assert!(Destroyed.is_closed());
        assert!(!WaitClose.is_closed());
        assert_eq!(WaitPublish.to_string(), "wait-publish");
    }
}
