#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerState {
    #[default]
    Looking,
    Follower,
    Leader,
    ElectionInProgress,
}

impl ServerState {
    pub fn is_election_suspended(self) -> bool {
        matches!(self, ServerState::ElectionInProgress | ServerState::Looking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looking_and_election_suspend_monitoring() {
        assert!(ServerState::Looking.is_election_suspended());
        assert!(ServerState::ElectionInProgress.is_election_suspended());
        assert!(!ServerState::Follower.is_election_suspended());
        assert!(!ServerState::Leader.is_election_suspended());
    }
}
