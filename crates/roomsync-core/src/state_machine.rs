use crate::{
    error::SyncError,
    types::{RuntimeCommand, RuntimeEvent, RuntimeLifecycleState},
};

#[derive(Debug, Clone)]
pub struct RuntimeStateMachine {
    state: RuntimeLifecycleState,
}

impl Default for RuntimeStateMachine {
    fn default() -> Self {
        Self {
            state: RuntimeLifecycleState::Cold,
        }
    }
}

impl RuntimeStateMachine {
    pub fn state(&self) -> RuntimeLifecycleState {
        self.state
    }

    pub fn apply(&mut self, command: &RuntimeCommand) -> Result<Vec<RuntimeEvent>, SyncError> {
        use RuntimeCommand::*;

        match command {
            InitialSync => self.transition_from_state(
                RuntimeLifecycleState::Cold,
                RuntimeLifecycleState::InitialSyncing,
                "initial_sync",
            ),
            ApplySync { .. }
            | RequestOlder { .. }
            | ResetNotificationCount { .. }
            | ResetHighlightCount { .. }
            | MarkAsRead { .. } => {
                if self.state == RuntimeLifecycleState::Ready {
                    Ok(Vec::new())
                } else {
                    Err(SyncError::invalid_state(self.state, "room command"))
                }
            }
            ListRooms => Ok(Vec::new()),
        }
    }

    pub fn on_initial_sync_result(&mut self, success: bool) -> Result<RuntimeEvent, SyncError> {
        if self.state != RuntimeLifecycleState::InitialSyncing {
            return Err(SyncError::invalid_state(
                self.state,
                "on_initial_sync_result",
            ));
        }

        let next = if success {
            RuntimeLifecycleState::Ready
        } else {
            RuntimeLifecycleState::Cold
        };

        self.state = next;
        Ok(RuntimeEvent::StateChanged { state: next })
    }

    fn transition_from_state(
        &mut self,
        expected: RuntimeLifecycleState,
        next: RuntimeLifecycleState,
        action: &str,
    ) -> Result<Vec<RuntimeEvent>, SyncError> {
        if self.state != expected {
            return Err(SyncError::invalid_state(self.state, action));
        }
        self.state = next;
        Ok(vec![RuntimeEvent::StateChanged { state: next }])
    }
}
