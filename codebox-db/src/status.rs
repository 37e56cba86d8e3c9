use serde::{Deserialize, Serialize};

/// Workspace lifecycle status.
///
/// `Stopped` and `Error` are terminal for a row; `Deleting` ends in row
/// removal. All transitions go through [`crate::workspaces::set_status`],
/// which is the single validation point for the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceStatus {
    Creating,
    Starting,
    Running,
    Stopping,
    Stopped,
    Deleting,
    Error,
}

impl WorkspaceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceStatus::Creating => "creating",
            WorkspaceStatus::Starting => "starting",
            WorkspaceStatus::Running => "running",
            WorkspaceStatus::Stopping => "stopping",
            WorkspaceStatus::Stopped => "stopped",
            WorkspaceStatus::Deleting => "deleting",
            WorkspaceStatus::Error => "error",
        }
    }

    /// Whether `self -> to` is a legal lifecycle transition.
    ///
    /// Re-applying the current status is allowed so that re-delivered
    /// jobs can resume from a half-finished attempt.
    pub fn can_transition(&self, to: WorkspaceStatus) -> bool {
        use WorkspaceStatus::*;

        if *self == to {
            return true;
        }

        matches!(
            (*self, to),
            (Creating, Starting | Deleting | Error)
                | (Starting, Running | Error)
                | (Running, Starting | Stopping | Deleting | Error)
                | (Stopping, Stopped | Error)
                | (Stopped, Starting | Deleting | Error)
                | (Error, Starting | Stopping | Deleting)
                | (Deleting, Error)
        )
    }
}

impl std::fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkspaceStatus {
    type Err = String;

    /// Parse a status as reported by a runner.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "creating" => Ok(WorkspaceStatus::Creating),
            "starting" => Ok(WorkspaceStatus::Starting),
            "running" => Ok(WorkspaceStatus::Running),
            "stopping" => Ok(WorkspaceStatus::Stopping),
            "stopped" => Ok(WorkspaceStatus::Stopped),
            "deleting" => Ok(WorkspaceStatus::Deleting),
            "error" => Ok(WorkspaceStatus::Error),
            other => Err(format!("unknown workspace status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::WorkspaceStatus::*;

    #[test]
    fn legal_transitions() {
        assert!(Creating.can_transition(Starting));
        assert!(Starting.can_transition(Running));
        assert!(Starting.can_transition(Error));
        assert!(Running.can_transition(Stopping));
        assert!(Stopping.can_transition(Stopped));
        assert!(Stopped.can_transition(Starting));
        assert!(Error.can_transition(Deleting));
    }

    #[test]
    fn illegal_transitions() {
        assert!(!Creating.can_transition(Running));
        assert!(!Creating.can_transition(Stopping));
        assert!(!Stopped.can_transition(Stopping));
        assert!(!Deleting.can_transition(Running));
        assert!(!Error.can_transition(Running));
    }

    #[test]
    fn self_transition_is_a_noop() {
        assert!(Starting.can_transition(Starting));
        assert!(Deleting.can_transition(Deleting));
    }

    #[test]
    fn parses_runner_reported_status() {
        assert_eq!("running".parse::<super::WorkspaceStatus>().unwrap(), Running);
        assert!("banana".parse::<super::WorkspaceStatus>().is_err());
    }
}
