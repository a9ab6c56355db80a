// Step graph: the fixed order of wizard pages and their shortcuts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepId {
    Welcome,
    Database,
    Account,
    Notification,
    Tools,
    Telephony,
    Install,
}

/// When "jump to last" may be offered on a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastAvailability {
    Never,
    Always,
    /// Only after the step's gate passed for the current input.
    WhenGatePassed,
}

impl StepId {
    pub const ALL: [StepId; 7] = [
        StepId::Welcome,
        StepId::Database,
        StepId::Account,
        StepId::Notification,
        StepId::Tools,
        StepId::Telephony,
        StepId::Install,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepId::Welcome => "welcome",
            StepId::Database => "database",
            StepId::Account => "account",
            StepId::Notification => "notification",
            StepId::Tools => "tools",
            StepId::Telephony => "telephony",
            StepId::Install => "install",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            StepId::Welcome => "Welcome",
            StepId::Database => "Database connection",
            StepId::Account => "Administrator account",
            StepId::Notification => "Registration and mail",
            StepId::Tools => "Document conversion tools",
            StepId::Telephony => "Security and telephony",
            StepId::Install => "Installation",
        }
    }

    pub fn next(&self) -> Option<StepId> {
        match self {
            StepId::Welcome => Some(StepId::Database),
            StepId::Database => Some(StepId::Account),
            StepId::Account => Some(StepId::Notification),
            StepId::Notification => Some(StepId::Tools),
            StepId::Tools => Some(StepId::Telephony),
            StepId::Telephony => Some(StepId::Install),
            StepId::Install => None,
        }
    }

    pub fn previous(&self) -> Option<StepId> {
        match self {
            StepId::Welcome => None,
            StepId::Database => Some(StepId::Welcome),
            StepId::Account => Some(StepId::Database),
            StepId::Notification => Some(StepId::Account),
            StepId::Tools => Some(StepId::Notification),
            StepId::Telephony => Some(StepId::Tools),
            StepId::Install => Some(StepId::Telephony),
        }
    }

    /// Target of "jump to last", if the step has one.
    pub fn last(&self) -> Option<StepId> {
        match self {
            StepId::Account | StepId::Notification | StepId::Tools | StepId::Telephony => {
                Some(StepId::Install)
            }
            _ => None,
        }
    }

    pub fn is_last_step(&self) -> bool {
        matches!(self, StepId::Install)
    }

    pub fn last_availability(&self) -> LastAvailability {
        match self {
            StepId::Account | StepId::Notification | StepId::Telephony => LastAvailability::Always,
            StepId::Tools => LastAvailability::WhenGatePassed,
            StepId::Welcome | StepId::Database | StepId::Install => LastAvailability::Never,
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepId::ALL
            .iter()
            .copied()
            .find(|step| step.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown step '{}'", s.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_and_previous_are_inverse() {
        for step in StepId::ALL {
            if let Some(n) = step.next() {
                assert_eq!(n.previous(), Some(step));
            }
        }
    }

    #[test]
    fn forward_walk_visits_every_step_once() {
        let mut seen = vec![StepId::Welcome];
        let mut step = StepId::Welcome;
        while let Some(n) = step.next() {
            assert!(!seen.contains(&n));
            seen.push(n);
            step = n;
        }
        assert_eq!(seen, StepId::ALL.to_vec());
    }

    #[test]
    fn only_install_is_last_step() {
        for step in StepId::ALL {
            assert_eq!(step.is_last_step(), step == StepId::Install);
        }
    }

    #[test]
    fn last_targets_install_where_offered() {
        for step in StepId::ALL {
            match step.last_availability() {
                LastAvailability::Never => assert_eq!(step.last(), None),
                _ => assert_eq!(step.last(), Some(StepId::Install)),
            }
        }
    }

    #[test]
    fn step_names_parse() {
        assert_eq!("Tools".parse::<StepId>().unwrap(), StepId::Tools);
        assert!("summary".parse::<StepId>().is_err());
    }
}
