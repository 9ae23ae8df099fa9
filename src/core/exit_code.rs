use std::fmt;

/// Process exit status reported by the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Failure,
    Usage,
    Interrupted,
    /// Forwarded from the task container
    Task(i64),
}

impl ExitStatus {
    pub const SUCCESS: i32 = 0;
    pub const FAILURE: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const INTERRUPTED: i32 = 130;

    /// Code for `std::process::exit`
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Success => Self::SUCCESS,
            ExitStatus::Failure => Self::FAILURE,
            ExitStatus::Usage => Self::USAGE,
            ExitStatus::Interrupted => Self::INTERRUPTED,
            ExitStatus::Task(code) => i32::try_from(*code).unwrap_or(Self::FAILURE),
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Success => write!(f, "success"),
            ExitStatus::Failure => write!(f, "failure"),
            ExitStatus::Usage => write!(f, "usage error"),
            ExitStatus::Interrupted => write!(f, "interrupted"),
            ExitStatus::Task(code) => write!(f, "task exit code {}", code),
        }
    }
}
