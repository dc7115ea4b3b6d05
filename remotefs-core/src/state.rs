use std::fmt;

/// Outcome status attached to every finished operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    Good,
    InvalidParam,
    NotReady,
    LocalFileError,
    StoppedByUser,
    FileNotFound,
    TypeMismatch,
    LostFile,
    Unclassified,
}

impl RequestState {
    pub fn is_good(self) -> bool {
        self == RequestState::Good
    }

    pub fn describe(self) -> &'static str {
        match self {
            RequestState::Good => "Task successful",
            RequestState::InvalidParam => "Invalid parameters passed to task",
            RequestState::NotReady => "Another operation is still in progress",
            RequestState::LocalFileError => "Unable to access local file or folder",
            RequestState::StoppedByUser => "Stopped by user",
            RequestState::FileNotFound => "Remote file or folder does not exist",
            RequestState::TypeMismatch => "Remote entry type changed unexpectedly",
            RequestState::LostFile => "Entry disappeared while the task was running",
            RequestState::Unclassified => "Remote task failed",
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}
