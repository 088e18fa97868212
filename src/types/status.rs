use std::fmt;

/// Which lifecycle stage a job is in; selects the status list holding it.
///
/// Only `Ready` and `Reserved` are reachable today: jobs are admitted ready
/// and move to reserved when claimed. `Delayed` and `Buried` have list slots
/// but no operation transitions into them yet.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum JobStatus {
    Ready,
    Reserved,
    Delayed,
    Buried,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Reserved => "reserved",
            Self::Delayed => "delayed",
            Self::Buried => "buried",
        }
    }

    /// Maps a wire status name back to a status, if it is one we know.
    pub fn from_wire(name: &[u8]) -> Option<Self> {
        match name {
            b"ready" => Some(Self::Ready),
            b"reserved" => Some(Self::Reserved),
            b"delayed" => Some(Self::Delayed),
            b"buried" => Some(Self::Buried),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
