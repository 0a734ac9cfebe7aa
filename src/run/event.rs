/// Something that happened during a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunEvent {
    Started,
    UsedArtifact,
    LoggedArtifact,
    Finished,
    Failed,
}

impl RunEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunEvent::Started => "Started",
            RunEvent::UsedArtifact => "UsedArtifact",
            RunEvent::LoggedArtifact => "LoggedArtifact",
            RunEvent::Finished => "Finished",
            RunEvent::Failed => "Failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "started" => Some(RunEvent::Started),
            "usedartifact" => Some(RunEvent::UsedArtifact),
            "loggedartifact" => Some(RunEvent::LoggedArtifact),
            "finished" => Some(RunEvent::Finished),
            "failed" => Some(RunEvent::Failed),
            _ => None,
        }
    }
}
