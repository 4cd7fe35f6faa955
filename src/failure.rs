use serde::Serialize;

/// Why a pipeline stage did not pass.
///
/// `ERR`/`WRN` log markers are not failures. They appear in the stage's log
/// report only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageFailure {
    #[error("invalid command line: {reason}")]
    InvalidCommand { reason: String },
    #[error("could not launch: {reason}")]
    LaunchFailure { reason: String },
    #[error("cancelled by user")]
    Cancelled,
    #[error("exit code {code}")]
    NonzeroExit { code: i32 },
    #[error("terminated by signal{}", .signal.map(|s| format!(" {s}")).unwrap_or_default())]
    Signalled { signal: Option<i32> },
    #[error("missing artifact {path}")]
    MissingArtifact { path: String },
    #[error("{sentinel:?} not found in {log}")]
    SentinelMissing { sentinel: String, log: String },
}

impl StageFailure {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StageFailure::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_json_carry_the_diagnostics() {
        let failure = StageFailure::SentinelMissing {
            sentinel: "Database is valid".to_string(),
            log: "/tmp/validate1.log".to_string(),
        };
        assert_eq!(
            failure.to_string(),
            "\"Database is valid\" not found in /tmp/validate1.log"
        );
        let json = serde_json::to_value(&failure).expect("serialize failure");
        assert_eq!(json["kind"], "sentinel_missing");

        assert_eq!(
            StageFailure::Signalled { signal: Some(9) }.to_string(),
            "terminated by signal 9"
        );
        assert_eq!(
            StageFailure::NonzeroExit { code: 3 }.to_string(),
            "exit code 3"
        );
    }
}
