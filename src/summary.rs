use std::time::Duration;

use ffmpeg_pipe::{PipeError, PipelineReport, PipelineState};
use serde::Serialize;

use crate::transport::Location;

#[derive(Debug, Serialize)]
pub struct ErrorSummary {
    pub kind: &'static str,
    pub message: String,
}

/// What `--json` prints once a run ends.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub input: String,
    pub output: String,
    pub state: PipelineState,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<PipelineReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorSummary>,
}

impl RunSummary {
    pub fn new(
        input: &Location,
        output: &Location,
        elapsed: Duration,
        result: &anyhow::Result<PipelineReport>,
    ) -> Self {
        let (state, report, error) = match result {
            Ok(report) => (PipelineState::Done, Some(report.clone()), None),
            Err(e) => (
                PipelineState::Failed,
                None,
                Some(ErrorSummary {
                    kind: error_kind(e),
                    message: format!("{:#}", e),
                }),
            ),
        };
        Self {
            input: input.to_string(),
            output: output.to_string(),
            state,
            elapsed_ms: elapsed.as_millis() as u64,
            report,
            error,
        }
    }
}

/// Failures outside the pipeline come from opening a transport.
fn error_kind(e: &anyhow::Error) -> &'static str {
    e.downcast_ref::<PipeError>()
        .map(PipeError::kind)
        .unwrap_or("transport")
}
