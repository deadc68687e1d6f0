use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Gateway(#[from] convo_gateway::GatewayError),

    #[error(transparent)]
    Telemetry(#[from] convo_telemetry::TelemetryError),

    #[error(transparent)]
    Core(#[from] convo_core::ConvoError),

    #[error("session is busy with an in-flight job")]
    Busy,

    #[error("no such job: {0}")]
    UnknownJob(u64),
}

pub type Result<T> = std::result::Result<T, SessionError>;
