use crate::exit_codes::ExitCode;

#[derive(Debug)]
pub enum RunError {
    InvalidInput(anyhow::Error),
    AttackFailed(anyhow::Error),
    RuntimeError(anyhow::Error),
    Interrupted(anyhow::Error),
}

impl RunError {
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::InvalidInput(_) => ExitCode::InvalidInput,
            Self::AttackFailed(_) => ExitCode::AttackFailed,
            Self::RuntimeError(_) => ExitCode::RuntimeError,
            Self::Interrupted(_) => ExitCode::Interrupted,
        }
    }

    #[must_use]
    pub fn anyhow(&self) -> &anyhow::Error {
        match self {
            Self::InvalidInput(e)
            | Self::AttackFailed(e)
            | Self::RuntimeError(e)
            | Self::Interrupted(e) => e,
        }
    }
}

impl From<clair_load_core::Error> for RunError {
    fn from(err: clair_load_core::Error) -> Self {
        if err.is_cancelled() {
            Self::Interrupted(err.into())
        } else if err.is_configuration() {
            Self::InvalidInput(err.into())
        } else if err.is_runtime() {
            Self::RuntimeError(err.into())
        } else {
            Self::AttackFailed(err.into())
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.anyhow())
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.anyhow().as_ref())
    }
}
