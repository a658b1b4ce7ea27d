//! Backend commands queued from the terminal to the backend worker.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCommand {
    Connect,
    Assess { url: String },
    Quote,
    Pay,
    Claim,
    Disconnect,
    Status,
}

impl BackendCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Assess { .. } => "assess",
            Self::Quote => "quote",
            Self::Pay => "pay",
            Self::Claim => "claim",
            Self::Disconnect => "disconnect",
            Self::Status => "status",
        }
    }
}
