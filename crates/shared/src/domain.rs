use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(SessionId);
id_newtype!(RequestId);
id_newtype!(ChainId);

impl ChainId {
    pub const MAINNET: ChainId = ChainId(1);
    pub const SEPOLIA: ChainId = ChainId(11_155_111);

    pub fn network_name(self) -> Option<&'static str> {
        match self {
            Self::MAINNET => Some("Ethereum Mainnet"),
            Self::SEPOLIA => Some("Sepolia"),
            _ => None,
        }
    }
}

pub const MAX_RISK_SCORE: u8 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("risk score {0} is outside 0..=100")]
pub struct RiskScoreOutOfRange(pub i64);

/// Cyber-risk score of a URL as produced by the scoring service, always within `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct RiskScore(u8);

impl RiskScore {
    pub fn new(value: u8) -> Result<Self, RiskScoreOutOfRange> {
        Self::try_from(i64::from(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for RiskScore {
    type Error = RiskScoreOutOfRange;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match u8::try_from(value) {
            Ok(score) if score <= MAX_RISK_SCORE => Ok(Self(score)),
            _ => Err(RiskScoreOutOfRange(value)),
        }
    }
}

impl From<RiskScore> for u8 {
    fn from(value: RiskScore) -> Self {
        value.0
    }
}

impl fmt::Display for RiskScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
