//! Core type definitions shared across the workspace.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Data split type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DataSplit {
    /// Training data (stochastic transforms)
    Train,
    /// Validation data (deterministic transforms)
    Validation,
}

impl std::fmt::Display for DataSplit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSplit::Train => write!(f, "train"),
            DataSplit::Validation => write!(f, "val"),
        }
    }
}

/// Supported optimizer families
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OptimizerKind {
    /// SGD with momentum 0.9
    Sgd,
    /// Adam optimizer
    Adam,
    /// AdamW optimizer (decoupled weight decay)
    AdamW,
    /// RMSprop with momentum 0.9
    RmsProp,
}

impl OptimizerKind {
    /// All families, in the order they are documented
    pub const ALL: [OptimizerKind; 4] = [
        OptimizerKind::Sgd,
        OptimizerKind::Adam,
        OptimizerKind::AdamW,
        OptimizerKind::RmsProp,
    ];
}

impl std::fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptimizerKind::Sgd => write!(f, "SGD"),
            OptimizerKind::Adam => write!(f, "Adam"),
            OptimizerKind::AdamW => write!(f, "AdamW"),
            OptimizerKind::RmsProp => write!(f, "RMSprop"),
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        OptimizerKind::ALL
            .into_iter()
            .find(|kind| kind.to_string().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| {
                Error::Config(format!(
                    "unknown optimizer '{name}', expected one of: SGD, Adam, AdamW, RMSprop"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_split_display() {
        assert_eq!(DataSplit::Train.to_string(), "train");
        assert_eq!(DataSplit::Validation.to_string(), "val");
    }

    #[test]
    fn test_optimizer_parse_is_case_insensitive() {
        assert_eq!("sgd".parse::<OptimizerKind>().unwrap(), OptimizerKind::Sgd);
        assert_eq!("AdamW".parse::<OptimizerKind>().unwrap(), OptimizerKind::AdamW);
        assert_eq!("rmsprop".parse::<OptimizerKind>().unwrap(), OptimizerKind::RmsProp);
    }

    #[test]
    fn test_optimizer_display_roundtrip() {
        for kind in OptimizerKind::ALL {
            assert_eq!(kind.to_string().parse::<OptimizerKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_optimizer() {
        let err = "lamb".parse::<OptimizerKind>().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
