use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid value for {field}: {value}")]
pub struct InvalidEnum {
    pub field: String,
    pub value: String,
}

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = InvalidEnum;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(FlowStage {
    Idle => "idle",
    Capturing => "capturing",
    Processing => "processing",
    ErrorRecovery => "error_recovery",
    Reviewing => "reviewing",
    Submitting => "submitting",
    Complete => "complete",
});

str_enum!(ProcessingStage {
    Upload => "upload",
    Process => "process",
    Extract => "extract",
    Complete => "complete",
    Error => "error",
});

str_enum!(RecoveryStage {
    Quality => "quality",
    Extraction => "extraction",
});

str_enum!(Recommendation {
    Accept => "accept",
    Retake => "retake",
});

str_enum!(RoundingMode {
    Round => "round",
    Floor => "floor",
    Ceil => "ceil",
});

str_enum!(NotificationKind {
    Info => "info",
    Success => "success",
    Warning => "warning",
    Error => "error",
});

impl Default for FlowStage {
    fn default() -> Self {
        Self::Idle
    }
}

impl Default for RoundingMode {
    fn default() -> Self {
        Self::Round
    }
}

impl FlowStage {
    /// Stages that hold an in-progress session (everything except the two rest states).
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle | Self::Complete)
    }
}
