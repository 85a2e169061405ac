// quantitation.rs
//
// Metadata describing what a data vector holds. The enums parse from and render to
// the upper-case literals used in exported files.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PreprocessError;

macro_rules! literal_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $lit:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $lit),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = PreprocessError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($lit => Ok($name::$variant),)+
                    other => Err(PreprocessError::InvalidArgument(format!(
                        "'{}' is not a valid {} (expected one of {:?})",
                        other,
                        stringify!($name),
                        [$($lit),+]
                    ))),
                }
            }
        }
    };
}

literal_enum!(
    /// Broad kind of values in a vector.
    GeneralType {
        Quantitative => "QUANTITATIVE",
        Categorical => "CATEGORICAL",
        Unknown => "UNKNOWN",
    }
);

literal_enum!(
    /// Scale the values are expressed on.
    ScaleType {
        Linear => "LINEAR",
        Ln => "LN",
        Log2 => "LOG2",
        Log10 => "LOG10",
        LogBaseUnknown => "LOGBASEUNKNOWN",
        FoldChange => "FOLDCHANGE",
        Other => "OTHER",
        Unscaled => "UNSCALED",
        Percent => "PERCENT",
        Count => "COUNT",
    }
);

literal_enum!(
    /// Storage representation of a single value.
    PrimitiveType {
        Double => "DOUBLE",
        Int => "INT",
        Long => "LONG",
        Boolean => "BOOLEAN",
        String => "STRING",
    }
);

literal_enum!(
    StandardQuantitationType {
        PresentAbsent => "PRESENTABSENT",
        Amount => "AMOUNT",
        Correlation => "CORRELATION",
        Failed => "FAILED",
        Other => "OTHER",
    }
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantitationType {
    pub name: String,
    pub description: String,
    pub general_type: GeneralType,
    pub representation: PrimitiveType,
    pub scale: ScaleType,
    pub kind: StandardQuantitationType,
    pub is_background: bool,
    pub is_preferred: bool,
    pub is_background_subtracted: bool,
    pub is_normalized: bool,
    pub is_ratio: bool,
}

impl QuantitationType {
    /// The boolean present/absent type minted for each detection-call computation.
    pub fn detection_call(signal_to_noise_threshold: f64) -> Self {
        Self {
            name: "Detection call".to_string(),
            description: format!(
                "Detection call based on signal to noise threshold of {} (Computed by expression_preprocess)",
                signal_to_noise_threshold
            ),
            general_type: GeneralType::Categorical,
            representation: PrimitiveType::Boolean,
            scale: ScaleType::Other,
            kind: StandardQuantitationType::PresentAbsent,
            is_background: false,
            is_preferred: false,
            is_background_subtracted: false,
            is_normalized: false,
            is_ratio: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_literals_parse_case_insensitively() {
        assert_eq!("categorical".parse::<GeneralType>().unwrap(), GeneralType::Categorical);
        assert_eq!(" LOG2 ".parse::<ScaleType>().unwrap(), ScaleType::Log2);
        assert_eq!("Boolean".parse::<PrimitiveType>().unwrap(), PrimitiveType::Boolean);
        assert!("log7".parse::<ScaleType>().is_err());
    }

    #[test]
    fn test_display_matches_parse() {
        for scale in ScaleType::ALL {
            assert_eq!(scale.to_string().parse::<ScaleType>().unwrap(), *scale);
        }
    }

    #[test]
    fn test_detection_call_type() {
        let qt = QuantitationType::detection_call(2.0);
        assert_eq!(qt.name, "Detection call");
        assert_eq!(qt.general_type, GeneralType::Categorical);
        assert_eq!(qt.representation, PrimitiveType::Boolean);
        assert_eq!(qt.kind, StandardQuantitationType::PresentAbsent);
        assert!(qt.description.contains("threshold of 2"));
        assert!(!qt.is_preferred);
    }
}
