use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
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

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(RequestStatus {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

str_enum!(InsightTier {
    Global => "global",
    Cohort => "cohort",
    Individual => "individual",
});

str_enum!(InsightCategory {
    Sleep => "sleep",
    Mood => "mood",
    Diet => "diet",
    Medication => "medication",
    Bowel => "bowel",
    Behavior => "behavior",
    Seizure => "seizure",
    Weight => "weight",
    Therapy => "therapy",
    General => "general",
});

impl InsightCategory {
    /// Category of a factor, from the observation domain prefix of its metric name
    /// (`sleep_minutes` → Sleep, `mood_level` → Mood).
    pub fn from_factor(factor: &str) -> Self {
        let f = factor.to_ascii_lowercase();
        let prefixes: [(&str, Self); 12] = [
            ("sleep", Self::Sleep),
            ("mood", Self::Mood),
            ("diet", Self::Diet),
            ("food", Self::Diet),
            ("medication", Self::Medication),
            ("med_", Self::Medication),
            ("bowel", Self::Bowel),
            ("behavior", Self::Behavior),
            ("seizure", Self::Seizure),
            ("weight", Self::Weight),
            ("therapy", Self::Therapy),
            ("sensory", Self::Behavior),
        ];
        prefixes
            .iter()
            .find(|(p, _)| f.starts_with(p))
            .map(|(_, c)| *c)
            .unwrap_or(Self::General)
    }
}

str_enum!(PatternLinkKind {
    Family => "family",
    Cohort => "cohort",
});

str_enum!(RetirementReason {
    Contradicted => "contradicted",
    Administrative => "administrative",
});

str_enum!(InterrogativeStatus {
    Pending => "pending",
    Prompted => "prompted",
    Answered => "answered",
});

str_enum!(ValidationType {
    ProviderConfirmed => "provider_confirmed",
    ProviderSuspected => "provider_suspected",
    CaregiverReported => "caregiver_reported",
});

impl ValidationType {
    /// Only a provider confirmation marks an insight as clinically validated.
    pub fn is_clinical(&self) -> bool {
        matches!(self, Self::ProviderConfirmed)
    }
}

str_enum!(ChangeType {
    MedicationStarted => "medication_started",
    MedicationStopped => "medication_stopped",
    DoseAdjusted => "dose_adjusted",
    TherapyChanged => "therapy_changed",
    DietChanged => "diet_changed",
    Other => "other",
});

str_enum!(PromptSource {
    Insight => "insight",
    Provider => "provider",
    Caregiver => "caregiver",
    Other => "other",
});

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn request_status_round_trip() {
        for (variant, s) in [
            (RequestStatus::Pending, "pending"),
            (RequestStatus::Processing, "processing"),
            (RequestStatus::Completed, "completed"),
            (RequestStatus::Failed, "failed"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(RequestStatus::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(RequestStatus::Completed.is_terminal());
        assert!(RequestStatus::Failed.is_terminal());
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(!RequestStatus::Processing.is_terminal());
    }

    #[test]
    fn interrogative_status_round_trip() {
        for (variant, s) in [
            (InterrogativeStatus::Pending, "pending"),
            (InterrogativeStatus::Prompted, "prompted"),
            (InterrogativeStatus::Answered, "answered"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(InterrogativeStatus::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn invalid_enum_value_rejected() {
        let err = InsightTier::from_str("planetary").unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidEnum { .. }));
    }

    #[test]
    fn category_from_factor_prefix() {
        assert_eq!(InsightCategory::from_factor("sleep_minutes"), InsightCategory::Sleep);
        assert_eq!(InsightCategory::from_factor("Mood_level"), InsightCategory::Mood);
        assert_eq!(InsightCategory::from_factor("food_dairy_servings"), InsightCategory::Diet);
        assert_eq!(InsightCategory::from_factor("step_count"), InsightCategory::General);
    }

    #[test]
    fn only_provider_confirmation_is_clinical() {
        assert!(ValidationType::ProviderConfirmed.is_clinical());
        assert!(!ValidationType::ProviderSuspected.is_clinical());
        assert!(!ValidationType::CaregiverReported.is_clinical());
    }
}
