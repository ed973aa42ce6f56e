use crate::db::DatabaseError;

/// Macro to generate enum with as_str + std::str::FromStr pattern.
/// Serde goes through the same string table so the wire form and the
/// stored form never drift apart.
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$(Self::$variant),+];

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

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(|_| {
                    let expected: Vec<&str> = Self::ALL.iter().map(|v| v.as_str()).collect();
                    serde::de::Error::custom(format!(
                        "\"{raw}\" is not a valid choice (expected one of: {})",
                        expected.join(", ")
                    ))
                })
            }
        }
    };
}

str_enum!(Role {
    Patient => "patient",
    Doctor => "doctor",
    Caregiver => "caregiver",
    Admin => "admin",
});

str_enum!(BloodType {
    APositive => "A+",
    ANegative => "A-",
    BPositive => "B+",
    BNegative => "B-",
    AbPositive => "AB+",
    AbNegative => "AB-",
    OPositive => "O+",
    ONegative => "O-",
    Unknown => "Unknown",
});

str_enum!(Gender {
    Male => "male",
    Female => "female",
    Other => "other",
    PreferNotToSay => "prefer_not_to_say",
});

str_enum!(Relationship {
    Spouse => "spouse",
    Child => "child",
    Parent => "parent",
    Sibling => "sibling",
    Other => "other",
});

str_enum!(Frequency {
    OnceDaily => "once_daily",
    TwiceDaily => "twice_daily",
    ThriceDaily => "thrice_daily",
    FourTimesDaily => "four_times_daily",
    AsNeeded => "as_needed",
    Weekly => "weekly",
    Monthly => "monthly",
});

str_enum!(NotificationType {
    Push => "push",
    Email => "email",
    Sms => "sms",
    All => "all",
});

str_enum!(LogStatus {
    Taken => "taken",
    Missed => "missed",
    Skipped => "skipped",
    Late => "late",
});

str_enum!(InteractionSeverity {
    Minor => "minor",
    Moderate => "moderate",
    Major => "major",
    Contraindicated => "contraindicated",
});

str_enum!(PrescriptionStatus {
    Active => "active",
    Completed => "completed",
    Cancelled => "cancelled",
    Expired => "expired",
});

str_enum!(PrescriptionSource {
    Manual => "manual",
    Ocr => "ocr",
    Electronic => "electronic",
});

str_enum!(BmiCategory {
    Underweight => "underweight",
    Normal => "normal",
    Overweight => "overweight",
    Obese => "obese",
});

impl LogStatus {
    /// Doses that count toward adherence.
    pub fn counts_as_taken(&self) -> bool {
        matches!(self, LogStatus::Taken | LogStatus::Late)
    }
}

impl Frequency {
    /// Hours of the day at which default reminders fire.
    pub fn default_reminder_hours(&self) -> &'static [u32] {
        match self {
            Frequency::OnceDaily => &[9],
            Frequency::TwiceDaily => &[9, 21],
            Frequency::ThriceDaily => &[8, 14, 20],
            Frequency::FourTimesDaily => &[8, 12, 16, 20],
            Frequency::AsNeeded | Frequency::Weekly | Frequency::Monthly => &[],
        }
    }
}
