use core::fmt;

/// Configuration value that failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Field {
    Id,
    Speed,
    Deadband,
    SoftStart,
    RawAngleFor850,
    RawAngleFor1500,
    RawAngleFor2150,
    FailSafe,
    OverloadProtection,
    SensitivityRatio,
    TargetPulse,
}

/* ------------------------------------------------------------------------- */
/*  Error enum                                                               */
/* ------------------------------------------------------------------------- */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Nothing pulled the line low after a read request.
    NoServo,
    /// A servo answered but the line never floated high afterwards.
    NoResistor,
    /// Framing, echo or checksum mismatch, or a register value the codec
    /// does not recognize.
    Corrupt,
    UnsupportedModel,
    NotAttached,
    Validation(Field),
}

impl Error {
    /// What the person at the bench should do about it.
    pub fn remedy(&self) -> &'static str {
        match self {
            Error::NoServo => "check the servo wiring and power",
            Error::NoResistor => "add a ~2k pull-up resistor between the signal line and 5V",
            Error::Corrupt => "bad data on the line, retry the operation",
            Error::UnsupportedModel => "this servo model has no known register tables",
            Error::NotAttached => "attach the servo to a pin first",
            Error::Validation(_) => "pick a value from the setting's legal range",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoServo => write!(f, "no servo detected"),
            Error::NoResistor => write!(f, "servo detected but the line pull-up is missing"),
            Error::Corrupt => write!(f, "corrupt response from servo"),
            Error::UnsupportedModel => write!(f, "unsupported servo model"),
            Error::NotAttached => write!(f, "servo is not attached"),
            Error::Validation(field) => write!(f, "illegal value for {:?}", field),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
