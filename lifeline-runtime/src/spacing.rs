use crate::error::LifelineError;
use crate::time_unit::TimeUnit;
use std::time::Duration;

/// Window length for debounce and throttle calls, plus the optional
/// `immediate` flag. Each operation picks its own default for `immediate`.
///
/// ```
/// use lifeline_runtime::Spacing;
/// use std::time::Duration;
///
/// let s: Spacing = "250ms".parse().unwrap();
/// assert_eq!(s.duration, Duration::from_millis(250));
/// assert!("soon".parse::<Spacing>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Spacing {
    pub duration: Duration,
    pub immediate: Option<bool>,
}

impl Spacing {
    pub fn new(duration: Duration) -> Self {
        Self { duration, immediate: None }
    }

    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = Some(immediate);
        self
    }

    pub(crate) fn immediate_or(&self, default: bool) -> bool {
        self.immediate.unwrap_or(default)
    }
}

impl From<Duration> for Spacing {
    fn from(duration: Duration) -> Self {
        Spacing::new(duration)
    }
}

/// Plain milliseconds.
impl From<u64> for Spacing {
    fn from(millis: u64) -> Self {
        Spacing::new(Duration::from_millis(millis))
    }
}

impl std::str::FromStr for Spacing {
    type Err = LifelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TimeUnit::parse_duration(s)
            .map(Spacing::new)
            .ok_or_else(|| LifelineError::InvalidSpacing { value: s.to_string() })
    }
}

impl TryFrom<&str> for Spacing {
    type Error = LifelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Convert any accepted spacing form, surfacing parse failures as
/// [`LifelineError::InvalidSpacing`].
pub(crate) fn resolve<S>(spacing: S) -> Result<Spacing, LifelineError>
where
    S: TryInto<Spacing>,
    LifelineError: From<S::Error>,
{
    Ok(spacing.try_into()?)
}
