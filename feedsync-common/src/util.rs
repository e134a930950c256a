use thiserror::Error;
use time::Duration;

/// A strictly positive span of time, used for backoffs and timeouts.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub struct PositiveDuration(Duration);

impl PositiveDuration {
    #[must_use]
    pub fn new(duration: Duration) -> Option<Self> {
        duration.is_positive().then_some(Self(duration))
    }

    #[must_use]
    pub fn new_unchecked(duration: Duration) -> Self {
        Self::new(duration).expect("Duration was not positive.")
    }

    pub fn from_millis(millis: u64) -> Result<Self, NonPositiveDurationError> {
        let millis = i64::try_from(millis).unwrap_or(i64::MAX);
        Duration::milliseconds(millis).try_into()
    }

    #[must_use]
    pub fn get(&self) -> Duration {
        self.0
    }

    #[must_use]
    pub fn to_std(&self) -> std::time::Duration {
        #[allow(clippy::cast_sign_loss)]
        std::time::Duration::new(self.0.whole_seconds() as u64, self.0.subsec_nanoseconds() as u32)
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The duration is not positive: {0}")]
pub struct NonPositiveDurationError(Duration);

impl TryFrom<Duration> for PositiveDuration {
    type Error = NonPositiveDurationError;

    fn try_from(value: Duration) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(NonPositiveDurationError(value))
    }
}
