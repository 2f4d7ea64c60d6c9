use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Whole seconds since the unix epoch, as sftp v3 reports file times.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct UnixTimeStamp(u64);

impl UnixTimeStamp {
    /// Truncate `system_time` to whole seconds.
    ///
    /// Return `None` if `system_time` is before the unix epoch.
    pub fn new(system_time: SystemTime) -> Option<Self> {
        system_time
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|elapsed| Self(elapsed.as_secs()))
    }

    /// Return unix epoch, same as [`UnixTimeStamp::default`]
    pub const fn unix_epoch() -> Self {
        Self(0)
    }

    pub const fn from_raw(elapsed: u64) -> Self {
        Self(elapsed)
    }

    /// Into `u64` which is used to internally store the timestamp in seconds.
    pub const fn into_raw(self) -> u64 {
        self.0
    }

    /// Convert timestamp to [`Duration`].
    pub const fn as_duration(self) -> Duration {
        Duration::from_secs(self.0)
    }

    /// Convert timestamp back to [`SystemTime`].
    ///
    /// Return `None` if [`SystemTime`] cannot hold the timestamp.
    pub fn as_system_time(self) -> Option<SystemTime> {
        UNIX_EPOCH.checked_add(self.as_duration())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_time_conversion() {
        let ts = UnixTimeStamp::from_raw(1_700_000_000);
        let system_time = ts.as_system_time().unwrap();

        assert_eq!(UnixTimeStamp::new(system_time), Some(ts));
        assert_eq!(UnixTimeStamp::new(UNIX_EPOCH), Some(UnixTimeStamp::unix_epoch()));
    }
}
