pub mod duration {
    use std::ops::Deref;

    use chrono::Duration;
    use color_eyre::{
        eyre::{bail, eyre, Context as _},
        Result,
    };
    use itertools::Itertools as _;
    use serde::Deserialize;

    /// Retention windows and similar spans, written as `<int><unit>` with unit one of `d`, `h`, `m`, `s`, `ms`.
    #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
    #[serde(try_from = "String")]
    pub struct DurationWrapper(pub chrono::Duration);

    impl TryFrom<String> for DurationWrapper {
        type Error = color_eyre::Report;

        fn try_from(value: String) -> Result<Self, Self::Error> {
            Self::try_from(value.as_str())
        }
    }

    impl TryFrom<&str> for DurationWrapper {
        type Error = color_eyre::Report;

        fn try_from(value: &str) -> Result<Self, Self::Error> {
            let chars = value.trim().chars().collect_vec();
            let (time, time_str, parse_fn): (&[char], &str, fn(i64) -> Option<Duration>) = match chars.as_slice() {
                [milliseconds @ .., 'm', 's'] => (milliseconds, "milliseconds", Duration::try_milliseconds),
                [seconds @ .., 's'] => (seconds, "seconds", Duration::try_seconds),
                [minutes @ .., 'm'] => (minutes, "minutes", Duration::try_minutes),
                [hours @ .., 'h'] => (hours, "hours", Duration::try_hours),
                [days @ .., 'd'] => (days, "days", Duration::try_days),
                x => bail!(
                    "parsing duration: {x}: invalid suffix (only d, h, m, s, ms)",
                    x = x.iter().collect::<String>()
                ),
            };
            let time = time.iter().collect::<String>();
            Ok(DurationWrapper(time.parse::<i64>().context("parsing duration from string").and_then(
                |dur| parse_fn(dur).ok_or_else(|| eyre!("Could not parse {} as {}", time, time_str)),
            )?))
        }
    }

    impl Deref for DurationWrapper {
        type Target = Duration;

        fn deref(&self) -> &Self::Target {
            &self.0
        }
    }
}

pub mod file_mode {
    use color_eyre::eyre::{eyre, Context as _};
    use serde::Deserialize;

    /// Unix permission bits, written in octal (`"0644"`, `"644"` or `"0o644"`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
    #[serde(try_from = "String")]
    pub struct FileMode(pub u32);

    /// `rw-r--r--`: owner read/write, group and other read only.
    pub const PUBLISHED: FileMode = FileMode(0o644);

    impl Default for FileMode {
        fn default() -> Self {
            PUBLISHED
        }
    }

    impl TryFrom<String> for FileMode {
        type Error = color_eyre::Report;

        fn try_from(value: String) -> Result<Self, Self::Error> {
            let digits = value.trim();
            let digits = digits.strip_prefix("0o").unwrap_or(digits);
            let mode = u32::from_str_radix(digits, 8).wrap_err_with(|| format!("parsing file mode `{value}` as octal"))?;
            if mode > 0o777 {
                return Err(eyre!("file mode {value} has bits outside of 0o777"));
            }
            Ok(FileMode(mode))
        }
    }
}

pub use duration::DurationWrapper as Duration;
pub use file_mode::FileMode;

#[allow(non_snake_case)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn Duration__try_from_string() {
        assert_eq!(Duration::try_from("35s").unwrap(), Duration(chrono::Duration::seconds(35)));
        assert_eq!(Duration::try_from("27m").unwrap(), Duration(chrono::Duration::minutes(27)));
        assert_eq!(Duration::try_from("3h").unwrap(), Duration(chrono::Duration::hours(3)));
        assert_eq!(Duration::try_from("365d").unwrap(), Duration(chrono::Duration::days(365)));
        assert_eq!(Duration::try_from("500ms").unwrap(), Duration(chrono::Duration::milliseconds(500)));

        assert!(Duration::try_from("500").is_err());
        assert!(Duration::try_from("400k").is_err());
        assert!(Duration::try_from("400jkl").is_err());
        assert!(Duration::try_from("d").is_err());
    }

    #[test]
    fn FileMode__try_from_string() {
        assert_eq!(FileMode::try_from("0644".to_string()).unwrap(), FileMode(0o644));
        assert_eq!(FileMode::try_from("440".to_string()).unwrap(), FileMode(0o440));
        assert_eq!(FileMode::try_from("0o640".to_string()).unwrap(), FileMode(0o640));

        assert!(FileMode::try_from("0689".to_string()).is_err());
        assert!(FileMode::try_from("7777".to_string()).is_err());
        assert!(FileMode::try_from("rw-r--r--".to_string()).is_err());
    }
}
