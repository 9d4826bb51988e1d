use crate::error::{HoardGenericError, HoardResult};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

#[derive(PartialEq, Clone, Debug, Hash, Ord, PartialOrd, Eq, Copy)]
pub struct HoardEpochTime(i64);

impl HoardEpochTime {
    pub fn new(i: i64) -> Self {
        Self(i)
    }

    pub fn as_secs(self) -> i64 {
        self.0
    }
}

/// timezone offset in minutes
#[derive(PartialEq, Clone, Debug, Hash, Ord, PartialOrd, Eq, Copy)]
pub struct HoardTimeZoneOffset(i32);

impl HoardTimeZoneOffset {
    pub fn new(offset: i32) -> Self {
        Self(offset)
    }
}

#[derive(PartialEq, Clone, Debug, PartialOrd, Eq, Ord, Hash, Copy)]
pub struct HoardTime {
    pub(crate) time: HoardEpochTime,
    pub(crate) offset: HoardTimeZoneOffset,
}

impl HoardTime {
    pub fn now() -> Self {
        // fixed time under test so each run is deterministic
        // (commit oids depend on time which makes comparing oids impossible)
        if cfg!(test) {
            Self { time: HoardEpochTime(0), offset: HoardTimeZoneOffset(0) }
        } else {
            let now = chrono::offset::Local::now();
            let offset = HoardTimeZoneOffset(now.offset().local_minus_utc() / 60);
            let time = HoardEpochTime(now.timestamp());
            Self { time, offset }
        }
    }

    pub fn epoch_secs(self) -> i64 {
        self.time.0
    }
}

#[derive(PartialEq, Clone, Debug)]
pub struct HoardSignature {
    pub name: String,
    pub email: String,
    pub time: HoardTime,
}

impl HoardSignature {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self { name: name.into(), email: email.into(), time: HoardTime::now() }
    }
}

impl FromStr for HoardTimeZoneOffset {
    type Err = HoardGenericError;

    // format: (+|-)0200
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let sign = match &s[0..1] {
            "+" => 1,
            "-" => -1,
            _ => bail!("invalid timezone format `{}`", s),
        };
        let hours: i32 = s[1..3].parse()?;
        let minutes: i32 = s[3..5].parse()?;
        Ok(Self(sign * (minutes + hours * 60)))
    }
}

impl FromStr for HoardTime {
    type Err = HoardGenericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut splits = s.split_ascii_whitespace();
        let time = HoardEpochTime(
            splits.next().ok_or_else(|| anyhow!("missing timestamp in `{}`", s))?.parse()?,
        );
        let offset = splits.next().ok_or_else(|| anyhow!("missing timezone in `{}`", s))?.parse()?;
        Ok(Self { time, offset })
    }
}

impl FromStr for HoardSignature {
    type Err = HoardGenericError;

    // Example User <user@example.com> 1616061862 +1300
    fn from_str(s: &str) -> HoardResult<Self> {
        // assumes no < or > in name
        let email_start_idx = s.find('<').ok_or_else(|| anyhow!("invalid signature `{}`", s))?;
        let email_end_idx = s.find('>').ok_or_else(|| anyhow!("invalid signature `{}`", s))?;
        let name = s[..email_start_idx].trim().to_owned();
        let email = s[email_start_idx + 1..email_end_idx].to_owned();
        let time = s[email_end_idx + 1..].trim().parse()?;
        Ok(Self { name, email, time })
    }
}

impl Display for HoardTimeZoneOffset {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let sign = if self.0 >= 0 { '+' } else { '-' };
        let offset = self.0.abs();
        write!(f, "{}{:02}{:02}", sign, offset / 60, offset % 60)
    }
}

impl Display for HoardTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.time.0, self.offset)
    }
}

impl Display for HoardSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}> {}", self.name, self.email, self.time)
    }
}
