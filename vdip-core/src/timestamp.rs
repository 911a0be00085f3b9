//! MS-DOS FAT date/time stamps.
//!
//! Date word: bits 9-15 year since 1980, 5-8 month, 0-4 day.
//! Time word: bits 11-15 hour, 5-10 minute, 0-4 seconds / 2.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{VdipError, VdipResult};
use crate::hex::push_hex_byte;

const FAT_EPOCH_YEAR: u32 = 1980;
const FAT_LAST_YEAR: u32 = FAT_EPOCH_YEAR + 127;

/// A packed FAT date and time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FatTimestamp {
    pub date: u16,
    pub time: u16,
}

impl FatTimestamp {
    pub fn from_raw(date: u16, time: u16) -> Self {
        Self { date, time }
    }

    /// Build from calendar components. Odd seconds round down.
    pub fn new(
        year: u32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
        second: u32,
    ) -> VdipResult<Self> {
        if !(FAT_EPOCH_YEAR..=FAT_LAST_YEAR).contains(&year) {
            return Err(VdipError::InvalidArgument(format!(
                "year {} outside {}..={}",
                year, FAT_EPOCH_YEAR, FAT_LAST_YEAR
            )));
        }
        if !(1..=12).contains(&month) || day == 0 || day > days_in_month(month, year) {
            return Err(VdipError::InvalidArgument(format!(
                "invalid date {}-{:02}-{:02}",
                year, month, day
            )));
        }
        if hour > 23 || minute > 59 || second > 59 {
            return Err(VdipError::InvalidArgument(format!(
                "invalid time {:02}:{:02}:{:02}",
                hour, minute, second
            )));
        }
        Ok(Self::pack(year, month, day, hour, minute, second))
    }

    fn pack(year: u32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> Self {
        let date = ((year - FAT_EPOCH_YEAR) << 9) | (month << 5) | day;
        let time = (hour << 11) | (minute << 5) | (second / 2);
        Self {
            date: date as u16,
            time: time as u16,
        }
    }

    /// Convert a host time (UTC). Times outside the FAT range clamp to its
    /// first or last representable second.
    pub fn from_system_time(t: SystemTime) -> Self {
        let secs = t
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let days = (secs / 86_400) as i64;
        let rem = (secs % 86_400) as u32;
        let (year, month, day) = civil_from_days(days);

        if year < FAT_EPOCH_YEAR as i64 {
            return Self::pack(FAT_EPOCH_YEAR, 1, 1, 0, 0, 0);
        }
        if year > FAT_LAST_YEAR as i64 {
            return Self::pack(FAT_LAST_YEAR, 12, 31, 23, 59, 58);
        }
        Self::pack(year as u32, month, day, rem / 3600, (rem / 60) % 60, rem % 60)
    }

    /// Decode the 4 trailing bytes of a `dirt` response: time then date,
    /// each least significant byte first.
    pub fn from_le_bytes(bytes: [u8; 4]) -> Self {
        Self {
            time: u16::from_le_bytes([bytes[0], bytes[1]]),
            date: u16::from_le_bytes([bytes[2], bytes[3]]),
        }
    }

    pub fn year(&self) -> u32 {
        FAT_EPOCH_YEAR + u32::from((self.date >> 9) & 0x7F)
    }

    pub fn month(&self) -> u32 {
        u32::from((self.date >> 5) & 0x0F)
    }

    pub fn day(&self) -> u32 {
        u32::from(self.date & 0x1F)
    }

    pub fn hour(&self) -> u32 {
        u32::from((self.time >> 11) & 0x1F)
    }

    pub fn minute(&self) -> u32 {
        u32::from((self.time >> 5) & 0x3F)
    }

    pub fn second(&self) -> u32 {
        u32::from(self.time & 0x1F) * 2
    }

    /// Parameter appended to `opw` and `mkd`: ` $DDDDTTTT`.
    pub fn to_param(&self) -> String {
        let mut s = String::with_capacity(10);
        s.push_str(" $");
        for b in self.date.to_be_bytes().into_iter().chain(self.time.to_be_bytes()) {
            push_hex_byte(&mut s, b);
        }
        s
    }
}

impl FatTimestamp {
    /// `MM/DD/YY`, month space-padded.
    pub fn date_string(&self) -> String {
        format!("{:2}/{:02}/{:02}", self.month(), self.day(), self.year() % 100)
    }

    /// `HH:MM AM` on a 12-hour clock, hour space-padded.
    pub fn time_string(&self) -> String {
        let (hour, suffix) = match self.hour() {
            0 => (12, "AM"),
            h @ 1..=11 => (h, "AM"),
            12 => (12, "PM"),
            h => (h - 12, "PM"),
        };
        format!("{:2}:{:02} {}", hour, self.minute(), suffix)
    }
}

impl fmt::Display for FatTimestamp {
    /// `MM/DD/YY  HH:MM AM`, the way directory listings print it.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}  {}", self.date_string(), self.time_string())
    }
}

fn is_leap(year: u32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(month: u32, year: u32) -> u32 {
    match month {
        4 | 6 | 9 | 11 => 30,
        2 if is_leap(year) => 29,
        2 => 28,
        _ => 31,
    }
}

/// Days since 1970-01-01 to (year, month, day).
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = (if z >= 0 { z } else { z - 146_096 }) / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe as i64 + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pack_and_unpack() {
        let ts = FatTimestamp::new(2024, 3, 7, 14, 5, 31).unwrap();
        assert_eq!(ts.year(), 2024);
        assert_eq!(ts.month(), 3);
        assert_eq!(ts.day(), 7);
        assert_eq!(ts.hour(), 14);
        assert_eq!(ts.minute(), 5);
        assert_eq!(ts.second(), 30);
        assert_eq!(ts.date, (44 << 9) | (3 << 5) | 7);
    }

    #[test]
    fn test_rejects_bad_components() {
        assert!(FatTimestamp::new(1979, 1, 1, 0, 0, 0).is_err());
        assert!(FatTimestamp::new(2023, 2, 29, 0, 0, 0).is_err());
        assert!(FatTimestamp::new(2024, 2, 29, 0, 0, 0).is_ok());
        assert!(FatTimestamp::new(2024, 1, 1, 24, 0, 0).is_err());
    }

    #[test]
    fn test_to_param() {
        let ts = FatTimestamp::from_raw(0x5867, 0x70A0);
        assert_eq!(ts.to_param(), " $586770A0");
    }

    #[test]
    fn test_from_system_time() {
        // 2022-01-31 12:34:56 UTC
        let t = UNIX_EPOCH + Duration::from_secs(1_643_632_496);
        let ts = FatTimestamp::from_system_time(t);
        assert_eq!((ts.year(), ts.month(), ts.day()), (2022, 1, 31));
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (12, 34, 56));
    }

    #[test]
    fn test_from_system_time_leap_day() {
        // 2000-02-29 00:00:00 UTC
        let t = UNIX_EPOCH + Duration::from_secs(951_782_400);
        let ts = FatTimestamp::from_system_time(t);
        assert_eq!((ts.year(), ts.month(), ts.day()), (2000, 2, 29));
    }

    #[test]
    fn test_from_system_time_clamps() {
        let ts = FatTimestamp::from_system_time(UNIX_EPOCH);
        assert_eq!((ts.year(), ts.month(), ts.day()), (1980, 1, 1));
        assert_eq!(ts.time, 0);
    }

    #[test]
    fn test_from_le_bytes() {
        let ts = FatTimestamp::from_le_bytes([0xA0, 0x70, 0x67, 0x58]);
        assert_eq!(ts, FatTimestamp::from_raw(0x5867, 0x70A0));
    }

    #[test]
    fn test_display() {
        let ts = FatTimestamp::new(2024, 3, 7, 14, 5, 0).unwrap();
        assert_eq!(ts.to_string(), " 3/07/24   2:05 PM");
        let midnight = FatTimestamp::new(1999, 12, 31, 0, 30, 0).unwrap();
        assert_eq!(midnight.to_string(), "12/31/99  12:30 AM");
    }
}
