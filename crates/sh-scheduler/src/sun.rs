//! Sunrise/sunset expressions
//!
//! Syntax: `[HH:MM<](sunrise|sunset)[+|-offset[m]][<HH:MM]`
//!
//! A bare offset is a solar elevation in degrees, an offset suffixed with
//! `m` shifts the event by minutes. The optional `HH:MM<` and `<HH:MM`
//! clauses clamp the result to a minimum and maximum local wall-clock time
//! on the event's day.

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use std::f64::consts::PI;
use std::str::FromStr;

use crate::error::{SchedulerError, SchedulerResult};

/// Something that can compute sun events for a location
pub trait SunSource: Send + Sync {
    /// First sunrise strictly after `after` at the given solar elevation
    fn next_rising(&self, after: DateTime<Utc>, degrees: f64) -> Option<DateTime<Utc>>;

    /// First sunset strictly after `after` at the given solar elevation
    fn next_setting(&self, after: DateTime<Utc>, degrees: f64) -> Option<DateTime<Utc>>;
}

/// Observer location using the standard sunrise equation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sun {
    pub latitude: f64,
    pub longitude: f64,
    /// Metres above sea level
    pub elevation: f64,
}

const J2000: f64 = 2_451_545.0;
const UNIX_EPOCH_JD: f64 = 2_440_587.5;

fn sin_deg(x: f64) -> f64 {
    (x * PI / 180.0).sin()
}

fn cos_deg(x: f64) -> f64 {
    (x * PI / 180.0).cos()
}

impl Sun {
    pub fn new(latitude: f64, longitude: f64, elevation: f64) -> Self {
        Self {
            latitude,
            longitude,
            elevation,
        }
    }

    /// Solar-centre elevation the event is computed for
    ///
    /// `0` selects the apparent horizon: refraction plus solar radius,
    /// lowered further by the horizon dip at the observer's elevation.
    fn horizon(&self, degrees: f64) -> f64 {
        if degrees == 0.0 {
            -0.833 - 2.076 * self.elevation.max(0.0).sqrt() / 60.0
        } else {
            degrees
        }
    }

    /// Rise and set of the solar day around noon of `date`, `None` when the
    /// sun never crosses the horizon that day
    fn events_on(&self, date: NaiveDate, degrees: f64) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let epoch = NaiveDate::from_ymd_opt(2000, 1, 1)?;
        let n = (date - epoch).num_days() as f64;

        let mean_noon = n - self.longitude / 360.0;
        let anomaly = (357.5291 + 0.985_600_28 * mean_noon).rem_euclid(360.0);
        let center = 1.9148 * sin_deg(anomaly)
            + 0.0200 * sin_deg(2.0 * anomaly)
            + 0.0003 * sin_deg(3.0 * anomaly);
        let ecliptic = (anomaly + center + 180.0 + 102.9372).rem_euclid(360.0);
        let transit =
            J2000 + mean_noon + 0.0053 * sin_deg(anomaly) - 0.0069 * sin_deg(2.0 * ecliptic);

        let sin_decl = sin_deg(ecliptic) * sin_deg(23.4397);
        let cos_decl = (1.0 - sin_decl * sin_decl).sqrt();
        let cos_hour = (sin_deg(self.horizon(degrees)) - sin_deg(self.latitude) * sin_decl)
            / (cos_deg(self.latitude) * cos_decl);
        if !(-1.0..=1.0).contains(&cos_hour) {
            return None;
        }
        let hour_angle = cos_hour.acos() * 180.0 / PI;

        let rise = julian_to_utc(transit - hour_angle / 360.0)?;
        let set = julian_to_utc(transit + hour_angle / 360.0)?;
        Some((rise, set))
    }

    fn next_event(&self, after: DateTime<Utc>, degrees: f64, rising: bool) -> Option<DateTime<Utc>> {
        let start = after.date_naive();
        (-1..=2)
            .filter_map(|offset| start.checked_add_signed(Duration::days(offset)))
            .filter_map(|date| self.events_on(date, degrees))
            .map(|(rise, set)| if rising { rise } else { set })
            .find(|t| *t > after)
    }
}

fn julian_to_utc(jd: f64) -> Option<DateTime<Utc>> {
    let millis = ((jd - UNIX_EPOCH_JD) * 86_400_000.0).round() as i64;
    DateTime::from_timestamp_millis(millis)
}

impl SunSource for Sun {
    fn next_rising(&self, after: DateTime<Utc>, degrees: f64) -> Option<DateTime<Utc>> {
        self.next_event(after, degrees, true)
    }

    fn next_setting(&self, after: DateTime<Utc>, degrees: f64) -> Option<DateTime<Utc>> {
        self.next_event(after, degrees, false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SunEvent {
    Sunrise,
    Sunset,
}

/// Offset applied to a sun event
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SunOffset {
    /// Solar elevation in degrees; `0` is the apparent horizon
    Degrees(f64),
    /// Shift of the event time
    Minutes(i64),
}

/// A parsed sunrise/sunset expression
#[derive(Debug, Clone, PartialEq)]
pub struct SunExpr {
    pub event: SunEvent,
    pub offset: SunOffset,
    pub min: Option<NaiveTime>,
    pub max: Option<NaiveTime>,
}

/// Whether an expression uses the sun syntax rather than crontab fields
pub fn is_sun_expr(expr: &str) -> bool {
    expr.contains("sunrise") || expr.contains("sunset")
}

fn parse_clock(expr: &str, s: &str) -> SchedulerResult<NaiveTime> {
    let err = || SchedulerError::InvalidSun {
        expr: expr.to_string(),
        reason: format!("'{s}' is not a HH:MM time"),
    };
    let (h, m) = s.trim().split_once(':').ok_or_else(err)?;
    let h: u32 = h.trim().parse().map_err(|_| err())?;
    let m: u32 = m.trim().parse().map_err(|_| err())?;
    NaiveTime::from_hms_opt(h, m, 0).ok_or_else(err)
}

impl FromStr for SunExpr {
    type Err = SchedulerError;

    fn from_str(expr: &str) -> SchedulerResult<Self> {
        let parts: Vec<&str> = expr.split('<').map(str::trim).collect();
        let (min, core, max) = match parts.as_slice() {
            [core] => (None, *core, None),
            [core, max] if core.starts_with("sun") => (None, *core, Some(*max)),
            [min, core] => (Some(*min), *core, None),
            [min, core, max] => (Some(*min), *core, Some(*max)),
            _ => {
                return Err(SchedulerError::InvalidSun {
                    expr: expr.to_string(),
                    reason: "too many '<' clauses".to_string(),
                })
            }
        };

        let (event, rest) = if let Some(rest) = core.strip_prefix("sunrise") {
            (SunEvent::Sunrise, rest)
        } else if let Some(rest) = core.strip_prefix("sunset") {
            (SunEvent::Sunset, rest)
        } else {
            return Err(SchedulerError::InvalidSun {
                expr: expr.to_string(),
                reason: "expected sunrise or sunset".to_string(),
            });
        };

        let rest = rest.trim();
        let offset = if rest.is_empty() {
            SunOffset::Degrees(0.0)
        } else {
            let bad_offset = || SchedulerError::InvalidSun {
                expr: expr.to_string(),
                reason: format!("invalid offset '{rest}'"),
            };
            let (sign, amount) = match rest.as_bytes()[0] {
                b'+' => (1.0, rest[1..].trim()),
                b'-' => (-1.0, rest[1..].trim()),
                _ => return Err(bad_offset()),
            };
            if let Some(minutes) = amount.strip_suffix('m') {
                let minutes: i64 = minutes.trim().parse().map_err(|_| bad_offset())?;
                SunOffset::Minutes(sign as i64 * minutes)
            } else {
                let degrees: f64 = amount.parse().map_err(|_| bad_offset())?;
                SunOffset::Degrees(sign * degrees)
            }
        };

        Ok(Self {
            event,
            offset,
            min: min.map(|s| parse_clock(expr, s)).transpose()?,
            max: max.map(|s| parse_clock(expr, s)).transpose()?,
        })
    }
}

fn at_local_time(day: &DateTime<Local>, time: NaiveTime) -> Option<DateTime<Local>> {
    Local
        .from_local_datetime(&day.date_naive().and_time(time))
        .earliest()
}

impl SunExpr {
    /// Next fire time after `now`, `None` if the sun never reaches the
    /// requested elevation in the search window
    pub fn next_after(&self, now: DateTime<Local>, sun: &dyn SunSource) -> Option<DateTime<Local>> {
        let (degrees, minutes) = match self.offset {
            SunOffset::Degrees(d) => (d, 0),
            SunOffset::Minutes(m) => (0.0, m),
        };
        let shift = Duration::try_minutes(minutes)?;
        let mut search = now.with_timezone(&Utc).checked_sub_signed(shift)?;

        for _ in 0..3 {
            let event = match self.event {
                SunEvent::Sunrise => sun.next_rising(search, degrees)?,
                SunEvent::Sunset => sun.next_setting(search, degrees)?,
            };
            let candidate = event.checked_add_signed(shift)?.with_timezone(&Local);
            let resolved = self.clamp(candidate, now);
            if resolved > now {
                return Some(resolved);
            }
            search = event + Duration::minutes(1);
        }
        None
    }

    fn clamp(&self, candidate: DateTime<Local>, now: DateTime<Local>) -> DateTime<Local> {
        let mut next = candidate;
        if let Some(dmin) = self.min.and_then(|t| at_local_time(&candidate, t)) {
            if dmin > next {
                next = dmin;
            }
        }
        if let Some(mut dmax) = self.max.and_then(|t| at_local_time(&candidate, t)) {
            if dmax < next {
                if dmax <= now {
                    dmax += Duration::days(1);
                }
                next = dmax;
            }
        }
        next
    }
}
