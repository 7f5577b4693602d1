//! Recurring backup scheduling.
//!
//! One job per process: a `Schedule` derived from the configuration, a
//! `ScheduledJob` tracking the next fire time, and a `Scheduler` poll loop
//! that runs the backup synchronously when the job is due. Because the loop
//! blocks on the backup, a new run can never start while one is copying.
//! Shutdown is cooperative: a `ShutdownToken` is checked at the top of every
//! cycle, and a run already in progress always completes.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime, TimeZone};
use tracing::{error, info};

use crate::config::RawConfig;
use crate::error::EngineError;

/// How often the loop wakes to check whether the job is due.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Schedule kinds as named in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    Daily,
    Weekly,
    /// Every N minutes
    Custom,
}

impl ScheduleKind {
    pub const ALL: [ScheduleKind; 3] = [
        ScheduleKind::Daily,
        ScheduleKind::Weekly,
        ScheduleKind::Custom,
    ];

    /// Configuration key value.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleKind::Daily => "daily",
            ScheduleKind::Weekly => "weekly",
            ScheduleKind::Custom => "custom",
        }
    }
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleKind::Daily => write!(f, "Daily"),
            ScheduleKind::Weekly => write!(f, "Weekly"),
            ScheduleKind::Custom => write!(f, "Every N minutes"),
        }
    }
}

impl FromStr for ScheduleKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(ScheduleKind::Daily),
            "weekly" => Ok(ScheduleKind::Weekly),
            "custom" | "minutes" => Ok(ScheduleKind::Custom),
            other => Err(EngineError::configuration(format!(
                "unrecognized schedule interval '{}' (expected daily, weekly or custom)",
                other
            ))),
        }
    }
}

/// When backups fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Once every 24 hours at the given local time
    Daily { at: NaiveTime },
    /// Once every 7 days at the given local time
    Weekly { at: NaiveTime },
    /// Every N minutes from process start
    EveryNMinutes { minutes: u32 },
}

impl Schedule {
    /// Build a schedule from its configuration fields.
    ///
    /// # Errors
    /// `EngineError::Configuration` for an unknown kind, a missing or
    /// malformed time for daily/weekly, or a missing or non-positive interval.
    pub fn parse(
        kind: Option<&str>,
        time: Option<&str>,
        interval_minutes: Option<i64>,
    ) -> Result<Self, EngineError> {
        let kind = kind
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| EngineError::configuration("schedule_interval is not set"))?
            .parse::<ScheduleKind>()?;

        match kind {
            ScheduleKind::Daily => Ok(Schedule::Daily {
                at: parse_time_of_day(time)?,
            }),
            ScheduleKind::Weekly => Ok(Schedule::Weekly {
                at: parse_time_of_day(time)?,
            }),
            ScheduleKind::Custom => match interval_minutes {
                Some(minutes) if minutes > 0 && minutes <= u32::MAX as i64 => {
                    Ok(Schedule::EveryNMinutes {
                        minutes: minutes as u32,
                    })
                }
                Some(minutes) => Err(EngineError::configuration(format!(
                    "custom_interval_minutes must be a positive number of minutes, got {}",
                    minutes
                ))),
                None => Err(EngineError::configuration(
                    "custom_interval_minutes is required for a custom schedule",
                )),
            },
        }
    }

    pub fn kind(&self) -> ScheduleKind {
        match self {
            Schedule::Daily { .. } => ScheduleKind::Daily,
            Schedule::Weekly { .. } => ScheduleKind::Weekly,
            Schedule::EveryNMinutes { .. } => ScheduleKind::Custom,
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Daily { at } => write!(f, "daily at {}", at.format("%H:%M")),
            Schedule::Weekly { at } => write!(f, "weekly at {}", at.format("%H:%M")),
            Schedule::EveryNMinutes { minutes } => write!(f, "every {} minutes", minutes),
        }
    }
}

/// Parse `HH:MM` or `HH:MM:SS`.
pub fn parse_time_of_day(time: Option<&str>) -> Result<NaiveTime, EngineError> {
    let raw = time
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| EngineError::configuration("schedule_time (HH:MM) is required for daily and weekly schedules"))?;

    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| {
            EngineError::configuration(format!("schedule_time '{}' is not a valid HH:MM time", raw))
        })
}

/// The single recurring job of a process.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    schedule: Schedule,
    next_fire: DateTime<Local>,
}

impl ScheduledJob {
    /// Register a job; the first fire time is computed from `now`.
    pub fn register(schedule: Schedule, now: DateTime<Local>) -> Self {
        let next_fire = match schedule {
            Schedule::Daily { at } | Schedule::Weekly { at } => next_occurrence(at, now),
            Schedule::EveryNMinutes { minutes } => now + ChronoDuration::minutes(minutes as i64),
        };
        ScheduledJob {
            schedule,
            next_fire,
        }
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    pub fn next_fire(&self) -> DateTime<Local> {
        self.next_fire
    }

    pub fn is_due(&self, now: DateTime<Local>) -> bool {
        now >= self.next_fire
    }

    /// Recompute the fire time after a run finished at `now`.
    ///
    /// Missed occurrences are not replayed: the next fire time is always in
    /// the future relative to `now`.
    pub fn advance(&mut self, now: DateTime<Local>) {
        self.next_fire = match self.schedule {
            Schedule::Daily { at } => next_occurrence(at, now),
            Schedule::Weekly { at } => {
                // Step on the calendar so the wall-clock time survives DST changes.
                let mut date = self.next_fire.date_naive();
                loop {
                    date += ChronoDuration::days(7);
                    let next = resolve_local(date.and_time(at));
                    if next > now {
                        break next;
                    }
                }
            }
            Schedule::EveryNMinutes { minutes } => now + ChronoDuration::minutes(minutes as i64),
        };
    }
}

/// Next instant strictly after `now` whose local wall-clock time is `at`.
fn next_occurrence(at: NaiveTime, now: DateTime<Local>) -> DateTime<Local> {
    let today = now.date_naive().and_time(at);
    let candidate = resolve_local(today);
    if candidate > now {
        candidate
    } else {
        resolve_local(today + ChronoDuration::days(1))
    }
}

/// Map a wall-clock time to an instant, stepping over DST gaps.
fn resolve_local(naive: NaiveDateTime) -> DateTime<Local> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            Local
                .from_local_datetime(&(naive + ChronoDuration::hours(1)))
                .earliest()
        })
        .unwrap_or_else(|| Local.from_utc_datetime(&naive))
}

/// Registration entry point: derive the job from the stored settings.
///
/// # Errors
/// Logs and returns the configuration error; the caller must not start the
/// loop.
pub fn schedule_backup(raw: &RawConfig, now: DateTime<Local>) -> Result<ScheduledJob, EngineError> {
    let schedule = Schedule::parse(
        raw.schedule_interval.as_deref(),
        raw.schedule_time.as_deref(),
        raw.custom_interval_minutes,
    )
    .map_err(|e| {
        error!(error = %e, "could not register backup schedule");
        e
    })?;

    let job = ScheduledJob::register(schedule, now);
    info!(schedule = %schedule, next_fire = %job.next_fire(), "backup scheduled");
    Ok(job)
}

/// Cooperative cancellation flag shared with signal handlers.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken(Arc<AtomicBool>);

impl ShutdownToken {
    pub fn new() -> Self {
        ShutdownToken::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// The underlying flag, for `signal_hook::flag::register`.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

/// Time source for the poll loop.
pub trait Clock {
    fn now(&self) -> DateTime<Local>;
    fn sleep(&self, duration: Duration);
}

/// Wall clock and real sleeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> DateTime<Local> {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

/// Where the poll loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    ShuttingDown,
}

/// Single-threaded poll loop driving one `ScheduledJob`.
pub struct Scheduler<C: Clock = SystemClock> {
    job: ScheduledJob,
    shutdown: ShutdownToken,
    poll_interval: Duration,
    clock: C,
    state: SchedulerState,
}

impl Scheduler<SystemClock> {
    pub fn new(job: ScheduledJob, shutdown: ShutdownToken) -> Self {
        Scheduler::with_clock(job, shutdown, SystemClock)
    }
}

impl<C: Clock> Scheduler<C> {
    pub fn with_clock(job: ScheduledJob, shutdown: ShutdownToken, clock: C) -> Self {
        Scheduler {
            job,
            shutdown,
            poll_interval: DEFAULT_POLL_INTERVAL,
            clock,
            state: SchedulerState::Idle,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn job(&self) -> &ScheduledJob {
        &self.job
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Poll until shutdown is requested, running `action` whenever the job is
    /// due. Returns the number of runs performed.
    pub fn run<F: FnMut()>(&mut self, mut action: F) -> u64 {
        let mut runs = 0;
        self.state = SchedulerState::Idle;

        loop {
            if self.shutdown.is_requested() {
                self.state = SchedulerState::ShuttingDown;
                info!(runs, "Scheduler is shutting down.");
                return runs;
            }

            let now = self.clock.now();
            if self.job.is_due(now) {
                self.state = SchedulerState::Running;
                info!(fire_time = %self.job.next_fire(), "starting scheduled backup");
                action();
                runs += 1;

                self.job.advance(self.clock.now());
                self.state = SchedulerState::Idle;
                info!(next_fire = %self.job.next_fire(), "next backup scheduled");
                continue;
            }

            self.clock.sleep(self.poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    /// Virtual clock: sleeping advances time instantly.
    struct ManualClock {
        now: Cell<DateTime<Local>>,
    }

    impl ManualClock {
        fn new(start: DateTime<Local>) -> Self {
            ManualClock {
                now: Cell::new(start),
            }
        }

        fn advance(&self, by: ChronoDuration) {
            self.now.set(self.now.get() + by);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Local> {
            self.now.get()
        }

        fn sleep(&self, duration: Duration) {
            self.advance(ChronoDuration::from_std(duration).unwrap());
        }
    }

    #[test]
    fn test_parse_daily_and_weekly() {
        assert_eq!(
            Schedule::parse(Some("daily"), Some("19:00"), None).unwrap(),
            Schedule::Daily { at: at(19, 0) }
        );
        assert_eq!(
            Schedule::parse(Some("Weekly"), Some("00:00"), None).unwrap(),
            Schedule::Weekly { at: at(0, 0) }
        );
    }

    #[test]
    fn test_parse_custom_interval() {
        assert_eq!(
            Schedule::parse(Some("custom"), None, Some(30)).unwrap(),
            Schedule::EveryNMinutes { minutes: 30 }
        );
    }

    #[test]
    fn test_zero_interval_fails_registration() {
        let raw = RawConfig {
            schedule_interval: Some("custom".to_string()),
            custom_interval_minutes: Some(0),
            ..RawConfig::default()
        };
        let result = schedule_backup(&raw, Local::now());
        assert!(matches!(result, Err(EngineError::Configuration { .. })));
    }

    #[test]
    fn test_negative_or_missing_interval_fails() {
        assert!(Schedule::parse(Some("custom"), None, Some(-5)).is_err());
        assert!(Schedule::parse(Some("custom"), None, None).is_err());
    }

    #[test]
    fn test_unrecognized_kind_fails() {
        assert!(Schedule::parse(Some("invalid"), Some("10:00"), None).is_err());
        assert!(Schedule::parse(None, Some("10:00"), None).is_err());
    }

    #[test]
    fn test_daily_requires_time() {
        assert!(Schedule::parse(Some("daily"), None, None).is_err());
        assert!(Schedule::parse(Some("daily"), Some("25:99"), None).is_err());
    }

    #[test]
    fn test_daily_fires_later_today_or_tomorrow() {
        let now = local(2024, 6, 12, 10, 0);
        let job = ScheduledJob::register(Schedule::Daily { at: at(19, 0) }, now);
        assert_eq!(job.next_fire(), local(2024, 6, 12, 19, 0));

        let evening = local(2024, 6, 12, 20, 0);
        let job = ScheduledJob::register(Schedule::Daily { at: at(19, 0) }, evening);
        assert_eq!(job.next_fire(), local(2024, 6, 13, 19, 0));
    }

    #[test]
    fn test_daily_advance_moves_one_day() {
        let mut job = ScheduledJob::register(Schedule::Daily { at: at(0, 0) }, local(2024, 6, 12, 10, 0));
        assert_eq!(job.next_fire(), local(2024, 6, 13, 0, 0));

        // Backup finished a few minutes after midnight.
        job.advance(local(2024, 6, 13, 0, 7));
        assert_eq!(job.next_fire(), local(2024, 6, 14, 0, 0));
    }

    #[test]
    fn test_weekly_advance_moves_seven_days() {
        let mut job = ScheduledJob::register(Schedule::Weekly { at: at(3, 30) }, local(2024, 6, 12, 10, 0));
        assert_eq!(job.next_fire(), local(2024, 6, 13, 3, 30));

        job.advance(local(2024, 6, 13, 4, 0));
        assert_eq!(job.next_fire(), local(2024, 6, 20, 3, 30));
    }

    #[test]
    fn test_every_n_minutes_counts_from_completion() {
        let start = local(2024, 6, 12, 10, 0);
        let mut job = ScheduledJob::register(Schedule::EveryNMinutes { minutes: 15 }, start);
        assert_eq!(job.next_fire(), local(2024, 6, 12, 10, 15));
        assert!(!job.is_due(start));
        assert!(job.is_due(local(2024, 6, 12, 10, 15)));

        job.advance(local(2024, 6, 12, 10, 40));
        assert_eq!(job.next_fire(), local(2024, 6, 12, 10, 55));
    }

    #[test]
    fn test_shutdown_before_start_runs_nothing() {
        let clock = ManualClock::new(local(2024, 6, 12, 10, 0));
        let job = ScheduledJob::register(Schedule::EveryNMinutes { minutes: 1 }, clock.now());
        let shutdown = ShutdownToken::new();
        shutdown.request();

        let mut scheduler = Scheduler::with_clock(job, shutdown, &clock);
        let runs = scheduler.run(|| panic!("no job may start after shutdown"));

        assert_eq!(runs, 0);
        assert_eq!(scheduler.state(), SchedulerState::ShuttingDown);
    }

    #[test]
    fn test_runs_do_not_overlap() {
        let clock = ManualClock::new(local(2024, 6, 12, 10, 0));
        let job = ScheduledJob::register(Schedule::EveryNMinutes { minutes: 1 }, clock.now());
        let shutdown = ShutdownToken::new();
        let spans: RefCell<Vec<(DateTime<Local>, DateTime<Local>)>> = RefCell::new(Vec::new());

        let mut scheduler = Scheduler::with_clock(job, shutdown.clone(), &clock);
        let runs = scheduler.run(|| {
            let started = clock.now();
            // Each backup takes longer than the interval.
            clock.advance(ChronoDuration::minutes(3));
            spans.borrow_mut().push((started, clock.now()));
            if spans.borrow().len() == 3 {
                shutdown.request();
            }
        });

        assert_eq!(runs, 3);
        let spans = spans.into_inner();
        for pair in spans.windows(2) {
            let (_, previous_end) = pair[0];
            let (next_start, _) = pair[1];
            assert!(next_start >= previous_end + ChronoDuration::minutes(1));
        }
    }

    #[test]
    fn test_run_in_progress_completes_before_shutdown() {
        let clock = ManualClock::new(local(2024, 6, 12, 10, 0));
        let job = ScheduledJob::register(Schedule::EveryNMinutes { minutes: 5 }, clock.now());
        let shutdown = ShutdownToken::new();
        let completed = Cell::new(0);

        let mut scheduler = Scheduler::with_clock(job, shutdown.clone(), &clock)
            .with_poll_interval(Duration::from_secs(30));
        let runs = scheduler.run(|| {
            // Interrupt arrives mid-copy.
            shutdown.request();
            clock.advance(ChronoDuration::minutes(1));
            completed.set(completed.get() + 1);
        });

        assert_eq!(runs, 1);
        assert_eq!(completed.get(), 1);
        assert_eq!(scheduler.state(), SchedulerState::ShuttingDown);
    }

    #[test]
    fn test_shutdown_token_is_shared() {
        let token = ShutdownToken::new();
        let flag = token.flag();
        assert!(!token.is_requested());
        flag.store(true, Ordering::SeqCst);
        assert!(token.is_requested());
    }
}
