//! Report triggers on a wall-clock schedule.
//!
//! - daily report: 21:00 local time, Monday to Friday;
//! - monthly report: 23:59 on the last day of the month.
//!
//! The next fire time is recomputed after every trigger, so schedules
//! follow month lengths and weekends instead of a fixed period.

use std::sync::Arc;

use chrono::{Datelike, Duration, Local, Months, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use mallbus_error::SubsystemError;
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    bus::{Broker, EventKind},
    subsystem::Subsystem,
};

const DAILY_REPORT_HOUR: u32 = 21;

/// Computes the next fire time strictly from the given local time.
pub type NextFire = fn(NaiveDateTime) -> NaiveDateTime;

/// One recurring trigger.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub kind: EventKind,
    pub next: NextFire,
}

impl Schedule {
    pub fn daily_report() -> Self {
        Self {
            kind: EventKind::TimerTriggerDailyReport,
            next: next_daily_report,
        }
    }

    pub fn monthly_report() -> Self {
        Self {
            kind: EventKind::TimerTriggerMonthlyReport,
            next: next_monthly_report,
        }
    }
}

fn at(
    date: NaiveDate,
    hour: u32,
    minute: u32,
) -> NaiveDateTime {
    date.and_hms_opt(hour, minute, 0)
        .unwrap_or_else(|| date.and_time(NaiveTime::default()))
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    let first = date.with_day(1).unwrap_or(date);
    first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(date)
}

/// Next business day at 21:00, today included if it is not yet past.
pub fn next_daily_report(now: NaiveDateTime) -> NaiveDateTime {
    let mut target = at(now.date(), DAILY_REPORT_HOUR, 0);
    if now > target {
        target += Duration::days(1);
    }
    while is_weekend(target.date()) {
        target += Duration::days(1);
    }
    target
}

/// 23:59 on the last day of this month, or of next month once passed.
pub fn next_monthly_report(now: NaiveDateTime) -> NaiveDateTime {
    let target = at(last_day_of_month(now.date()), 23, 59);
    if now <= target {
        return target;
    }
    let next_month = now
        .date()
        .with_day(1)
        .and_then(|first| first.checked_add_months(Months::new(1)))
        .unwrap_or(now.date());
    at(last_day_of_month(next_month), 23, 59)
}

/// Publishes the report triggers. Registers no listeners.
pub struct TimeActor<P: Send + Sync + 'static> {
    schedules: Vec<Schedule>,
    payload: Arc<dyn Fn(EventKind) -> P + Send + Sync>,
    broker: Option<Broker<P>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<P: Send + Sync + 'static> TimeActor<P> {
    /// Daily and monthly triggers; `payload` builds the message body.
    pub fn new(payload: impl Fn(EventKind) -> P + Send + Sync + 'static) -> Self {
        Self::with_schedules(
            vec![Schedule::daily_report(), Schedule::monthly_report()],
            payload,
        )
    }

    pub fn with_schedules(
        schedules: Vec<Schedule>,
        payload: impl Fn(EventKind) -> P + Send + Sync + 'static,
    ) -> Self {
        Self {
            schedules,
            payload: Arc::new(payload),
            broker: None,
            tasks: Vec::new(),
        }
    }

    /// Number of running schedule tasks.
    pub fn active_schedules(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_finished()).count()
    }
}

impl<P: Send + Sync + 'static> Subsystem<P> for TimeActor<P> {
    fn name(&self) -> &str {
        "time-actor"
    }

    fn init(
        &mut self,
        broker: &Broker<P>,
    ) -> Result<(), SubsystemError> {
        self.broker = Some(broker.clone());
        Ok(())
    }

    fn start(&mut self) -> Result<(), SubsystemError> {
        let start_failed = |reason: &str| SubsystemError::StartFailed {
            subsystem: self.name().to_string(),
            reason: reason.to_string(),
        };
        let broker = self
            .broker
            .clone()
            .ok_or_else(|| start_failed("not initialised"))?;
        let handle = broker
            .runtime_handle()
            .or_else(|| Handle::try_current().ok())
            .ok_or_else(|| start_failed("no tokio runtime"))?;

        let tasks: Vec<JoinHandle<()>> = self
            .schedules
            .iter()
            .map(|schedule| {
                handle.spawn(run_schedule(
                    broker.clone(),
                    *schedule,
                    Arc::clone(&self.payload),
                ))
            })
            .collect();
        self.tasks = tasks;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), SubsystemError> {
        info!(schedules = self.tasks.len(), "stopping time actor");
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.broker = None;
        Ok(())
    }
}

async fn run_schedule<P: Send + Sync + 'static>(
    broker: Broker<P>,
    schedule: Schedule,
    payload: Arc<dyn Fn(EventKind) -> P + Send + Sync>,
) {
    let kind = schedule.kind;
    let mut last_fired: Option<NaiveDateTime> = None;
    loop {
        let now = Local::now().naive_local();
        // The clock may read the old target right after waking.
        let from = match last_fired {
            Some(t) if now <= t => t + Duration::seconds(1),
            _ => now,
        };
        let target = (schedule.next)(from);
        let delay = (target - now).to_std().unwrap_or_default();
        info!(%kind, next_fire = %target, "trigger scheduled");

        tokio::time::sleep(delay).await;
        match broker.publish(kind, payload(kind)) {
            Ok(id) => info!(%kind, message_id = %id, "trigger fired"),
            Err(e) => warn!(%kind, error = %e, "trigger not published"),
        }
        last_fired = Some(target);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use proptest::prelude::*;
    use rstest::rstest;
    use tokio::sync::mpsc::unbounded_channel;

    use super::*;
    use crate::bus::{BrokerConfig, Message};

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[rstest]
    // Wednesday morning: same day.
    #[case("2024-05-15 09:30:00", "2024-05-15 21:00:00")]
    // Exactly on time still counts.
    #[case("2024-05-15 21:00:00", "2024-05-15 21:00:00")]
    // Wednesday evening: Thursday.
    #[case("2024-05-15 21:00:01", "2024-05-16 21:00:00")]
    // Friday evening: Monday.
    #[case("2024-05-17 22:00:00", "2024-05-20 21:00:00")]
    // Saturday noon: Monday.
    #[case("2024-05-18 12:00:00", "2024-05-20 21:00:00")]
    fn test_next_daily_report(
        #[case] now: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(next_daily_report(dt(now)), dt(expected));
    }

    #[rstest]
    #[case("2024-01-10 10:00:00", "2024-01-31 23:59:00")]
    // Leap year February.
    #[case("2024-02-03 00:00:00", "2024-02-29 23:59:00")]
    #[case("2023-02-03 00:00:00", "2023-02-28 23:59:00")]
    // Past the trigger on the last day: next month's last day.
    #[case("2024-01-31 23:59:30", "2024-02-29 23:59:00")]
    // December rolls into the next year.
    #[case("2024-12-31 23:59:01", "2025-01-31 23:59:00")]
    fn test_next_monthly_report(
        #[case] now: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(next_monthly_report(dt(now)), dt(expected));
    }

    proptest! {
        #[test]
        fn prop_daily_is_weekday_21h_within_3_days(secs in 0i64..(5 * 365 * 86_400)) {
            let now = dt("2020-01-01 00:00:00") + Duration::seconds(secs);
            let next = next_daily_report(now);
            prop_assert!(next >= now);
            prop_assert!(next - now <= Duration::days(3));
            prop_assert!(!is_weekend(next.date()));
            prop_assert_eq!(next.time(), NaiveTime::from_hms_opt(21, 0, 0).unwrap());
        }

        #[test]
        fn prop_monthly_is_last_day(secs in 0i64..(5 * 365 * 86_400)) {
            let now = dt("2020-01-01 00:00:00") + Duration::seconds(secs);
            let next = next_monthly_report(now);
            prop_assert!(next >= now);
            prop_assert_eq!((next.date() + Duration::days(1)).day(), 1);
            prop_assert_eq!(next.time(), NaiveTime::from_hms_opt(23, 59, 0).unwrap());
        }
    }

    fn soon(now: NaiveDateTime) -> NaiveDateTime {
        now + Duration::milliseconds(30)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_actor_publishes_and_stops() {
        let broker = Broker::new(BrokerConfig::default()).unwrap();
        let (tx, mut rx) = unbounded_channel();
        broker.register_fn(EventKind::TimerTriggerDailyReport, move |m: Arc<Message<u8>>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(m.kind());
                Ok(())
            }
        });
        broker.start().unwrap();

        let mut actor = TimeActor::with_schedules(
            vec![Schedule {
                kind: EventKind::TimerTriggerDailyReport,
                next: soon,
            }],
            |_kind| 0u8,
        );
        actor.init(&broker).unwrap();
        actor.start().unwrap();
        assert_eq!(actor.active_schedules(), 1);

        for _ in 0..2 {
            let kind = tokio::time::timeout(StdDuration::from_secs(2), rx.recv())
                .await
                .unwrap();
            assert_eq!(kind, Some(EventKind::TimerTriggerDailyReport));
        }

        actor.shutdown().unwrap();
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        assert_eq!(actor.active_schedules(), 0);
        broker.stop_and_join().await;
    }

    #[test]
    fn test_start_before_init_fails() {
        let mut actor = TimeActor::new(|_kind| ());
        assert!(matches!(
            actor.start(),
            Err(SubsystemError::StartFailed { .. })
        ));
    }
}
