use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use std::str::FromStr;
use tracing::{debug, warn};

use cronflow_core::{SchedulerError, SchedulerResult};

/// 无法解析的CRON表达式的退避时长（分钟）
pub const INVALID_CRON_BACKOFF_MINUTES: i64 = 1;

/// 将5字段的标准CRON表达式补齐秒字段，6/7字段原样返回
fn normalize_expression(cron_expr: &str) -> String {
    let trimmed = cron_expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}

/// CRON表达式解析和调度工具
///
/// 支持标准5字段（分 时 日 月 周）和带秒的6字段表达式。
#[derive(Debug, Clone)]
pub struct CronScheduler {
    schedule: Schedule,
}

impl CronScheduler {
    pub fn new(cron_expr: &str) -> SchedulerResult<Self> {
        let schedule = Schedule::from_str(&normalize_expression(cron_expr)).map_err(|e| {
            SchedulerError::InvalidCron {
                expr: cron_expr.to_string(),
                message: e.to_string(),
            }
        })?;

        Ok(Self { schedule })
    }

    /// 检查给定时间是否应该触发任务
    pub fn should_trigger(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        // 从未执行过的任务只回看一分钟
        let check_from = last_run.unwrap_or(now - Duration::minutes(1));
        match self.schedule.after(&check_from).next() {
            Some(next_time) => {
                let should_trigger = next_time <= now;
                if should_trigger {
                    debug!(
                        "任务应该触发: 检查起点={}, 下次执行={}, 当前时间={}",
                        check_from.format("%Y-%m-%d %H:%M:%S UTC"),
                        next_time.format("%Y-%m-%d %H:%M:%S UTC"),
                        now.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                }
                should_trigger
            }
            None => {
                warn!(
                    "无法计算下一次执行时间，检查起点: {}",
                    check_from.format("%Y-%m-%d %H:%M:%S UTC")
                );
                false
            }
        }
    }

    /// 获取下一次执行时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    /// 获取从指定时间开始的多个执行时间
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }

    pub fn validate_cron_expression(cron_expr: &str) -> SchedulerResult<()> {
        Self::new(cron_expr).map(|_| ())
    }

    /// 计算下次执行时间距离现在的时长
    pub fn time_until_next_execution(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.schedule.after(&now).next().map(|next| next - now)
    }
}

/// 计算下一次触发时间，永不失败
///
/// 表达式无法解析或没有后续触发点时返回 `from + 1分钟`，
/// 单个错误的表达式不会使调度循环停止。
pub fn next_occurrence(cron_expr: &str, from: DateTime<Utc>) -> DateTime<Utc> {
    next_occurrence_with_backoff(
        cron_expr,
        from,
        Duration::minutes(INVALID_CRON_BACKOFF_MINUTES),
    )
}

/// 同 [`next_occurrence`]，退避时长由调用方指定
pub fn next_occurrence_with_backoff(
    cron_expr: &str,
    from: DateTime<Utc>,
    backoff: Duration,
) -> DateTime<Utc> {
    match CronScheduler::new(cron_expr) {
        Ok(scheduler) => scheduler.next_execution_time(from).unwrap_or_else(|| {
            warn!("CRON表达式没有后续触发时间: {}", cron_expr);
            from + backoff
        }),
        Err(e) => {
            warn!("CRON表达式解析失败，{}秒后重试: {}", backoff.num_seconds(), e);
            from + backoff
        }
    }
}
