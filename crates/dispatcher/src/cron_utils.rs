use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use platform_core::{PlatformError, PlatformResult};

/// 把五段式crontab表达式规范化为解析库使用的六段式
///
/// 两处差异需要处理：解析库要求秒字段，这里固定补`0`；
/// 星期字段crontab用0-7（0和7都是周日），解析库用1-7且
/// 1是周日，数字写法统一换算，字母写法（MON等）两边一致
/// 直接透传。
pub fn normalize_cron(expr: &str) -> PlatformResult<String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(PlatformError::InvalidCron {
            expr: expr.to_string(),
            message: format!("期望5个字段，实际{}个", fields.len()),
        });
    }
    let dow = translate_dow(expr, fields[4])?;
    Ok(format!(
        "0 {} {} {} {} {}",
        fields[0], fields[1], fields[2], fields[3], dow
    ))
}

/// 换算星期字段的数字写法
///
/// 换算后的范围可能在一周内回绕（如crontab的5-7对应解析库的
/// 6,7,1），因此统一展开成排序后的逗号列表而不是保留区间。
fn translate_dow(expr: &str, field: &str) -> PlatformResult<String> {
    if field == "*" {
        return Ok("*".to_string());
    }
    // 字母写法两套编号一致，透传
    if field.chars().any(|c| c.is_ascii_alphabetic()) {
        return Ok(field.to_string());
    }

    let invalid = |message: String| PlatformError::InvalidCron {
        expr: expr.to_string(),
        message,
    };

    let mut mapped = BTreeSet::new();
    for token in field.split(',') {
        let (base, step) = match token.split_once('/') {
            Some((base, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| invalid(format!("无效的步长: {token}")))?;
                if step == 0 {
                    return Err(invalid(format!("步长不能为0: {token}")));
                }
                (base, step)
            }
            None => (token, 1),
        };
        let (start, end) = if base == "*" {
            (0u32, 6u32)
        } else if let Some((a, b)) = base.split_once('-') {
            let a: u32 = a
                .parse()
                .map_err(|_| invalid(format!("无效的星期值: {token}")))?;
            let b: u32 = b
                .parse()
                .map_err(|_| invalid(format!("无效的星期值: {token}")))?;
            if a > b {
                return Err(invalid(format!("星期区间起点大于终点: {token}")));
            }
            (a, b)
        } else {
            let v: u32 = base
                .parse()
                .map_err(|_| invalid(format!("无效的星期值: {token}")))?;
            (v, v)
        };
        if end > 7 {
            return Err(invalid(format!("星期值超出0-7: {token}")));
        }
        let mut v = start;
        while v <= end {
            // crontab的0和7都是周日，解析库里周日是1
            mapped.insert((v % 7) + 1);
            v += step;
        }
    }
    Ok(mapped
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(","))
}

/// 校验五段式表达式是否可用
pub fn validate(expr: &str) -> PlatformResult<()> {
    let normalized = normalize_cron(expr)?;
    Schedule::from_str(&normalized).map_err(|e| PlatformError::InvalidCron {
        expr: expr.to_string(),
        message: e.to_string(),
    })?;
    Ok(())
}

/// 多个CRON表达式的组合调度器，任一表达式命中即触发
pub struct CronScheduler {
    schedules: Vec<Schedule>,
}

impl CronScheduler {
    pub fn new(exprs: &[String]) -> PlatformResult<Self> {
        if exprs.is_empty() {
            return Err(PlatformError::Validation(
                "CRON表达式列表不能为空".to_string(),
            ));
        }
        let mut schedules = Vec::with_capacity(exprs.len());
        for expr in exprs {
            let normalized = normalize_cron(expr)?;
            let schedule =
                Schedule::from_str(&normalized).map_err(|e| PlatformError::InvalidCron {
                    expr: expr.clone(),
                    message: e.to_string(),
                })?;
            schedules.push(schedule);
        }
        Ok(Self { schedules })
    }

    /// 区间 `(after, until]` 内的所有名义触发时刻，去重排序
    pub fn fires_between(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Vec<DateTime<Utc>> {
        let mut fires = BTreeSet::new();
        for schedule in &self.schedules {
            for t in schedule.after(&after) {
                if t > until {
                    break;
                }
                fires.insert(t);
            }
        }
        fires.into_iter().collect()
    }

    /// 下一次名义触发时刻
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|s| s.after(&after).next())
            .min()
    }
}
