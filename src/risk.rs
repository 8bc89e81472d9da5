use std::collections::{BTreeMap, HashSet};

use chrono::{Local, NaiveDate, TimeZone};

use crate::models::{LatestIndex, Record, RiskTally};

pub const UNASSIGNED_DEPARTMENT: &str = "Unassigned";

#[derive(Debug, Clone, Default)]
pub struct Aggregate {
    pub tally: RiskTally,
    pub latest: LatestIndex,
    pub total_students: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryTally {
    pub category: String,
    pub tally: RiskTally,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub average: f64,
    pub samples: usize,
}

/// Reduces a poll's records to the latest risk-bearing record per student
/// and counts those by level. Ties on timestamp keep the first record seen.
pub fn aggregate(records: &[Record]) -> Aggregate {
    let mut latest = LatestIndex::new();
    let mut students: HashSet<&str> = HashSet::new();

    for record in records {
        students.insert(record.student_id.as_str());
        if record.risk_level.is_none() {
            continue;
        }

        match latest.get(&record.student_id) {
            Some(existing) if record.timestamp <= existing.timestamp => {}
            _ => {
                latest.insert(record.student_id.clone(), record.clone());
            }
        }
    }

    let mut tally = RiskTally::default();
    for record in latest.values() {
        if let Some(level) = record.risk_level {
            tally.record(level);
        }
    }

    Aggregate {
        tally,
        latest,
        total_students: students.len(),
    }
}

/// Groups the latest records by department, alphabetically.
pub fn tally_by_department(latest: &LatestIndex) -> Vec<CategoryTally> {
    let mut groups: BTreeMap<String, RiskTally> = BTreeMap::new();

    for record in latest.values() {
        let Some(level) = record.risk_level else {
            continue;
        };
        let category = record
            .department
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(UNASSIGNED_DEPARTMENT);
        groups.entry(category.to_string()).or_default().record(level);
    }

    groups
        .into_iter()
        .map(|(category, tally)| CategoryTally { category, tally })
        .collect()
}

pub fn sentiment_trend(records: &[Record]) -> Vec<TrendPoint> {
    sentiment_trend_in(records, &Local)
}

/// Averages sentiment per calendar day in `tz`, oldest day first.
pub fn sentiment_trend_in<Tz: TimeZone>(records: &[Record], tz: &Tz) -> Vec<TrendPoint> {
    let mut days: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();

    for record in records {
        let Some(score) = record.sentiment_score_percent else {
            continue;
        };
        let date = record.timestamp.with_timezone(tz).date_naive();
        let entry = days.entry(date).or_insert((0.0, 0));
        entry.0 += score;
        entry.1 += 1;
    }

    days.into_iter()
        .map(|(date, (sum, samples))| TrendPoint {
            date,
            average: sum / samples as f64,
            samples,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RiskLevel;
    use chrono::{Duration, TimeZone, Utc};

    fn sample_record(id: &str, hours: i64, level: Option<RiskLevel>) -> Record {
        Record {
            student_id: id.to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 2, 2, 8, 0, 0).unwrap() + Duration::hours(hours),
            risk_level: level,
            risk_probability: Some(0.5),
            attendance: Some(80.0),
            assignment_score: Some(70.0),
            test_score: Some(65.0),
            sentiment_score_percent: None,
            department: None,
        }
    }

    #[test]
    fn latest_record_wins_per_student() {
        let records = vec![
            sample_record("A", 0, Some(RiskLevel::Low)),
            sample_record("A", 5, Some(RiskLevel::High)),
        ];
        let aggregate = aggregate(&records);
        assert_eq!(
            aggregate.tally,
            RiskTally {
                low: 0,
                medium: 0,
                high: 1
            }
        );
        assert_eq!(aggregate.latest["A"].risk_level, Some(RiskLevel::High));
    }

    #[test]
    fn order_does_not_change_selection() {
        let records = vec![
            sample_record("A", 5, Some(RiskLevel::High)),
            sample_record("B", 1, Some(RiskLevel::Medium)),
            sample_record("A", 0, Some(RiskLevel::Low)),
        ];
        let aggregate = aggregate(&records);
        assert_eq!(aggregate.latest.len(), 2);
        assert_eq!(aggregate.latest["A"].timestamp, records[0].timestamp);
        assert_eq!(aggregate.tally.total(), 2);
    }

    #[test]
    fn ties_keep_first_seen() {
        let mut first = sample_record("A", 3, Some(RiskLevel::Medium));
        first.risk_probability = Some(0.45);
        let second = sample_record("A", 3, Some(RiskLevel::High));
        let aggregate = aggregate(&[first.clone(), second]);
        assert_eq!(aggregate.latest["A"], first);
    }

    #[test]
    fn unlevelled_records_are_ignored_for_risk() {
        let records = vec![
            sample_record("A", 0, Some(RiskLevel::Low)),
            sample_record("A", 9, None),
            sample_record("C", 2, None),
        ];
        let aggregate = aggregate(&records);
        assert_eq!(aggregate.latest["A"].risk_level, Some(RiskLevel::Low));
        assert!(!aggregate.latest.contains_key("C"));
        assert_eq!(aggregate.tally.total(), 1);
        assert_eq!(aggregate.total_students, 2);
    }

    #[test]
    fn tally_matches_distinct_levelled_students() {
        let mut records = Vec::new();
        for i in 0..30 {
            let level = RiskLevel::ALL[i % 3];
            records.push(sample_record(&format!("S{}", i % 7), i as i64, Some(level)));
        }
        let aggregate = aggregate(&records);
        assert_eq!(aggregate.latest.len(), 7);
        assert_eq!(aggregate.tally.total(), 7);
    }

    #[test]
    fn departments_group_alphabetically() {
        let mut a = sample_record("A", 0, Some(RiskLevel::High));
        a.department = Some("Engineering".to_string());
        let mut b = sample_record("B", 0, Some(RiskLevel::Low));
        b.department = Some("Business".to_string());
        let mut c = sample_record("C", 0, Some(RiskLevel::High));
        c.department = Some("Engineering".to_string());
        let d = sample_record("D", 0, Some(RiskLevel::Medium));

        let aggregate = aggregate(&[a, b, c, d]);
        let groups = tally_by_department(&aggregate.latest);
        let names: Vec<&str> = groups.iter().map(|g| g.category.as_str()).collect();
        assert_eq!(names, vec!["Business", "Engineering", UNASSIGNED_DEPARTMENT]);
        assert_eq!(groups[1].tally.high, 2);
        assert_eq!(groups[2].tally.medium, 1);
    }

    #[test]
    fn trend_is_chronological_across_months() {
        let mut records = Vec::new();
        // Dates whose display strings would sort wrongly: 10/01 vs 9/30 vs 12/31/2025.
        for (y, m, d, score) in [(2026, 10, 1, 40.0), (2026, 9, 30, 60.0), (2025, 12, 31, 80.0), (2026, 9, 30, 80.0)] {
            let mut record = sample_record("A", 0, None);
            record.timestamp = Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap();
            record.sentiment_score_percent = Some(score);
            records.push(record);
        }
        records.push(sample_record("B", 0, Some(RiskLevel::Low)));

        let trend = sentiment_trend_in(&records, &Utc);
        let dates: Vec<String> = trend.iter().map(|p| p.date.to_string()).collect();
        assert_eq!(dates, vec!["2025-12-31", "2026-09-30", "2026-10-01"]);
        assert_eq!(trend[1].average, 70.0);
        assert_eq!(trend[1].samples, 2);
    }
}
