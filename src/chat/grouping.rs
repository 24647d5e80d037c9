use chrono::{Duration, Local, NaiveDate};

use super::Message;

/// Consecutive same-author messages closer together than this render in
/// compact form (no avatar/author header).
pub const TIME_THRESHOLD_MINUTES: i64 = 5;

/// One calendar day of messages, oldest first.
#[derive(Debug)]
pub struct DayGroup<'a> {
    /// Local-date key, `YYYY-MM-DD`.
    pub key: String,
    pub date: NaiveDate,
    pub messages: Vec<&'a Message>,
}

/// Bucket a newest-first message sequence by local calendar day.
///
/// Day groups keep the order their keys were first encountered in the
/// input (newest day first); front-insertion flips each bucket into
/// ascending order for display. No deduplication; id uniqueness is
/// assumed from upstream.
pub fn group_by_day(messages: &[Message]) -> Vec<DayGroup<'_>> {
    let mut groups: Vec<DayGroup> = Vec::new();

    for message in messages {
        let date = message.created_at.with_timezone(&Local).date_naive();
        let key = date.format("%Y-%m-%d").to_string();

        match groups.iter_mut().find(|group| group.key == key) {
            Some(group) => group.messages.insert(0, message),
            None => groups.push(DayGroup {
                key,
                date,
                messages: vec![message],
            }),
        }
    }

    groups
}

/// Whether `message` renders compact after `previous` within one day
/// bucket: same author, strictly less than the threshold apart.
pub fn is_compact(previous: &Message, message: &Message) -> bool {
    previous.member_id == message.member_id
        && message.created_at - previous.created_at < Duration::minutes(TIME_THRESHOLD_MINUTES)
}

/// Divider label for a day group: "Today", "Yesterday", or the full date.
pub fn format_date_label(date: NaiveDate) -> String {
    let today = Local::now().date_naive();
    if date == today {
        "Today".to_string()
    } else if Some(date) == today.pred_opt() {
        "Yesterday".to_string()
    } else {
        date.format("%A, %B %-d").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::fixtures::message;
    use chrono::{DateTime, TimeZone, Utc};

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Local
            .with_ymd_and_hms(y, mo, d, h, mi, s)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn groups_newest_first_days_with_ascending_buckets() {
        let messages = vec![
            message("3", "a", local(2024, 1, 2, 10, 0, 0)),
            message("2", "a", local(2024, 1, 1, 15, 0, 0)),
            message("1", "a", local(2024, 1, 1, 9, 0, 0)),
        ];

        let groups = group_by_day(&messages);
        let keys: Vec<&str> = groups.iter().map(|g| g.key.as_str()).collect();
        assert_eq!(keys, ["2024-01-02", "2024-01-01"]);

        let day_one: Vec<&str> = groups[1].messages.iter().map(|m| m.id.0.as_str()).collect();
        assert_eq!(day_one, ["1", "2"]);
        assert_eq!(groups[0].messages[0].id.0, "3");
    }

    #[test]
    fn every_message_lands_in_exactly_one_bucket() {
        let messages = vec![
            message("5", "a", local(2024, 3, 10, 23, 59, 59)),
            message("4", "b", local(2024, 3, 10, 8, 0, 0)),
            message("3", "a", local(2024, 3, 9, 12, 0, 0)),
            message("2", "c", local(2024, 3, 9, 0, 0, 0)),
            message("1", "a", local(2024, 3, 1, 7, 30, 0)),
        ];

        let groups = group_by_day(&messages);
        let total: usize = groups.iter().map(|g| g.messages.len()).sum();
        assert_eq!(total, messages.len());

        for group in &groups {
            for pair in group.messages.windows(2) {
                assert!(pair[0].created_at <= pair[1].created_at);
            }
        }
    }

    #[test]
    fn compact_requires_same_author_within_threshold() {
        let first = message("1", "a", local(2024, 1, 1, 10, 0, 0));

        let close = message("2", "a", local(2024, 1, 1, 10, 4, 30));
        assert!(is_compact(&first, &close));

        let far = message("3", "a", local(2024, 1, 1, 10, 5, 1));
        assert!(!is_compact(&first, &far));

        let exact = message("4", "a", local(2024, 1, 1, 10, 5, 0));
        assert!(!is_compact(&first, &exact));

        let other_author = message("5", "b", local(2024, 1, 1, 10, 0, 30));
        assert!(!is_compact(&first, &other_author));
    }
}
