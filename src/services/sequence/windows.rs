//! Viewing-sequence window construction.
//!
//! A window is a fixed-length slice of the user's most recent ratings, each
//! normalized to [0, 1] by the rating scale and left-padded with zeros for
//! short histories. Windows are rebuilt on demand and never persisted.

use crate::models::RatingEvent;
use chrono::{DateTime, Utc};

/// Build the most recent window of normalized ratings, oldest first.
/// Histories shorter than `length` are zero-padded at the start.
pub fn build_window(events: &[RatingEvent], length: usize, rating_scale: f64) -> Vec<f64> {
    let mut window = vec![0.0; length];
    let recent: Vec<&RatingEvent> = events.iter().rev().take(length).collect();

    // `recent` is newest-first; write from the end of the window backwards.
    for (offset, event) in recent.iter().enumerate() {
        let idx = length - 1 - offset;
        window[idx] = (event.rating / rating_scale).clamp(0.0, 1.0);
    }

    window
}

/// Average gap in minutes between consecutive timestamps, with the number of
/// observed gaps. `None` when fewer than two events exist.
pub fn gap_stats(timestamps: &[DateTime<Utc>]) -> Option<(f64, usize)> {
    if timestamps.len() < 2 {
        return None;
    }

    let mut sorted: Vec<DateTime<Utc>> = timestamps.to_vec();
    sorted.sort();

    let gap_count = sorted.len() - 1;
    let total_minutes: f64 = sorted
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).num_seconds() as f64 / 60.0)
        .sum();

    Some((total_minutes / gap_count as f64, gap_count))
}

/// Binge heuristic: average gap under the threshold with enough gaps
/// observed. Only ever yields a binge/casual distinction; no explorer label
/// is derived from timing alone.
pub fn is_binge(
    timestamps: &[DateTime<Utc>],
    gap_threshold_minutes: f64,
    min_gaps: usize,
) -> bool {
    match gap_stats(timestamps) {
        Some((avg_gap, gaps)) => avg_gap < gap_threshold_minutes && gaps > min_gaps,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MediaType;
    use chrono::Duration;

    fn event(rating: f64, minutes_ago: i64) -> RatingEvent {
        RatingEvent {
            item_id: 1,
            media_type: MediaType::Movie,
            rating,
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn test_window_zero_padded() {
        let events = vec![event(8.0, 30), event(6.0, 20), event(10.0, 10)];
        let window = build_window(&events, 5, 10.0);

        assert_eq!(window.len(), 5);
        assert_eq!(&window[..2], &[0.0, 0.0]);
        assert!((window[2] - 0.8).abs() < 1e-9);
        assert!((window[3] - 0.6).abs() < 1e-9);
        assert!((window[4] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_truncates_to_most_recent() {
        let events: Vec<RatingEvent> = (0..8).map(|i| event(i as f64, 80 - i * 10)).collect();
        let window = build_window(&events, 4, 10.0);

        assert_eq!(window.len(), 4);
        // Last four ratings: 4, 5, 6, 7 normalized by 10.
        assert!((window[0] - 0.4).abs() < 1e-9);
        assert!((window[3] - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_gap_stats() {
        let base = Utc::now();
        let timestamps: Vec<_> = (0..4).map(|i| base + Duration::minutes(i * 15)).collect();
        let (avg, gaps) = gap_stats(&timestamps).unwrap();
        assert_eq!(gaps, 3);
        assert!((avg - 15.0).abs() < 1e-9);

        assert!(gap_stats(&timestamps[..1]).is_none());
    }

    #[test]
    fn test_binge_requires_enough_gaps() {
        let base = Utc::now();
        // 10-minute gaps across 8 ratings -> 7 gaps, avg 10min -> binge.
        let tight: Vec<_> = (0..8).map(|i| base + Duration::minutes(i * 10)).collect();
        assert!(is_binge(&tight, 60.0, 5));

        // Same spacing but only 4 ratings -> 3 gaps, below the minimum.
        assert!(!is_binge(&tight[..4], 60.0, 5));

        // 3-hour gaps -> casual.
        let loose: Vec<_> = (0..8).map(|i| base + Duration::hours(i * 3)).collect();
        assert!(!is_binge(&loose, 60.0, 5));
    }
}
