// libs/schedule-cell/src/services/conflict.rs
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

pub struct ConflictCheckService {
    supabase: Arc<SupabaseClient>,
}

impl ConflictCheckService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Check whether the candidate window collides with an existing active
    /// appointment of the same psychologist.
    ///
    /// The overlap test runs as a single server-evaluated predicate so two
    /// near-simultaneous bookings cannot both pass a stale client-side read.
    /// `exclude_appointment_id` lets a reschedule ignore its own slot.
    ///
    /// On a failed store call this deliberately reports "no conflict" and
    /// logs the anomaly: blocking every booking on a transient error was
    /// judged worse than the residual double-booking risk. Changing this to
    /// fail-closed is a product decision, not a bug fix.
    pub async fn has_conflict(
        &self,
        psychologist_id: Uuid,
        start_time: DateTime<Utc>,
        duration_minutes: i32,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> bool {
        debug!(
            "Checking conflicts for psychologist {} at {} ({} min)",
            psychologist_id, start_time, duration_minutes
        );

        let args = json!({
            "p_psychologist_id": psychologist_id,
            "p_start_time": start_time.to_rfc3339(),
            "p_duration_minutes": duration_minutes,
            "p_exclude_id": exclude_appointment_id,
        });

        match self
            .supabase
            .rpc::<bool>("appointment_overlap_exists", Some(auth_token), args)
            .await
        {
            Ok(overlap) => {
                if overlap {
                    debug!(
                        "Conflict detected for psychologist {} at {}",
                        psychologist_id, start_time
                    );
                }
                overlap
            }
            Err(e) => {
                warn!(
                    "Conflict check failed, treating as no conflict (double-booking risk): {}",
                    e
                );
                false
            }
        }
    }

    /// The interval predicate the server-side function evaluates, mirrored
    /// for documentation and tests. Intervals are half-open, so a session
    /// ending exactly when another starts is not a conflict.
    pub fn intervals_overlap(
        start_a: DateTime<Utc>,
        duration_a: i32,
        start_b: DateTime<Utc>,
        duration_b: i32,
    ) -> bool {
        let end_a = start_a + chrono::Duration::minutes(duration_a as i64);
        let end_b = start_b + chrono::Duration::minutes(duration_b as i64);
        start_a < end_b && start_b < end_a
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, m, 0).unwrap()
    }

    #[test]
    fn overlapping_windows_conflict() {
        assert!(ConflictCheckService::intervals_overlap(at(10, 0), 50, at(10, 40), 50));
        assert!(ConflictCheckService::intervals_overlap(at(10, 40), 50, at(10, 0), 50));
    }

    #[test]
    fn containment_conflicts() {
        assert!(ConflictCheckService::intervals_overlap(at(10, 0), 90, at(10, 30), 30));
    }

    #[test]
    fn back_to_back_is_not_a_conflict() {
        // [10:00, 10:50) then [10:50, 11:40)
        assert!(!ConflictCheckService::intervals_overlap(at(10, 0), 50, at(10, 50), 50));
        assert!(!ConflictCheckService::intervals_overlap(at(10, 50), 50, at(10, 0), 50));
    }

    #[test]
    fn disjoint_windows_do_not_conflict() {
        assert!(!ConflictCheckService::intervals_overlap(at(8, 0), 30, at(15, 0), 60));
    }
}
