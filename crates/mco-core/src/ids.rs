use chrono::Utc;
use uuid::Uuid;

/// New task id: UTC timestamp prefix plus a short random suffix.
///
/// Lexicographic order matches creation order at second granularity, which is
/// what keeps `<artifact_base>` listings sorted by run time.
pub fn new_task_id() -> String {
    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", stamp, &suffix[..8])
}
