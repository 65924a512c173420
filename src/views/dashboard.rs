//! Dashboard KPIs: lead totals, today's leads, top requested service and the
//! latest leads.

use std::sync::Arc;

use chrono::{DateTime, Local, SecondsFormat, TimeZone, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::backend::{decode_rows, Filter, Query, TableStore};
use crate::error::{DashboardError, Notice};
use crate::types::{Lead, Record};

/// Leads sampled for the top-service figure.
pub const SERVICE_SAMPLE: usize = 500;
pub const RECENT_LEADS: usize = 5;

const NO_SERVICE: &str = "Sin especificar";
const NO_DATA: &str = "N/A";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total: u64,
    pub today: u64,
    pub top_service: String,
    pub recent: Vec<Lead>,
}

/// Most frequent service interest. Blank values count as "Sin especificar";
/// on a tie the value whose first occurrence comes later wins.
pub fn top_service(values: &[Option<String>]) -> String {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for value in values {
        let service = value
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(NO_SERVICE);
        match counts.iter_mut().find(|(name, _)| name == service) {
            Some((_, n)) => *n += 1,
            None => counts.push((service.to_string(), 1)),
        }
    }

    counts
        .into_iter()
        .reduce(|best, next| if best.1 > next.1 { best } else { next })
        .map(|(name, _)| name)
        .unwrap_or_else(|| NO_DATA.to_string())
}

/// Midnight of `now`'s calendar day in its own time zone, as UTC.
pub fn start_of_day<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| now.timezone().from_local_datetime(&midnight).earliest())
        .map(|start| start.with_timezone(&Utc))
        .unwrap_or_else(|| now.with_timezone(&Utc))
}

pub async fn load_stats(
    tables: &dyn TableStore,
    now: DateTime<Local>,
) -> Result<DashboardStats, DashboardError> {
    let total = tables.count(Lead::TABLE, &[]).await?;

    let since = start_of_day(&now).to_rfc3339_opts(SecondsFormat::Millis, true);
    let today = tables
        .count(Lead::TABLE, &[Filter::gte("created_at", since)])
        .await?;

    let sample = tables
        .select(
            Lead::TABLE,
            &Query::all().columns("servicio_interes").limit(SERVICE_SAMPLE),
        )
        .await?;
    let services: Vec<Option<String>> = sample
        .iter()
        .map(|row| {
            row.get("servicio_interes")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .collect();

    let recent = tables
        .select(Lead::TABLE, &Query::all().newest_first().limit(RECENT_LEADS))
        .await?;

    Ok(DashboardStats {
        total,
        today,
        top_service: top_service(&services),
        recent: decode_rows(recent)?,
    })
}

#[derive(Default)]
struct DashboardState {
    stats: Option<DashboardStats>,
    loading: bool,
    notice: Option<Notice>,
}

pub struct DashboardView {
    tables: Arc<dyn TableStore>,
    state: Mutex<DashboardState>,
}

impl DashboardView {
    pub fn new(tables: Arc<dyn TableStore>) -> Self {
        Self {
            tables,
            state: Mutex::new(DashboardState::default()),
        }
    }

    pub async fn refresh(&self) -> Result<DashboardStats, DashboardError> {
        self.state.lock().loading = true;
        let result = load_stats(self.tables.as_ref(), Local::now()).await;

        let mut state = self.state.lock();
        state.loading = false;
        match result {
            Ok(stats) => {
                state.stats = Some(stats.clone());
                Ok(stats)
            }
            Err(e) => {
                log::warn!("Failed to load dashboard stats: {}", e);
                state.notice = Some(Notice::from(&e));
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> Option<DashboardStats> {
        self.state.lock().stats.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().loading
    }

    pub fn take_notice(&self) -> Option<Notice> {
        self.state.lock().notice.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, Op};
    use chrono::{Duration, FixedOffset};
    use serde_json::json;

    fn some(values: &[&str]) -> Vec<Option<String>> {
        values.iter().map(|v| Some(v.to_string())).collect()
    }

    #[test]
    fn test_top_service_counts_and_fallbacks() {
        assert_eq!(top_service(&[]), "N/A");
        assert_eq!(
            top_service(&some(&["Web", "Branding", "Web"])),
            "Web"
        );
        assert_eq!(
            top_service(&[None, Some(String::new()), Some("Web".into())]),
            "Sin especificar"
        );
    }

    #[test]
    fn test_top_service_tie_goes_to_later_first_occurrence() {
        assert_eq!(top_service(&some(&["Web", "Branding"])), "Branding");
        // "Web" reaches two last, but "Branding" was first seen later.
        assert_eq!(top_service(&some(&["Web", "Branding", "Branding", "Web"])), "Branding");
        assert_eq!(top_service(&some(&["Branding", "Web", "Web", "Branding"])), "Web");
    }

    #[test]
    fn test_start_of_day_uses_local_offset() {
        let offset = FixedOffset::west_opt(3 * 3600).unwrap();
        let now = offset.with_ymd_and_hms(2025, 3, 10, 15, 30, 0).unwrap();
        assert_eq!(
            start_of_day(&now).to_rfc3339(),
            "2025-03-10T03:00:00+00:00"
        );
    }

    #[tokio::test]
    async fn test_load_stats() {
        let memory = MemoryBackend::new();
        let now = Local::now();
        let yesterday = (start_of_day(&now) - Duration::hours(2)).to_rfc3339();
        memory.tables.seed(
            "leads",
            vec![
                json!({"nombre_empresa": "Old", "servicio_interes": "Web", "created_at": yesterday}),
                json!({"nombre_empresa": "A", "servicio_interes": "Branding"}),
                json!({"nombre_empresa": "B", "servicio_interes": "Branding"}),
            ],
        );

        let stats = load_stats(memory.tables.as_ref(), now).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.today, 2);
        assert_eq!(stats.top_service, "Branding");
        assert_eq!(stats.recent.len(), 3);
        assert_eq!(stats.recent[0].company_name.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn test_failed_load_keeps_notice() {
        let memory = MemoryBackend::new();
        memory.tables.fail(Op::Count, "leads");
        let view = DashboardView::new(memory.tables.clone());

        assert!(view.refresh().await.is_err());
        assert!(view.stats().is_none());
        assert!(!view.is_loading());
        assert!(view.take_notice().is_some());
    }
}
