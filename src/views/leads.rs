//! Leads screen: list, status changes, deletion, client-side filter, search
//! and sort.

use std::cmp::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{Patch, Query, TableStore};
use crate::error::DashboardError;
use crate::optimistic::{ListOrder, OptimisticList};
use crate::types::{Lead, LeadStatus, RecordId};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LeadFilter {
    #[default]
    All,
    Status(LeadStatus),
}

impl LeadFilter {
    /// `all` or a status value.
    pub fn parse(value: &str) -> Self {
        match value {
            "" | "all" => LeadFilter::All,
            other => LeadFilter::Status(LeadStatus::from(other.to_string())),
        }
    }

    fn admits(&self, lead: &Lead) -> bool {
        match self {
            LeadFilter::All => true,
            LeadFilter::Status(status) => &lead.status == status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    CreatedAt,
    CompanyName,
    Whatsapp,
    ServiceInterest,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortConfig {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            key: SortKey::CreatedAt,
            direction: SortDirection::Descending,
        }
    }
}

impl SortConfig {
    /// Clicking the ascending column again flips it to descending; anything
    /// else sorts ascending by the clicked column.
    pub fn toggle(self, key: SortKey) -> Self {
        let direction = if self.key == key && self.direction == SortDirection::Ascending {
            SortDirection::Descending
        } else {
            SortDirection::Ascending
        };
        Self { key, direction }
    }

    fn compare(&self, a: &Lead, b: &Lead) -> Ordering {
        let text = |lead: &Lead| -> String {
            match self.key {
                SortKey::CreatedAt => String::new(),
                SortKey::CompanyName => lead.company_name.clone().unwrap_or_default(),
                SortKey::Whatsapp => lead.whatsapp.clone().unwrap_or_default(),
                SortKey::ServiceInterest => lead.service_interest.clone().unwrap_or_default(),
                SortKey::Status => lead.status.as_str().to_string(),
            }
        };
        let ord = match self.key {
            SortKey::CreatedAt => a.created_at.cmp(&b.created_at),
            _ => text(a).cmp(&text(b)),
        };
        match self.direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        }
    }
}

fn matches_search(lead: &Lead, term: &str) -> bool {
    if term.is_empty() {
        return true;
    }
    let needle = term.to_lowercase();
    let contains = |field: &Option<String>| {
        field
            .as_deref()
            .map(|v| v.to_lowercase().contains(&needle))
            .unwrap_or(false)
    };
    contains(&lead.company_name) || contains(&lead.whatsapp) || contains(&lead.service_interest)
}

#[derive(Default)]
struct Controls {
    filter: LeadFilter,
    search: String,
    sort: SortConfig,
}

pub struct LeadsView {
    list: OptimisticList<Lead>,
    controls: Mutex<Controls>,
}

impl LeadsView {
    pub fn new(tables: Arc<dyn TableStore>) -> Self {
        Self {
            list: OptimisticList::new(tables, Query::all(), ListOrder::NewestFirst),
            controls: Mutex::new(Controls::default()),
        }
    }

    pub fn list(&self) -> &OptimisticList<Lead> {
        &self.list
    }

    pub async fn refresh(&self) -> Result<(), DashboardError> {
        self.list.refresh().await
    }

    /// Only the three pipeline states can be written.
    pub async fn set_status(&self, id: &RecordId, status: LeadStatus) -> Result<Lead, DashboardError> {
        if !status.is_known() {
            return Err(DashboardError::validation(format!(
                "Unknown lead status '{}'",
                status.as_str()
            )));
        }
        let mut patch = Patch::new();
        patch.insert("estado".to_string(), status.as_str().into());
        self.list.update(id, patch).await
    }

    /// Call after the user confirmed the deletion.
    pub async fn delete(&self, id: &RecordId) -> Result<Lead, DashboardError> {
        self.list.delete(id).await
    }

    pub fn set_filter(&self, filter: LeadFilter) {
        self.controls.lock().filter = filter;
    }

    pub fn set_search(&self, term: &str) {
        self.controls.lock().search = term.trim().to_string();
    }

    pub fn sort_by(&self, key: SortKey) -> SortConfig {
        let mut controls = self.controls.lock();
        controls.sort = controls.sort.toggle(key);
        controls.sort
    }

    pub fn sort(&self) -> SortConfig {
        self.controls.lock().sort
    }

    /// Leads after filter, search and sort.
    pub fn visible(&self) -> Vec<Lead> {
        let (filter, search, sort) = {
            let controls = self.controls.lock();
            (controls.filter.clone(), controls.search.clone(), controls.sort)
        };
        let mut leads: Vec<Lead> = self
            .list
            .items()
            .into_iter()
            .filter(|lead| filter.admits(lead) && matches_search(lead, &search))
            .collect();
        leads.sort_by(|a, b| sort.compare(a, b));
        leads
    }

    pub fn dispose(&self) {
        self.list.dispose();
    }
}
