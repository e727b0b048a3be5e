//! Utilization report.

use hostfleet_store::{Host, Store};

use crate::error::Result;
use crate::types::{ReportFilter, UtilizationRow};

/// Build report rows for every host matching `filter`, ordered by hostname.
///
/// The narrowest available index is used to fetch candidates; every filter
/// field is then applied to each one.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn utilization_report<S: Store + ?Sized>(
    store: &S,
    filter: &ReportFilter,
) -> Result<Vec<UtilizationRow>> {
    let candidates: Vec<Host> = if let Some(host_id) = &filter.host_id {
        store.get_host(host_id)?.into_iter().collect()
    } else if let Some(status) = filter.status {
        store.list_hosts_by_status(status)?
    } else {
        store.list_hosts()?
    };

    Ok(rows(candidates, filter))
}

fn rows(hosts: Vec<Host>, filter: &ReportFilter) -> Vec<UtilizationRow> {
    let mut rows: Vec<UtilizationRow> = hosts
        .iter()
        .filter(|host| filter.matches(host))
        .map(UtilizationRow::from)
        .collect();
    rows.sort_by(|a, b| a.hostname.cmp(&b.hostname));
    rows
}
