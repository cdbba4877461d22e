//! Campaign totals projected from a row snapshot
//!
//! Pure functions; rows without a valid phone are invisible here.

use shared_types::{CampaignRow, CampaignTotals, RowStatus};

/// Aggregate counters over the valid-phone rows of a snapshot.
pub fn project(rows: &[CampaignRow], phone_column: &str) -> CampaignTotals {
    rows.iter()
        .filter(|row| row.has_valid_phone(phone_column))
        .fold(CampaignTotals::default(), |mut totals, row| {
            totals.total_rows += 1;
            match row.status {
                RowStatus::Pending => totals.pending_count += 1,
                RowStatus::Calling => totals.active_calls += 1,
                status if status.is_failure() => totals.failed_count += 1,
                _ => totals.completed_count += 1,
            }
            totals
        })
}

/// True once any valid row has reached a final outcome.
pub fn has_been_run(rows: &[CampaignRow], phone_column: &str) -> bool {
    rows.iter()
        .any(|row| row.status.is_terminal() && row.has_valid_phone(phone_column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn row(id: &str, phone: &str, status: RowStatus) -> CampaignRow {
        let mut data = HashMap::new();
        data.insert("phone".to_string(), phone.to_string());
        let mut row = CampaignRow::new(id, "camp-1", data);
        row.status = status;
        row
    }

    #[test]
    fn test_project_counts_each_bucket() {
        let rows = vec![
            row("a", "600111222", RowStatus::Pending),
            row("b", "600111223", RowStatus::Pending),
            row("c", "600111224", RowStatus::Calling),
            row("d", "600111225", RowStatus::Completed),
            row("e", "600111226", RowStatus::Failed),
            row("f", "600111227", RowStatus::NoAnswer),
        ];

        let totals = project(&rows, "phone");
        assert_eq!(
            totals,
            CampaignTotals {
                total_rows: 6,
                completed_count: 1,
                failed_count: 2,
                pending_count: 2,
                active_calls: 1,
            }
        );
    }

    #[test]
    fn test_project_ignores_invalid_phones_regardless_of_status() {
        let mut no_phone = CampaignRow::new("z", "camp-1", HashMap::new());
        no_phone.status = RowStatus::Calling;

        let rows = vec![
            row("a", "600111222", RowStatus::Pending),
            row("b", " 12345 ", RowStatus::Pending),
            row("c", "123", RowStatus::Calling),
            row("d", "", RowStatus::Completed),
            no_phone,
        ];

        let totals = project(&rows, "phone");
        assert_eq!(totals.total_rows, 1);
        assert_eq!(totals.pending_count, 1);
        assert_eq!(totals.active_calls, 0);
        assert_eq!(totals.completed_count, 0);
    }

    #[test]
    fn test_project_empty_snapshot() {
        assert_eq!(project(&[], "phone"), CampaignTotals::default());
    }

    #[test]
    fn test_has_been_run() {
        let fresh = vec![
            row("a", "600111222", RowStatus::Pending),
            row("b", "600111223", RowStatus::Calling),
        ];
        assert!(!has_been_run(&fresh, "phone"));

        let invalid_done = vec![row("a", "123", RowStatus::Completed)];
        assert!(!has_been_run(&invalid_done, "phone"));

        let answered = vec![
            row("a", "600111222", RowStatus::Pending),
            row("b", "600111223", RowStatus::NoAnswer),
        ];
        assert!(has_been_run(&answered, "phone"));
    }
}
