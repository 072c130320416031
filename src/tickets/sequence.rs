use diesel::prelude::*;
use uuid::Uuid;

use crate::shared::errors::ServiceError;
use crate::shared::schema::service_tickets;
use crate::shared::utils::advisory_xact_lock;

/// Allocates the next ticket number for a (company, year) partition.
///
/// Must be called inside the transaction that inserts the owning
/// ticket. The advisory lock serializes concurrent allocations for the
/// partition and is held until that transaction commits, so an aborted
/// insert never burns a number.
pub fn next_ticket_number(
    conn: &mut PgConnection,
    company_id: Uuid,
    year: i32,
    prefix: &str,
) -> Result<String, ServiceError> {
    advisory_xact_lock(conn, &format!("ticket_seq:{company_id}:{year}"))?;

    let numbers: Vec<String> = service_tickets::table
        .filter(service_tickets::company_id.eq(company_id))
        .filter(service_tickets::ticket_number.like(format!("{prefix}-{year}-%")))
        .select(service_tickets::ticket_number)
        .load(conn)?;

    let last = max_sequence(numbers.iter().map(String::as_str));
    Ok(format_ticket_number(prefix, year, last + 1))
}

/// Highest numeric suffix among the partition's existing numbers.
/// Malformed suffixes sort below every well-formed number.
pub fn max_sequence<'a>(numbers: impl Iterator<Item = &'a str>) -> i64 {
    numbers.map(parse_sequence).max().unwrap_or(0)
}

pub fn parse_sequence(number: &str) -> i64 {
    number
        .rsplit('-')
        .next()
        .and_then(|suffix| suffix.parse::<i64>().ok())
        .filter(|seq| *seq >= 0)
        .unwrap_or(0)
}

/// `ZGL-2026-0001`; the counter widens past 9999 instead of failing.
pub fn format_ticket_number(prefix: &str, year: i32, seq: i64) -> String {
    format!("{prefix}-{year}-{seq:04}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_pads_to_four_digits() {
        assert_eq!(format_ticket_number("ZGL", 2026, 1), "ZGL-2026-0001");
        assert_eq!(format_ticket_number("ZGL", 2026, 42), "ZGL-2026-0042");
        assert_eq!(format_ticket_number("ZGL", 2026, 9999), "ZGL-2026-9999");
    }

    #[test]
    fn test_format_widens_past_9999() {
        assert_eq!(format_ticket_number("ZGL", 2026, 10000), "ZGL-2026-10000");
        assert_eq!(format_ticket_number("ZGL", 2026, 123456), "ZGL-2026-123456");
    }

    #[test]
    fn test_parse_sequence() {
        assert_eq!(parse_sequence("ZGL-2026-0001"), 1);
        assert_eq!(parse_sequence("ZGL-2026-9999"), 9999);
        assert_eq!(parse_sequence("ZGL-2026-10000"), 10000);
    }

    #[test]
    fn test_parse_malformed_is_zero() {
        assert_eq!(parse_sequence("ZGL-2026-"), 0);
        assert_eq!(parse_sequence("ZGL-2026-abc"), 0);
        assert_eq!(parse_sequence("garbage"), 0);
        assert_eq!(parse_sequence(""), 0);
        assert_eq!(parse_sequence("ZGL-2026--5"), 0);
    }

    #[test]
    fn test_max_sequence_skips_malformed() {
        let numbers = ["ZGL-2026-0003", "ZGL-2026-junk", "ZGL-2026-0011"];
        assert_eq!(max_sequence(numbers.iter().copied()), 11);
    }

    #[test]
    fn test_max_sequence_empty_partition_starts_at_one() {
        assert_eq!(max_sequence(std::iter::empty()), 0);
        assert_eq!(
            format_ticket_number("ZGL", 2027, max_sequence(std::iter::empty()) + 1),
            "ZGL-2027-0001"
        );
    }
}
