//! Human-readable reference codes.
//!
//! Codes are random within a day and therefore not guaranteed unique;
//! the unique indexes in storage catch collisions and callers retry.

use chrono::NaiveDate;
use rand::Rng;

const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

fn dated_code<R: Rng + ?Sized>(prefix: &str, date: NaiveDate, rng: &mut R) -> String {
    format!(
        "{}-{}-{}",
        prefix,
        date.format("%Y%m%d"),
        rng.gen_range(1000..=9999)
    )
}

/// `INT-YYYYMMDD-NNNN`
pub fn transaction_id<R: Rng + ?Sized>(date: NaiveDate, rng: &mut R) -> String {
    dated_code("INT", date, rng)
}

/// `CNT-YYYYMMDD-NNNN`
pub fn contract_id<R: Rng + ?Sized>(date: NaiveDate, rng: &mut R) -> String {
    dated_code("CNT", date, rng)
}

/// `BUY-YYYYMMDD-XXXX`, four uppercase letters or digits.
pub fn buyer_public_id<R: Rng + ?Sized>(date: NaiveDate, rng: &mut R) -> String {
    let suffix: String = (0..4)
        .map(|_| ALPHANUMERIC[rng.gen_range(0..ALPHANUMERIC.len())] as char)
        .collect();
    format!("BUY-{}-{}", date.format("%Y%m%d"), suffix)
}
