//! Customer-facing booking reference codes: `BK-<base36 millis>-<6 chars>`.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;

const PREFIX: &str = "BK";
const SUFFIX_LEN: usize = 6;

pub fn generate_booking_reference(now: DateTime<Utc>) -> String {
    generate_with(&mut rand::thread_rng(), now)
}

pub fn generate_with<R: Rng>(rng: &mut R, now: DateTime<Utc>) -> String {
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| char::from(rng.sample(Alphanumeric)).to_ascii_uppercase())
        .collect();
    let millis = u64::try_from(now.timestamp_millis()).unwrap_or(0);
    format!("{}-{}-{}", PREFIX, to_base36(millis), suffix)
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn reference_has_prefix_timestamp_and_suffix() {
        let now = Utc.with_ymd_and_hms(2025, 3, 14, 15, 9, 26).unwrap();
        let reference = generate_with(&mut StdRng::seed_from_u64(7), now);
        let parts: Vec<&str> = reference.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "BK");
        assert_eq!(parts[1], to_base36(now.timestamp_millis() as u64));
        assert_eq!(parts[2].len(), SUFFIX_LEN);
        assert!(parts[2].chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn same_millisecond_references_differ() {
        let now = Utc::now();
        let references: HashSet<String> = (0..200).map(|_| generate_booking_reference(now)).collect();
        assert_eq!(references.len(), 200);
    }

    #[test]
    fn base36_encodes_known_values() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "Z");
        assert_eq!(to_base36(36), "10");
    }
}
