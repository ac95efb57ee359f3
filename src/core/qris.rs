//! Dynamic QRIS payload generation
//!
//! A merchant publishes one static, merchant-signed EMV-QR payload with no
//! amount in it. For every top-up we derive a dynamic payload that embeds
//! the exact amount, so the payer cannot type a different one.
//!
//! # Algorithm
//!
//! 1. Drop the trailing 4-character CRC value of the static payload
//! 2. Flip the point-of-initiation field from static (`010211`) to dynamic (`010212`)
//! 3. Split at the country code field `5802ID`, which must occur exactly once
//! 4. Insert the amount field (`54` + 2-digit length + decimal amount) before it
//! 5. Append a fresh CRC16/CCITT-FALSE over the result as 4 uppercase hex digits
//!
//! The generator is a pure function of the template and the amount.

use crate::types::{Amount, LedgerError};

/// Static QRIS payload issued to the merchant
pub const STATIC_QRIS: &str = "00020101021126610014COM.GO-JEK.WWW01189360091433636775460210G3636775460303UMI51440014ID.CO.QRIS.WWW0215ID10254166023610303UMI5204899953033605802ID5925GIRI RAYA NURSAMTO, Digit6012KOTA CIREBON61054512162070703A016304D5CA";

const STATIC_INITIATION: &str = "010211";
const DYNAMIC_INITIATION: &str = "010212";
const COUNTRY_ANCHOR: &str = "5802ID";
const AMOUNT_TAG: &str = "54";
const CRC_VALUE_LEN: usize = 4;

/// Compute CRC16/CCITT-FALSE (init 0xFFFF, poly 0x1021, no reflection)
pub fn crc16_ccitt_false(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Turns the merchant's static payload into per-amount dynamic payloads
#[derive(Debug, Clone)]
pub struct QrisGenerator {
    template: String,
}

impl QrisGenerator {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Build the dynamic payload for `amount`
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - Payload ending in a valid 4-hex-digit CRC
    /// * `Err(LedgerError::Validation)` - If `amount` is not positive
    /// * `Err(LedgerError::MalformedTemplate)` - If the template is too short
    ///   or the country anchor does not occur exactly once
    pub fn generate(&self, amount: Amount) -> Result<String, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::validation(format!(
                "Amount must be positive, got {}",
                amount
            )));
        }

        let body = self
            .template
            .len()
            .checked_sub(CRC_VALUE_LEN)
            .and_then(|end| self.template.get(..end))
            .ok_or_else(|| LedgerError::malformed_template("payload shorter than its CRC"))?;
        let body = body.replacen(STATIC_INITIATION, DYNAMIC_INITIATION, 1);

        let occurrences = body.matches(COUNTRY_ANCHOR).count();
        if occurrences != 1 {
            return Err(LedgerError::malformed_template(format!(
                "expected exactly one '{}' field, found {}",
                COUNTRY_ANCHOR, occurrences
            )));
        }
        let (prefix, suffix) = body
            .split_once(COUNTRY_ANCHOR)
            .ok_or_else(|| LedgerError::malformed_template("country field missing"))?;

        let value = amount.to_string();
        let mut payload = String::with_capacity(body.len() + value.len() + 8);
        payload.push_str(prefix);
        payload.push_str(AMOUNT_TAG);
        payload.push_str(&format!("{:02}", value.len()));
        payload.push_str(&value);
        payload.push_str(COUNTRY_ANCHOR);
        payload.push_str(suffix);

        let crc = crc16_ccitt_false(payload.as_bytes());
        payload.push_str(&format!("{:04X}", crc));
        Ok(payload)
    }
}

impl Default for QrisGenerator {
    fn default() -> Self {
        Self::new(STATIC_QRIS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn split_crc(payload: &str) -> (&str, &str) {
        payload.split_at(payload.len() - CRC_VALUE_LEN)
    }

    #[test]
    fn test_crc_check_value() {
        // Standard check input for CRC-16/CCITT-FALSE
        assert_eq!(crc16_ccitt_false(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_static_template_crc_is_valid() {
        let (body, crc) = split_crc(STATIC_QRIS);
        assert_eq!(format!("{:04X}", crc16_ccitt_false(body.as_bytes())), crc);
    }

    #[rstest]
    #[case(10_000, "5405100005802ID", "8F77")]
    #[case(50_000, "5405500005802ID", "E38A")]
    #[case(1_000_000, "540710000005802ID", "A9A3")]
    #[case(1, "540115802ID", "C2EF")]
    fn test_generate_known_vectors(
        #[case] amount: Amount,
        #[case] amount_field: &str,
        #[case] expected_crc: &str,
    ) {
        let payload = QrisGenerator::default().generate(amount).unwrap();

        assert!(payload.starts_with("000201010212"));
        assert!(payload.contains(amount_field));
        assert!(payload.ends_with(expected_crc));
    }

    #[rstest]
    #[case(1)]
    #[case(10_000)]
    #[case(987_654_321)]
    #[case(Amount::MAX)]
    fn test_generated_crc_verifies_independently(#[case] amount: Amount) {
        let payload = QrisGenerator::default().generate(amount).unwrap();
        let (body, crc) = split_crc(&payload);

        assert_eq!(crc.len(), 4);
        assert!(crc.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert_eq!(u16::from_str_radix(crc, 16).unwrap(), crc16_ccitt_false(body.as_bytes()));
    }

    #[test]
    fn test_generate_is_deterministic() {
        let generator = QrisGenerator::default();
        assert_eq!(
            generator.generate(25_000).unwrap(),
            generator.generate(25_000).unwrap()
        );
    }

    #[test]
    fn test_different_amounts_differ_only_in_amount_field_and_crc() {
        let generator = QrisGenerator::default();
        let strip = |amount: Amount| {
            let payload = generator.generate(amount).unwrap();
            let (body, _) = split_crc(&payload);
            let value = amount.to_string();
            let field = format!("{}{:02}{}", AMOUNT_TAG, value.len(), value);
            body.replacen(&field, "", 1)
        };

        assert_eq!(strip(10_000), strip(75_500));
        assert_ne!(
            generator.generate(10_000).unwrap(),
            generator.generate(75_500).unwrap()
        );
    }

    #[rstest]
    #[case::zero(0)]
    #[case::negative(-500)]
    fn test_generate_rejects_non_positive_amount(#[case] amount: Amount) {
        let result = QrisGenerator::default().generate(amount);
        assert!(matches!(result, Err(LedgerError::Validation { .. })));
    }

    #[rstest]
    #[case::missing_anchor("000201010211ABCDEFGH0000")]
    #[case::duplicated_anchor("0002010102115802ID5802ID0000")]
    #[case::too_short("12")]
    fn test_generate_rejects_malformed_template(#[case] template: &str) {
        let result = QrisGenerator::new(template).generate(10_000);
        assert!(matches!(result, Err(LedgerError::MalformedTemplate { .. })));
    }
}
