//! Gateway response code descriptions.

pub const SUCCESS: &str = "00";

const GENERIC_FAILURE: &str = "Payment failed";

/// Customer-facing message for a non-success response code. Unknown codes
/// map to a generic failure message.
pub fn describe(code: &str) -> &'static str {
    match code {
        "07" => "Amount deducted, but the transaction is suspected of fraud",
        "09" => "Card or account is not registered for internet banking",
        "10" => "Card or account authentication failed more than 3 times",
        "11" => "Payment window expired",
        "12" => "Card or account is locked",
        "13" => "Incorrect one-time password",
        "24" => "Transaction cancelled by customer",
        "51" => "Insufficient account balance",
        "65" => "Daily transaction limit exceeded",
        "75" => "Issuing bank is under maintenance",
        "79" => "Payment password entered incorrectly too many times",
        "99" => "Unspecified gateway error",
        _ => GENERIC_FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_and_unknown_codes() {
        assert_eq!(describe("24"), "Transaction cancelled by customer");
        assert_eq!(describe("51"), "Insufficient account balance");
        assert_eq!(describe("42"), GENERIC_FAILURE);
        assert_eq!(describe(""), GENERIC_FAILURE);
    }
}
