//! Request and response bodies

pub mod bookings;
pub mod payments;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use core_kernel::{Currency, Money};

use crate::error::ApiError;

/// An amount in major units with its ISO 4217 code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct MoneyDto {
    pub amount: Decimal,
    #[validate(length(equal = 3, message = "currency must be a three-letter ISO 4217 code"))]
    pub currency: String,
}

impl MoneyDto {
    pub fn to_money(&self) -> Result<Money, ApiError> {
        let currency: Currency = self
            .currency
            .parse()
            .map_err(|e: core_kernel::MoneyError| ApiError::Validation(e.to_string()))?;
        if self.amount.is_sign_negative() {
            return Err(ApiError::Validation("amount must not be negative".to_string()));
        }
        if self.amount.normalize().scale() > currency.decimal_places() {
            return Err(ApiError::Validation(format!(
                "{} amounts allow at most {} decimal places",
                currency,
                currency.decimal_places()
            )));
        }
        Ok(Money::new(self.amount, currency))
    }
}

impl From<Money> for MoneyDto {
    fn from(money: Money) -> Self {
        Self {
            amount: money.amount(),
            currency: money.currency().code().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_money_dto_parses_currency_case_insensitively() {
        let dto = MoneyDto {
            amount: dec!(80000),
            currency: "krw".to_string(),
        };
        assert_eq!(dto.to_money().unwrap(), Money::krw(80_000));
    }

    #[test]
    fn test_money_dto_rejects_sub_won_amounts() {
        let dto = MoneyDto {
            amount: dec!(100.5),
            currency: "KRW".to_string(),
        };
        assert!(matches!(dto.to_money(), Err(ApiError::Validation(_))));
    }

    #[test]
    fn test_money_dto_rejects_negative_and_unknown() {
        let negative = MoneyDto {
            amount: dec!(-1),
            currency: "KRW".to_string(),
        };
        assert!(negative.to_money().is_err());

        let unknown = MoneyDto {
            amount: dec!(1),
            currency: "XYZ".to_string(),
        };
        assert!(unknown.to_money().is_err());
    }
}
