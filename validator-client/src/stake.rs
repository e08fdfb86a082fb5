//! Stake deposits and withdrawals

use crate::{
    error::{Error, Result},
    ledger::{ensure_signer, LedgerClient, TxHash},
    types::{IdentityRecord, Role},
};
use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

// 10^77 is the largest power of ten below 2^256
const MAX_DECIMALS: u32 = 77;

/// Convert a decimal token amount to base units
pub fn parse_amount(input: &str, decimals: u32) -> Result<U256> {
    if decimals > MAX_DECIMALS {
        return Err(Error::Validation(format!(
            "token decimals {} exceed {}",
            decimals, MAX_DECIMALS
        )));
    }
    let amount = Decimal::from_str(input.trim())
        .map_err(|e| Error::Validation(format!("invalid amount {:?}: {}", input, e)))?
        .normalize();

    if amount <= Decimal::ZERO {
        return Err(Error::Validation("amount must be positive".to_string()));
    }
    if amount.scale() > decimals {
        return Err(Error::Validation(format!(
            "amount {} has more than {} decimal places",
            amount, decimals
        )));
    }

    let mantissa = u128::try_from(amount.mantissa())
        .map_err(|_| Error::Validation(format!("invalid amount {}", amount)))?;
    let scale = U256::exp10((decimals - amount.scale()) as usize);
    U256::from(mantissa)
        .checked_mul(scale)
        .ok_or_else(|| Error::Validation(format!("amount {} is too large", amount)))
}

/// Render base units as a decimal token amount
pub fn format_amount(value: U256, decimals: u32) -> String {
    let digits = value.to_string();
    let decimals = decimals as usize;
    if decimals == 0 {
        return digits;
    }

    let padded = format!("{:0>width$}", digits, width = decimals + 1);
    let (whole, frac) = padded.split_at(padded.len() - decimals);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        whole.to_string()
    } else {
        format!("{}.{}", whole, frac)
    }
}

/// Result of a deposit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepositOutcome {
    /// Approval issued first, when the allowance was insufficient
    pub approval_tx: Option<TxHash>,
    /// Deposit transaction
    pub tx_hash: TxHash,
}

/// Collateral management
pub struct StakeController {
    ledger: Arc<dyn LedgerClient>,
    expected_signer: Option<Address>,
}

impl StakeController {
    /// Create a new controller
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            ledger,
            expected_signer: None,
        }
    }

    /// Require the resolved identity to sign as `address`
    pub fn with_expected_signer(mut self, address: Option<Address>) -> Self {
        self.expected_signer = address;
        self
    }

    /// Deposit `amount` base units for `role`
    ///
    /// Approves the stake manager only when the current allowance is below
    /// `amount`, so repeated deposits under a standing approval never
    /// re-approve.
    pub async fn deposit(
        &self,
        identity: &IdentityRecord,
        role: Role,
        amount: U256,
    ) -> Result<DepositOutcome> {
        ensure_signer(self.ledger.as_ref(), identity.address, self.expected_signer)?;
        if amount.is_zero() {
            return Err(Error::Validation("amount must be positive".to_string()));
        }

        let spender = self.ledger.stake_manager();
        let allowance = self.ledger.allowance(identity.address, spender).await?;
        debug!(allowance = %allowance, amount = %amount, "Checked stake allowance");

        let approval_tx = if allowance < amount {
            let tx = self.ledger.approve(spender, amount).await?;
            info!(spender = ?spender, amount = %amount, tx = ?tx, "Approved stake manager");
            Some(tx)
        } else {
            None
        };

        let tx_hash = self.ledger.deposit_stake(role, amount).await?;
        info!(
            label = %identity.label,
            role = %role,
            amount = %amount,
            tx = ?tx_hash,
            "Stake deposited"
        );

        Ok(DepositOutcome {
            approval_tx,
            tx_hash,
        })
    }

    /// Request withdrawal of `amount` base units for `role`
    ///
    /// Finalizing after any unbonding period is left to the operator.
    pub async fn withdraw(
        &self,
        identity: &IdentityRecord,
        role: Role,
        amount: U256,
    ) -> Result<TxHash> {
        ensure_signer(self.ledger.as_ref(), identity.address, self.expected_signer)?;
        if amount.is_zero() {
            return Err(Error::Validation("amount must be positive".to_string()));
        }

        let tx_hash = self.ledger.withdraw_stake(role, amount).await?;
        info!(
            label = %identity.label,
            role = %role,
            amount = %amount,
            tx = ?tx_hash,
            "Stake withdrawal requested"
        );
        Ok(tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::mock::MockLedger;
    use crate::types::SecretKey;
    use chrono::Utc;

    fn identity(address: Address) -> IdentityRecord {
        IdentityRecord {
            label: "alice".to_string(),
            ens: "alice.club.agi.eth".to_string(),
            subdomain: "alice".to_string(),
            address,
            private_key: SecretKey::from_bytes([1u8; 32]),
            proof: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1", 18).unwrap(), U256::exp10(18));
        assert_eq!(parse_amount("12.5", 2).unwrap(), U256::from(1250));
        assert_eq!(parse_amount("0.010", 2).unwrap(), U256::from(1));
        assert_eq!(parse_amount("7", 0).unwrap(), U256::from(7));
    }

    #[test]
    fn test_parse_amount_rejects() {
        assert!(matches!(parse_amount("0", 18), Err(Error::Validation(_))));
        assert!(matches!(parse_amount("-1", 18), Err(Error::Validation(_))));
        assert!(matches!(parse_amount("1.001", 2), Err(Error::Validation(_))));
        assert!(matches!(parse_amount("ten", 18), Err(Error::Validation(_))));
        assert!(matches!(
            parse_amount("79228162514264337593543950335", 77),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(U256::exp10(18), 18), "1");
        assert_eq!(format_amount(U256::from(1250), 2), "12.5");
        assert_eq!(format_amount(U256::from(5), 3), "0.005");
        assert_eq!(format_amount(U256::from(5), 0), "5");
    }

    #[tokio::test]
    async fn test_deposit_approves_only_when_needed() {
        let me = Address::repeat_byte(1);
        let ledger = Arc::new(MockLedger::new(me));
        ledger.mint(me, U256::from(1_000));
        let controller = StakeController::new(ledger.clone());
        let id = identity(me);

        let first = controller.deposit(&id, Role::Validator, U256::from(100)).await.unwrap();
        assert!(first.approval_tx.is_some());
        assert_eq!(ledger.approval_count(), 1);

        // Allowance was consumed by the deposit
        let second = controller.deposit(&id, Role::Validator, U256::from(100)).await.unwrap();
        assert!(second.approval_tx.is_some());
        assert_eq!(ledger.stake_of(me, Role::Validator), U256::from(200));
    }

    #[tokio::test]
    async fn test_deposit_under_standing_allowance() {
        let me = Address::repeat_byte(1);
        let ledger = Arc::new(MockLedger::new(me));
        ledger.mint(me, U256::from(1_000));
        ledger.set_allowance(me, ledger.stake_manager(), U256::from(1_000));
        let controller = StakeController::new(ledger.clone());
        let id = identity(me);

        for _ in 0..2 {
            let outcome = controller.deposit(&id, Role::Agent, U256::from(100)).await.unwrap();
            assert!(outcome.approval_tx.is_none());
        }
        assert_eq!(ledger.approval_count(), 0);
    }

    #[tokio::test]
    async fn test_withdraw() {
        let me = Address::repeat_byte(1);
        let ledger = Arc::new(MockLedger::new(me));
        ledger.mint(me, U256::from(50));
        let controller = StakeController::new(ledger.clone());
        let id = identity(me);

        controller.deposit(&id, Role::Platform, U256::from(50)).await.unwrap();
        controller.withdraw(&id, Role::Platform, U256::from(20)).await.unwrap();
        assert_eq!(ledger.stake_of(me, Role::Platform), U256::from(30));

        let err = controller
            .withdraw(&id, Role::Platform, U256::from(100))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Ledger(_)));
    }
}
