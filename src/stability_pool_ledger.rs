//! Stability pool accounting with the product-sum scheme.
//!
//! Offsets shrink every deposit by the same factor and hand out collateral pro rata. Instead of
//! touching each deposit, the pool keeps a running product `P` (the factor a unit deposit has been
//! scaled by) and per-collateral sums `S` (collateral gained per unit deposit, weighted by `P`). A
//! deposit snapshots `P` and `S` when it is made and derives its compounded value and gains from the
//! snapshot later:
//!
//! * compounded deposit: `d * P / P_snapshot`
//! * collateral gain: `d * (S - S_snapshot) / P_snapshot`
//!
//! `P` only ever decreases. When it would drop below `1 / SCALE_FACTOR` it is multiplied by
//! `SCALE_FACTOR` and the *scale* is incremented, and an offset that empties the pool resets `P` to
//! one and starts a new *epoch*. Sums are kept per (epoch, scale). Deposits older than one scale
//! change are treated as consumed, as are deposits made in an earlier epoch.
//!
//! TIDE issuance is distributed the same way through the sum `G`. Front ends carry their own stake,
//! the sum of their tagged deposits, and earn the non-kickback share of those deposits' TIDE.

use crate::collateral_registry::*;
use crate::errors::ProtocolError;
use crate::math::*;
use crate::shared_structs::*;
use scrypto::prelude::*;

#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq)]
pub struct DepositSnapshot {
    pub p: Decimal,
    pub sums: CollateralAmounts,
    pub g: Decimal,
    pub epoch: u64,
    pub scale: u64,
}

impl DepositSnapshot {
    fn cleared() -> Self {
        Self {
            p: Decimal::ZERO,
            sums: CollateralAmounts::default(),
            g: Decimal::ZERO,
            epoch: 0,
            scale: 0,
        }
    }
}

#[derive(ScryptoSbor, Clone, Debug)]
pub struct Deposit {
    /// Deposit value at the last touch. The current value is derived from it and the snapshot.
    pub initial_value: Decimal,
    pub front_end: Option<NonFungibleLocalId>,
    pub snapshot: DepositSnapshot,
}

impl Deposit {
    pub fn new() -> Self {
        Self {
            initial_value: Decimal::ZERO,
            front_end: None,
            snapshot: DepositSnapshot::cleared(),
        }
    }
}

#[derive(ScryptoSbor, Clone, Debug)]
pub struct FrontEnd {
    /// Share of TIDE gains passed on to the front end's depositors.
    pub kickback_rate: Decimal,
    pub stake: Decimal,
    pub snapshot: DepositSnapshot,
    /// TIDE earned and not yet claimed.
    pub unclaimed_tide: Decimal,
}

impl FrontEnd {
    pub fn new(kickback_rate: Decimal) -> Result<Self, ProtocolError> {
        if kickback_rate < Decimal::ZERO || kickback_rate > Decimal::ONE {
            return Err(ProtocolError::InvalidKickbackRate);
        }
        Ok(Self {
            kickback_rate,
            stake: Decimal::ZERO,
            snapshot: DepositSnapshot::cleared(),
            unclaimed_tide: Decimal::ZERO,
        })
    }
}

/// Effects of touching a deposit. Gains are paid out in full on every touch.
#[derive(ScryptoSbor, Clone, Debug, Default)]
pub struct DepositChange {
    pub compounded_before: Decimal,
    pub collateral_gains: CollateralAmounts,
    pub tide_gain: Decimal,
    pub front_end_tide_gain: Decimal,
    /// tUSD paid out to the depositor.
    pub withdrawn: Decimal,
    pub new_deposit: Decimal,
}

#[derive(ScryptoSbor, Clone, Debug)]
pub struct StabilityPoolLedger {
    pub total_deposits: Decimal,
    pub p: Decimal,
    pub current_epoch: u64,
    pub current_scale: u64,
    pub epoch_to_scale_to_sum: IndexMap<(u64, u64), CollateralAmounts>,
    pub epoch_to_scale_to_g: IndexMap<(u64, u64), Decimal>,
    pub last_collateral_error: CollateralAmounts,
    pub last_tide_error: Decimal,
    pub last_debt_loss_error: Decimal,
}

impl StabilityPoolLedger {
    pub fn new() -> Self {
        Self {
            total_deposits: Decimal::ZERO,
            p: Decimal::ONE,
            current_epoch: 0,
            current_scale: 0,
            epoch_to_scale_to_sum: IndexMap::default(),
            epoch_to_scale_to_g: IndexMap::default(),
            last_collateral_error: CollateralAmounts::default(),
            last_tide_error: Decimal::ZERO,
            last_debt_loss_error: Decimal::ZERO,
        }
    }

    pub fn sum_at(&self, epoch: u64, scale: u64, address: &ResourceAddress) -> Decimal {
        self.epoch_to_scale_to_sum
            .get(&(epoch, scale))
            .and_then(|sums| sums.get(address).cloned())
            .unwrap_or(Decimal::ZERO)
    }

    pub fn g_at(&self, epoch: u64, scale: u64) -> Decimal {
        self.epoch_to_scale_to_g
            .get(&(epoch, scale))
            .cloned()
            .unwrap_or(Decimal::ZERO)
    }

    fn current_snapshot(&self) -> DepositSnapshot {
        DepositSnapshot {
            p: self.p,
            sums: self
                .epoch_to_scale_to_sum
                .get(&(self.current_epoch, self.current_scale))
                .cloned()
                .unwrap_or_default(),
            g: self.g_at(self.current_epoch, self.current_scale),
            epoch: self.current_epoch,
            scale: self.current_scale,
        }
    }

    //==================================================================
    //                       DISTRIBUTION
    //==================================================================

    /// Spreads freshly issued TIDE over current deposits. Does nothing while the pool is empty.
    pub fn distribute_tide(&mut self, issuance: Decimal) {
        if self.total_deposits.is_zero() || issuance.is_zero() {
            return;
        }
        let numerator = issuance + self.last_tide_error;
        let per_unit_staked = numerator / self.total_deposits;
        self.last_tide_error = numerator - per_unit_staked * self.total_deposits;

        let marginal_g = per_unit_staked * self.p;
        *self
            .epoch_to_scale_to_g
            .entry((self.current_epoch, self.current_scale))
            .or_insert(Decimal::ZERO) += marginal_g;
    }

    /// Cancels `debt` against pool deposits and shares `collateral` among depositors.
    pub fn offset(&mut self, debt: Decimal, collateral: &CollateralAmounts) -> Result<(), ProtocolError> {
        if debt.is_zero() && collateral.is_empty() {
            return Ok(());
        }
        if self.total_deposits.is_zero() || debt > self.total_deposits {
            return Err(ProtocolError::InsufficientStabilityPoolDeposits);
        }

        let total = self.total_deposits;

        // Loss per unit and the resulting product are settled before anything is written.
        let mut debt_loss_error = self.last_debt_loss_error;
        let next_product = if debt > Decimal::ZERO {
            let loss_per_unit = if debt == total {
                debt_loss_error = Decimal::ZERO;
                Decimal::ONE
            } else {
                let numerator = debt - debt_loss_error;
                let loss_per_unit = numerator / total + one_atto();
                debt_loss_error = (loss_per_unit * total - numerator).max(Decimal::ZERO);
                loss_per_unit
            };
            Some(self.next_product(loss_per_unit)?)
        } else {
            None
        };

        let key = (self.current_epoch, self.current_scale);
        for (address, amount) in collateral {
            let error = self.last_collateral_error.get(address).cloned().unwrap_or(Decimal::ZERO);
            let numerator = *amount + error;
            let gain_per_unit = numerator / total;
            self.last_collateral_error
                .insert(*address, numerator - gain_per_unit * total);

            let marginal_sum = gain_per_unit * self.p;
            *self
                .epoch_to_scale_to_sum
                .entry(key)
                .or_default()
                .entry(*address)
                .or_insert(Decimal::ZERO) += marginal_sum;
        }

        if let Some((p, epoch, scale)) = next_product {
            self.p = p;
            self.current_epoch = epoch;
            self.current_scale = scale;
            self.last_debt_loss_error = debt_loss_error;
            self.total_deposits -= debt;
        }
        Ok(())
    }

    /// Product, epoch and scale after a loss of `loss_per_unit` per deposited unit.
    ///
    /// A single rescale per offset may not be enough after repeated near-total losses; if the product
    /// still truncates to zero the offset is refused.
    fn next_product(&self, loss_per_unit: Decimal) -> Result<(Decimal, u64, u64), ProtocolError> {
        let product_factor = Decimal::ONE - loss_per_unit;
        let threshold = Decimal::ONE / scale_factor();

        if product_factor.is_zero() {
            return Ok((Decimal::ONE, self.current_epoch + 1, 0));
        }
        let (p, scale) = if self.p * product_factor < threshold {
            (self.p * scale_factor() * product_factor, self.current_scale + 1)
        } else {
            (self.p * product_factor, self.current_scale)
        };
        if p <= Decimal::ZERO {
            return Err(ProtocolError::ProductUnderflow);
        }
        Ok((p, self.current_epoch, scale))
    }

    //==================================================================
    //                          VALUES
    //==================================================================

    fn compounded_stake(&self, initial: Decimal, snapshot: &DepositSnapshot) -> Decimal {
        if initial.is_zero() || snapshot.epoch < self.current_epoch {
            return Decimal::ZERO;
        }
        let compounded = match self.current_scale - snapshot.scale {
            0 => mul_div(initial, self.p, snapshot.p),
            1 => mul_div(initial, self.p, snapshot.p) / scale_factor(),
            _ => Decimal::ZERO,
        };
        // A remainder this small is rounding noise of a consumed deposit.
        if compounded < initial / scale_factor() {
            return Decimal::ZERO;
        }
        compounded
    }

    pub fn compounded_deposit(&self, deposit: &Deposit) -> Decimal {
        self.compounded_stake(deposit.initial_value, &deposit.snapshot)
    }

    pub fn compounded_front_end_stake(&self, front_end: &FrontEnd) -> Decimal {
        self.compounded_stake(front_end.stake, &front_end.snapshot)
    }

    pub fn collateral_gains(&self, deposit: &Deposit) -> CollateralAmounts {
        let mut gains = CollateralAmounts::default();
        if deposit.initial_value.is_zero() {
            return gains;
        }
        let snapshot = &deposit.snapshot;
        let mut addresses: Vec<ResourceAddress> = Vec::new();
        for key in [(snapshot.epoch, snapshot.scale), (snapshot.epoch, snapshot.scale + 1)] {
            if let Some(sums) = self.epoch_to_scale_to_sum.get(&key) {
                for address in sums.keys() {
                    if !addresses.contains(address) {
                        addresses.push(*address);
                    }
                }
            }
        }
        for address in addresses {
            let snapshot_sum = snapshot.sums.get(&address).cloned().unwrap_or(Decimal::ZERO);
            let first_portion = self.sum_at(snapshot.epoch, snapshot.scale, &address) - snapshot_sum;
            let second_portion = self.sum_at(snapshot.epoch, snapshot.scale + 1, &address) / scale_factor();
            add_amount(
                &mut gains,
                address,
                mul_div(deposit.initial_value, first_portion + second_portion, snapshot.p),
            );
        }
        gains
    }

    fn tide_gain_from_snapshot(&self, initial: Decimal, snapshot: &DepositSnapshot) -> Decimal {
        if initial.is_zero() {
            return Decimal::ZERO;
        }
        let first_portion = self.g_at(snapshot.epoch, snapshot.scale) - snapshot.g;
        let second_portion = self.g_at(snapshot.epoch, snapshot.scale + 1) / scale_factor();
        mul_div(initial, first_portion + second_portion, snapshot.p)
    }

    /// TIDE a depositor would collect now, after the front end's cut.
    pub fn depositor_tide_gain(&self, deposit: &Deposit, kickback_rate: Decimal) -> Decimal {
        kickback_rate * self.tide_gain_from_snapshot(deposit.initial_value, &deposit.snapshot)
    }

    /// TIDE a front end earned since its last stake change, excluding what it already banked.
    pub fn front_end_tide_gain(&self, front_end: &FrontEnd) -> Decimal {
        (Decimal::ONE - front_end.kickback_rate) * self.tide_gain_from_snapshot(front_end.stake, &front_end.snapshot)
    }

    /// Banks a front end's TIDE gain and restarts its stake from the compounded value.
    pub fn settle_front_end(&self, front_end: &mut FrontEnd) -> Decimal {
        let gain = self.front_end_tide_gain(front_end);
        front_end.unclaimed_tide += gain;
        front_end.stake = self.compounded_front_end_stake(front_end);
        front_end.snapshot = if front_end.stake.is_zero() {
            DepositSnapshot::cleared()
        } else {
            self.current_snapshot()
        };
        gain
    }

    //==================================================================
    //                        DEPOSIT CHANGES
    //==================================================================

    /// Adds `amount` tUSD to a deposit, paying out its gains. A first deposit joins `front_end`.
    pub fn provide(
        &mut self,
        deposit: &mut Deposit,
        front_end: Option<(&NonFungibleLocalId, &mut FrontEnd)>,
        amount: Decimal,
    ) -> Result<DepositChange, ProtocolError> {
        if amount <= Decimal::ZERO {
            return Err(ProtocolError::ZeroAmount);
        }
        if deposit.initial_value.is_zero() {
            deposit.front_end = front_end.as_ref().map(|(id, _)| (*id).clone());
        }
        self.touch(deposit, front_end.map(|(_, front_end)| front_end), amount, Decimal::ZERO)
    }

    /// Withdraws up to `amount` tUSD from a deposit, paying out its gains. Zero claims gains only.
    pub fn withdraw(
        &mut self,
        deposit: &mut Deposit,
        front_end: Option<&mut FrontEnd>,
        amount: Decimal,
    ) -> Result<DepositChange, ProtocolError> {
        if deposit.initial_value.is_zero() {
            return Err(ProtocolError::NoDeposit);
        }
        if amount < Decimal::ZERO {
            return Err(ProtocolError::InvalidParameter);
        }
        self.touch(deposit, front_end, Decimal::ZERO, amount)
    }

    fn touch(
        &mut self,
        deposit: &mut Deposit,
        front_end: Option<&mut FrontEnd>,
        added: Decimal,
        withdraw_request: Decimal,
    ) -> Result<DepositChange, ProtocolError> {
        let compounded = self.compounded_deposit(deposit);
        let withdrawn = withdraw_request.min(compounded);
        let collateral_gains = self.collateral_gains(deposit);

        let mut change = DepositChange {
            compounded_before: compounded,
            collateral_gains,
            withdrawn,
            ..Default::default()
        };

        match front_end {
            Some(front_end) => {
                change.tide_gain = self.depositor_tide_gain(deposit, front_end.kickback_rate);
                change.front_end_tide_gain = self.front_end_tide_gain(front_end);
                front_end.unclaimed_tide += change.front_end_tide_gain;

                let compounded_stake = self.compounded_front_end_stake(front_end);
                let new_stake = (compounded_stake + added - withdrawn).max(Decimal::ZERO);
                front_end.stake = new_stake;
                front_end.snapshot = if new_stake.is_zero() {
                    DepositSnapshot::cleared()
                } else {
                    self.current_snapshot()
                };
            }
            None => {
                change.tide_gain = self.depositor_tide_gain(deposit, Decimal::ONE);
            }
        }

        let new_deposit = compounded + added - withdrawn;
        self.total_deposits = self.total_deposits + added - withdrawn;

        deposit.initial_value = new_deposit;
        if new_deposit.is_zero() {
            deposit.snapshot = DepositSnapshot::cleared();
            deposit.front_end = None;
        } else {
            deposit.snapshot = self.current_snapshot();
        }

        change.new_deposit = new_deposit;
        Ok(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLL_A: ResourceAddress = XRD;
    const COLL_B: ResourceAddress = ACCOUNT_OWNER_BADGE;

    fn coll(address: ResourceAddress, amount: Decimal) -> CollateralAmounts {
        let mut amounts = CollateralAmounts::default();
        amounts.insert(address, amount);
        amounts
    }

    fn deposit(pool: &mut StabilityPoolLedger, amount: Decimal) -> Deposit {
        let mut deposit = Deposit::new();
        pool.provide(&mut deposit, None, amount).unwrap();
        deposit
    }

    fn close_to(a: Decimal, b: Decimal) -> bool {
        (a - b).checked_abs().unwrap() < dec!("0.000001")
    }

    #[test]
    fn offset_refuses_product_underflow() {
        let mut pool = StabilityPoolLedger::new();
        let alice = deposit(&mut pool, dec!(10000000000));
        pool.p = dec!("0.000000000000000001");

        // Leaves a 1e-10 fraction of the pool, which truncates the rescaled product to zero
        let result = pool.offset(dec!(9999999999), &coll(COLL_A, dec!(4)));
        assert_eq!(result, Err(ProtocolError::ProductUnderflow));

        assert_eq!(pool.total_deposits, dec!(10000000000));
        assert_eq!(pool.p, dec!("0.000000000000000001"));
        assert_eq!(pool.current_scale, 0);
        assert_eq!(pool.sum_at(0, 0, &COLL_A), Decimal::ZERO);
        assert!(pool.last_collateral_error.is_empty());
        assert_eq!(alice.initial_value, dec!(10000000000));
    }

    #[test]
    fn offset_shrinks_deposits_pro_rata() {
        let mut pool = StabilityPoolLedger::new();
        let alice = deposit(&mut pool, dec!(1000));
        let bob = deposit(&mut pool, dec!(3000));

        pool.offset(dec!(400), &coll(COLL_A, dec!(4))).unwrap();

        assert_eq!(pool.total_deposits, dec!(3600));
        assert!(close_to(pool.compounded_deposit(&alice), dec!(900)));
        assert!(close_to(pool.compounded_deposit(&bob), dec!(2700)));
        assert!(close_to(*pool.collateral_gains(&alice).get(&COLL_A).unwrap(), Decimal::ONE));
        assert!(close_to(*pool.collateral_gains(&bob).get(&COLL_A).unwrap(), dec!(3)));
        assert!(pool.p < Decimal::ONE);
    }

    #[test]
    fn later_deposit_does_not_share_earlier_gains() {
        let mut pool = StabilityPoolLedger::new();
        let alice = deposit(&mut pool, dec!(1000));
        pool.offset(dec!(100), &coll(COLL_A, Decimal::ONE)).unwrap();
        let bob = deposit(&mut pool, dec!(900));
        pool.offset(dec!(180), &coll(COLL_B, dec!(2))).unwrap();

        assert!(pool.collateral_gains(&bob).get(&COLL_A).is_none());
        assert!(close_to(*pool.collateral_gains(&bob).get(&COLL_B).unwrap(), Decimal::ONE));
        assert!(close_to(*pool.collateral_gains(&alice).get(&COLL_A).unwrap(), Decimal::ONE));
        assert!(close_to(*pool.collateral_gains(&alice).get(&COLL_B).unwrap(), Decimal::ONE));
        assert!(close_to(pool.compounded_deposit(&alice), dec!(810)));
        assert!(close_to(pool.compounded_deposit(&bob), dec!(810)));
    }

    #[test]
    fn emptying_the_pool_starts_a_new_epoch() {
        let mut pool = StabilityPoolLedger::new();
        let alice = deposit(&mut pool, dec!(1000));

        pool.offset(dec!(1000), &coll(COLL_A, dec!(10))).unwrap();

        assert_eq!(pool.current_epoch, 1);
        assert_eq!(pool.current_scale, 0);
        assert_eq!(pool.p, Decimal::ONE);
        assert_eq!(pool.total_deposits, Decimal::ZERO);
        assert_eq!(pool.compounded_deposit(&alice), Decimal::ZERO);
        assert!(close_to(*pool.collateral_gains(&alice).get(&COLL_A).unwrap(), dec!(10)));

        let bob = deposit(&mut pool, dec!(500));
        assert_eq!(pool.compounded_deposit(&bob), dec!(500));
    }

    #[test]
    fn scale_change_keeps_deposits_alive() {
        let mut pool = StabilityPoolLedger::new();
        let alice = deposit(&mut pool, dec!(10000));

        pool.offset(dec!("9999.99999"), &coll(COLL_A, Decimal::ONE)).unwrap();

        assert_eq!(pool.current_scale, 1);
        assert_eq!(pool.current_epoch, 0);
        assert!(pool.p > Decimal::ZERO);
        // what is left of alice is below a billionth of her deposit
        assert!(pool.compounded_deposit(&alice) < dec!("0.0001"));

        let bob = deposit(&mut pool, dec!(100));
        pool.offset(dec!(50), &coll(COLL_A, dec!(2))).unwrap();
        assert!(close_to(pool.compounded_deposit(&bob), dec!(100) * dec!("50.00001") / dec!("100.00001")));
        assert!(close_to(*pool.collateral_gains(&alice).get(&COLL_A).unwrap(), Decimal::ONE));
    }

    #[test]
    fn offset_beyond_deposits_is_rejected() {
        let mut pool = StabilityPoolLedger::new();
        deposit(&mut pool, dec!(100));
        assert_eq!(
            pool.offset(dec!(101), &coll(COLL_A, Decimal::ONE)),
            Err(ProtocolError::InsufficientStabilityPoolDeposits)
        );
        let mut empty = StabilityPoolLedger::new();
        assert_eq!(
            empty.offset(dec!(1), &coll(COLL_A, Decimal::ONE)),
            Err(ProtocolError::InsufficientStabilityPoolDeposits)
        );
    }

    #[test]
    fn product_never_increases() {
        let mut pool = StabilityPoolLedger::new();
        deposit(&mut pool, dec!(10000));
        let mut last_p = pool.p;
        for debt in [dec!(100), dec!(2500), dec!("0.000001"), dec!(3000)] {
            pool.offset(debt, &coll(COLL_A, Decimal::ONE)).unwrap();
            assert!(pool.p <= last_p);
            last_p = pool.p;
        }
    }

    #[test]
    fn equal_deposits_share_tide_equally() {
        let mut pool = StabilityPoolLedger::new();
        let depositors: Vec<Deposit> = (0..3).map(|_| deposit(&mut pool, dec!(10000))).collect();

        pool.distribute_tide(dec!(900));

        for depositor in &depositors {
            assert!(close_to(pool.depositor_tide_gain(depositor, Decimal::ONE), dec!(300)));
        }
    }

    #[test]
    fn withdrawal_pays_gains_and_caps_at_compounded_value() {
        let mut pool = StabilityPoolLedger::new();
        let mut alice = deposit(&mut pool, dec!(1000));
        deposit(&mut pool, dec!(1000));
        pool.offset(dec!(1000), &coll(COLL_A, dec!(10))).unwrap();
        pool.distribute_tide(dec!(100));

        let change = pool.withdraw(&mut alice, None, dec!(10000)).unwrap();

        assert!(close_to(change.withdrawn, dec!(500)));
        assert!(close_to(*change.collateral_gains.get(&COLL_A).unwrap(), dec!(5)));
        assert!(close_to(change.tide_gain, dec!(50)));
        assert_eq!(change.new_deposit, Decimal::ZERO);
        assert_eq!(alice.snapshot, DepositSnapshot::cleared());
        assert_eq!(pool.withdraw(&mut alice, None, Decimal::ZERO).err(), Some(ProtocolError::NoDeposit));
    }

    #[test]
    fn claim_resets_gains() {
        let mut pool = StabilityPoolLedger::new();
        let mut alice = deposit(&mut pool, dec!(1000));
        pool.offset(dec!(100), &coll(COLL_A, Decimal::ONE)).unwrap();

        let first = pool.withdraw(&mut alice, None, Decimal::ZERO).unwrap();
        assert!(close_to(*first.collateral_gains.get(&COLL_A).unwrap(), Decimal::ONE));
        let second = pool.withdraw(&mut alice, None, Decimal::ZERO).unwrap();
        assert!(second.collateral_gains.is_empty());
        assert!(close_to(alice.initial_value, dec!(900)));
    }

    #[test]
    fn front_end_takes_its_cut_of_tide() {
        let mut pool = StabilityPoolLedger::new();
        let front_end_id = NonFungibleLocalId::integer(1);
        let mut front_end = FrontEnd::new(dec!("0.6")).unwrap();

        let mut alice = Deposit::new();
        pool.provide(&mut alice, Some((&front_end_id, &mut front_end)), dec!(1000)).unwrap();
        assert_eq!(alice.front_end, Some(front_end_id.clone()));
        assert_eq!(front_end.stake, dec!(1000));

        pool.distribute_tide(dec!(100));
        let change = pool.withdraw(&mut alice, Some(&mut front_end), Decimal::ZERO).unwrap();

        assert!(close_to(change.tide_gain, dec!(60)));
        assert!(close_to(front_end.unclaimed_tide, dec!(40)));
        assert!(close_to(front_end.stake, dec!(1000)));
        assert_eq!(FrontEnd::new(dec!("1.1")).err(), Some(ProtocolError::InvalidKickbackRate));
    }

    #[test]
    fn settling_a_front_end_banks_its_gain_once() {
        let mut pool = StabilityPoolLedger::new();
        let front_end_id = NonFungibleLocalId::integer(1);
        let mut front_end = FrontEnd::new(dec!("0.5")).unwrap();
        let mut alice = Deposit::new();
        pool.provide(&mut alice, Some((&front_end_id, &mut front_end)), dec!(1000)).unwrap();
        pool.distribute_tide(dec!(100));

        assert!(close_to(pool.settle_front_end(&mut front_end), dec!(50)));
        assert!(close_to(pool.settle_front_end(&mut front_end), Decimal::ZERO));
        assert!(close_to(front_end.unclaimed_tide, dec!(50)));

        let change = pool.withdraw(&mut alice, Some(&mut front_end), Decimal::ZERO).unwrap();
        assert!(close_to(change.tide_gain, dec!(50)));
        assert!(close_to(front_end.unclaimed_tide, dec!(50)));
    }

    #[test]
    fn deposits_and_pool_total_stay_consistent() {
        let mut pool = StabilityPoolLedger::new();
        let mut alice = deposit(&mut pool, dec!(1000));
        let mut bob = deposit(&mut pool, dec!(2000));
        pool.offset(dec!(300), &coll(COLL_A, dec!(3))).unwrap();
        pool.provide(&mut alice, None, dec!(500)).unwrap();
        pool.withdraw(&mut bob, None, dec!(100)).unwrap();

        let sum = pool.compounded_deposit(&alice) + pool.compounded_deposit(&bob);
        assert!(close_to(sum, pool.total_deposits));
    }
}
