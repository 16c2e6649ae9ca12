//! In-memory stand-in for the token program and the transaction runtime.
//!
//! `Vault::execute` plays a transaction: every top-level op gets a
//! `CallContext` at depth 0, ops wrapped in `Op::Proxy` run at depth 1 as if
//! another program invoked them, and any error restores the pre-transaction
//! snapshot. The batch view handed to the guard is built from real instruction
//! data and account metas, so it decodes exactly what the sysvar would hold.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};

use anchor_lang::error::ErrorCode;
use anchor_lang::prelude::*;
use anchor_lang::solana_program::sysvar::instructions as sysvar_instructions;
use anchor_lang::{InstructionData, ToAccountMetas};
use anchor_spl::associated_token::get_associated_token_address;

use flash_vault::guard::{self, BatchEntry, CallContext};
use flash_vault::ledger::{AssetLedger, Holding};
use flash_vault::registry::{register_authority, register_pool, PoolAccounts};
use flash_vault::state::{Pool, State, VaultError};
use flash_vault::{flash, vault};

/// Program id of the intermediary that issues nested calls.
pub const PROXY_PROGRAM_ID: Pubkey = Pubkey::new_from_array([7u8; 32]);

#[derive(Clone, Default)]
pub struct MemoryLedger {
    accounts: HashMap<Pubkey, Holding>,
    supply: HashMap<Pubkey, u64>,
}

impl MemoryLedger {
    pub fn create_mint(&mut self) -> Pubkey {
        let mint = Pubkey::new_unique();
        self.register_mint(mint);
        mint
    }

    pub fn register_mint(&mut self, mint: Pubkey) {
        self.supply.entry(mint).or_insert(0);
    }

    pub fn open_account(&mut self, key: Pubkey, mint: Pubkey, owner: Pubkey) {
        self.supply.entry(mint).or_insert(0);
        self.accounts.entry(key).or_insert(Holding {
            mint,
            owner,
            ..Holding::default()
        });
    }

    pub fn exists(&self, key: &Pubkey) -> bool {
        self.accounts.contains_key(key)
    }

    pub fn balance(&self, key: &Pubkey) -> u64 {
        self.accounts.get(key).map(|h| h.amount).unwrap_or(0)
    }

    pub fn supply(&self, mint: &Pubkey) -> u64 {
        self.supply.get(mint).copied().unwrap_or(0)
    }

    /// Owner-signed approval; replaces any previous delegate like SPL Token.
    pub fn approve(&mut self, account: &Pubkey, delegate: Pubkey, amount: u64) -> Result<()> {
        let holding = self
            .accounts
            .get_mut(account)
            .ok_or_else(|| error!(ErrorCode::AccountNotInitialized))?;
        holding.delegate = Some(delegate);
        holding.delegated_amount = amount;
        Ok(())
    }

    fn credit(&mut self, key: &Pubkey, mint: &Pubkey, amount: u64) -> Result<()> {
        let holding = self
            .accounts
            .get_mut(key)
            .ok_or_else(|| error!(ErrorCode::AccountNotInitialized))?;
        require_keys_eq!(holding.mint, *mint, VaultError::AssetMismatch);
        holding.amount = holding
            .amount
            .checked_add(amount)
            .ok_or(ProgramError::ArithmeticOverflow)?;
        Ok(())
    }

    /// Debit `amount` from `key`, authorized by its owner or by its delegate.
    fn debit(&mut self, key: &Pubkey, authority: &Pubkey, amount: u64) -> Result<Pubkey> {
        let holding = self
            .accounts
            .get_mut(key)
            .ok_or_else(|| error!(ErrorCode::AccountNotInitialized))?;
        require!(holding.amount >= amount, VaultError::InsufficientBalance);

        if holding.owner != *authority {
            require!(
                holding.allowance_for(authority) >= amount,
                VaultError::InsufficientDelegation
            );
            holding.delegated_amount -= amount;
            if holding.delegated_amount == 0 {
                holding.delegate = None;
            }
        }

        holding.amount -= amount;
        Ok(holding.mint)
    }
}

impl AssetLedger for MemoryLedger {
    fn holding(&self, account: &Pubkey) -> Result<Holding> {
        self.accounts
            .get(account)
            .copied()
            .ok_or_else(|| error!(ErrorCode::AccountNotInitialized))
    }

    fn transfer(
        &mut self,
        from: &Pubkey,
        to: &Pubkey,
        authority: &Pubkey,
        amount: u64,
    ) -> Result<()> {
        let destination_mint = self.holding(to)?.mint;
        require_keys_eq!(self.holding(from)?.mint, destination_mint, VaultError::AssetMismatch);
        let mint = self.debit(from, authority, amount)?;
        self.credit(to, &mint, amount)
    }

    fn mint_to(&mut self, mint: &Pubkey, to: &Pubkey, amount: u64) -> Result<()> {
        self.credit(to, mint, amount)?;
        let supply = self.supply.entry(*mint).or_insert(0);
        *supply = supply
            .checked_add(amount)
            .ok_or(ProgramError::ArithmeticOverflow)?;
        Ok(())
    }

    fn burn(
        &mut self,
        mint: &Pubkey,
        from: &Pubkey,
        authority: &Pubkey,
        amount: u64,
    ) -> Result<()> {
        require_keys_eq!(self.holding(from)?.mint, *mint, VaultError::AssetMismatch);
        self.debit(from, authority, amount)?;
        let supply = self.supply.entry(*mint).or_insert(0);
        *supply = supply.saturating_sub(amount);
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub enum Op {
    Initialize { authority: Pubkey },
    AddPool { authority: Pubkey, asset: Pubkey },
    /// Token-program approve of the registry on `owner`'s account for `mint`.
    Approve { owner: Pubkey, mint: Pubkey, amount: u64 },
    Deposit { depositor: Pubkey, asset: Pubkey, amount: u64 },
    Withdraw { depositor: Pubkey, asset: Pubkey, amount: u64 },
    Borrow { borrower: Pubkey, asset: Pubkey, amount: u64 },
    Repay { borrower: Pubkey, asset: Pubkey, amount: u64 },
    /// A foreign program that forwards each inner op through CPI.
    Proxy(Vec<Op>),
}

/// Why a transaction was rolled back. `position` is the failing top-level
/// instruction, `None` for a batch-boundary fault.
#[derive(Debug)]
pub struct Rejected {
    pub position: Option<usize>,
    pub error: anchor_lang::error::Error,
}

#[derive(Clone)]
struct Snapshot {
    ledger: MemoryLedger,
    state: State,
    pools: BTreeMap<Pubkey, Pool>,
}

pub struct Vault {
    pub ledger: MemoryLedger,
    pub state: State,
    pub state_key: Pubkey,
    pools: BTreeMap<Pubkey, Pool>,
}

impl Default for Vault {
    fn default() -> Self {
        Self::new()
    }
}

impl Vault {
    pub fn new() -> Self {
        Self {
            ledger: MemoryLedger::default(),
            state: State::default(),
            state_key: State::address().0,
            pools: BTreeMap::new(),
        }
    }

    /// Registry initialized by `authority` with one pool for a fresh mint.
    pub fn with_pool(authority: Pubkey) -> (Self, Pubkey) {
        let mut vault = Self::new();
        let asset = vault.ledger.create_mint();
        vault
            .execute(vec![
                Op::Initialize { authority },
                Op::AddPool { authority, asset },
            ])
            .expect("setup");
        (vault, asset)
    }

    pub fn add_asset(&mut self, authority: Pubkey) -> Pubkey {
        let asset = self.ledger.create_mint();
        self.execute(vec![Op::AddPool { authority, asset }]).expect("add pool");
        asset
    }

    pub fn token_account(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
        get_associated_token_address(owner, mint)
    }

    pub fn receipt_mint(asset: &Pubkey) -> Pubkey {
        Pool::receipt_mint_address(asset).0
    }

    /// Give `owner` `amount` of `mint` from outside the vault.
    pub fn fund(&mut self, owner: Pubkey, mint: Pubkey, amount: u64) {
        let account = Self::token_account(&owner, &mint);
        self.ledger.open_account(account, mint, owner);
        self.ledger.mint_to(&mint, &account, amount).expect("fund");
    }

    pub fn balance(&self, owner: &Pubkey, mint: &Pubkey) -> u64 {
        self.ledger.balance(&Self::token_account(owner, mint))
    }

    pub fn receipts(&self, owner: &Pubkey, asset: &Pubkey) -> u64 {
        self.balance(owner, &Self::receipt_mint(asset))
    }

    pub fn reserve(&self, asset: &Pubkey) -> u64 {
        self.ledger.balance(&Pool::reserve_address(asset).0)
    }

    pub fn pool(&self, asset: &Pubkey) -> Option<&Pool> {
        self.pools.get(&Pool::address(asset).0)
    }

    pub fn pool_mut(&mut self, asset: &Pubkey) -> Option<&mut Pool> {
        self.pools.get_mut(&Pool::address(asset).0)
    }

    /// Every pool idle and every receipt redeemable.
    pub fn assert_invariants(&self) {
        for pool in self.pools.values() {
            assert!(pool.is_idle(), "pool {} left borrowed", pool.asset_mint);
            assert!(
                self.ledger.balance(&pool.reserve) >= self.ledger.supply(&pool.receipt_mint),
                "pool {} reserve below receipt supply",
                pool.asset_mint
            );
        }
    }

    pub fn execute(&mut self, ops: Vec<Op>) -> std::result::Result<(), Rejected> {
        let snapshot = self.snapshot();

        if let Err(error) = self.check_boundary() {
            return Err(Rejected { position: None, error });
        }

        let batch: Vec<BatchEntry> = ops.iter().map(|op| self.entry(op)).collect();
        for (position, op) in ops.iter().enumerate() {
            if let Err(error) = self.run(op, position, 0, &batch) {
                self.restore(snapshot);
                return Err(Rejected { position: Some(position), error });
            }
        }

        if let Err(error) = self.check_boundary() {
            self.restore(snapshot);
            return Err(Rejected { position: None, error });
        }
        Ok(())
    }

    fn check_boundary(&self) -> Result<()> {
        self.pools.values().try_for_each(guard::ensure_settled)
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            ledger: self.ledger.clone(),
            state: self.state.clone(),
            pools: self.pools.clone(),
        }
    }

    fn restore(&mut self, snapshot: Snapshot) {
        self.ledger = snapshot.ledger;
        self.state = snapshot.state;
        self.pools = snapshot.pools;
    }

    /// Pool for `asset`, or an uninitialized one when none was added.
    fn load_pool(&self, asset: &Pubkey) -> (Pubkey, Pool) {
        let key = Pool::address(asset).0;
        (key, self.pools.get(&key).cloned().unwrap_or_default())
    }

    fn loan_accounts(&self, borrower: &Pubkey, asset: &Pubkey) -> Vec<AccountMeta> {
        flash_vault::accounts::Borrow {
            state: self.state_key,
            pool: Pool::address(asset).0,
            reserve: Pool::reserve_address(asset).0,
            borrower_token: Self::token_account(borrower, asset),
            instructions: sysvar_instructions::ID,
            token_program: anchor_spl::token::ID,
        }
        .to_account_metas(None)
    }

    fn repay_accounts(&self, borrower: &Pubkey, asset: &Pubkey) -> Vec<AccountMeta> {
        flash_vault::accounts::Repay {
            state: self.state_key,
            pool: Pool::address(asset).0,
            reserve: Pool::reserve_address(asset).0,
            borrower: *borrower,
            borrower_token: Self::token_account(borrower, asset),
            instructions: sysvar_instructions::ID,
            token_program: anchor_spl::token::ID,
        }
        .to_account_metas(None)
    }

    /// What the instructions sysvar would show for a top-level op.
    fn entry(&self, op: &Op) -> BatchEntry {
        let (program_id, metas, data) = match op {
            Op::Initialize { .. } => (
                flash_vault::ID,
                vec![],
                flash_vault::instruction::Initialize {}.data(),
            ),
            Op::AddPool { .. } => (
                flash_vault::ID,
                vec![],
                flash_vault::instruction::AddPool {}.data(),
            ),
            Op::Deposit { amount, .. } => (
                flash_vault::ID,
                vec![],
                flash_vault::instruction::Deposit { amount: *amount }.data(),
            ),
            Op::Withdraw { amount, .. } => (
                flash_vault::ID,
                vec![],
                flash_vault::instruction::Withdraw { amount: *amount }.data(),
            ),
            Op::Borrow { borrower, asset, amount } => (
                flash_vault::ID,
                self.loan_accounts(borrower, asset),
                flash_vault::instruction::Borrow { amount: *amount }.data(),
            ),
            Op::Repay { borrower, asset, amount } => (
                flash_vault::ID,
                self.repay_accounts(borrower, asset),
                flash_vault::instruction::Repay { amount: *amount }.data(),
            ),
            Op::Approve { amount, .. } => {
                let mut data = vec![4u8];
                data.extend_from_slice(&amount.to_le_bytes());
                (anchor_spl::token::ID, vec![], data)
            }
            Op::Proxy(_) => (PROXY_PROGRAM_ID, vec![], vec![]),
        };
        let accounts: Vec<Pubkey> = metas.iter().map(|meta| meta.pubkey).collect();
        BatchEntry::new(program_id, &accounts, &data)
    }

    fn run(&mut self, op: &Op, position: usize, depth: u32, batch: &[BatchEntry]) -> Result<()> {
        let call = if depth == 0 {
            CallContext::top_level(position)
        } else {
            CallContext::nested(position, depth)
        };
        let (state_bump, registry) = (State::address().1, self.state_key);

        match op {
            Op::Initialize { authority } => {
                register_authority(&mut self.state, *authority, state_bump)
            }
            Op::AddPool { authority, asset } => {
                let (key, mut pool) = self.load_pool(asset);
                let accounts = PoolAccounts::derive(asset);
                register_pool(&self.state, authority, &mut pool, accounts)?;
                self.ledger.open_account(accounts.reserve, *asset, registry);
                self.ledger.register_mint(accounts.receipt_mint);
                self.pools.insert(key, pool);
                Ok(())
            }
            Op::Approve { owner, mint, amount } => {
                self.ledger
                    .approve(&Self::token_account(owner, mint), registry, *amount)
            }
            Op::Deposit { depositor, asset, amount } => {
                let (_, pool) = self.load_pool(asset);
                let receipt = Self::token_account(depositor, &pool.receipt_mint);
                if pool.is_initialized() {
                    self.ledger.open_account(receipt, pool.receipt_mint, *depositor);
                }
                vault::process_deposit(
                    &mut self.ledger,
                    &registry,
                    &pool,
                    depositor,
                    &Self::token_account(depositor, asset),
                    &receipt,
                    *amount,
                )
            }
            Op::Withdraw { depositor, asset, amount } => {
                let (_, pool) = self.load_pool(asset);
                vault::process_withdraw(
                    &mut self.ledger,
                    &registry,
                    &pool,
                    depositor,
                    &Self::token_account(depositor, asset),
                    &Self::token_account(depositor, &pool.receipt_mint),
                    *amount,
                )
            }
            Op::Borrow { borrower, asset, amount } => {
                let (key, mut pool) = self.load_pool(asset);
                flash::process_borrow(
                    &mut self.ledger,
                    &registry,
                    &key,
                    &mut pool,
                    &call,
                    batch,
                    &Self::token_account(borrower, asset),
                    *amount,
                )?;
                self.pools.insert(key, pool);
                Ok(())
            }
            Op::Repay { borrower, asset, amount } => {
                let (key, mut pool) = self.load_pool(asset);
                flash::process_repay(
                    &mut self.ledger,
                    &mut pool,
                    &call,
                    borrower,
                    &Self::token_account(borrower, asset),
                    *amount,
                )?;
                self.pools.insert(key, pool);
                Ok(())
            }
            Op::Proxy(inner) => inner
                .iter()
                .try_for_each(|op| self.run(op, position, depth + 1, batch)),
        }
    }
}

/// Asserts `result` was rejected with `expected`.
pub fn assert_rejected(
    result: std::result::Result<(), Rejected>,
    expected: VaultError,
) -> Rejected {
    let rejected = result.expect_err("transaction should have been rejected");
    assert_eq!(rejected.error, expected.into(), "rejected at {:?}", rejected.position);
    rejected
}
