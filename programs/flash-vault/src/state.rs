use anchor_lang::prelude::*;

use crate::constants::{POOL_SEED, RECEIPT_SEED, RESERVE_SEED, STATE_SEED};

/// Reserve registry. One per deployment; signs for every pool as mint
/// authority, reserve owner and transfer delegate.
#[account]
#[derive(Default, Debug)]
pub struct State {
    pub authority: Pubkey,
    pub bump: u8,
}

impl State {
    pub const LEN: usize = 8 + // discriminator
        32 + // authority
        1;   // bump

    pub fn address() -> (Pubkey, u8) {
        Pubkey::find_program_address(&[STATE_SEED], &crate::ID)
    }

    pub fn is_initialized(&self) -> bool {
        self.authority != Pubkey::default()
    }
}

#[account]
#[derive(Default, Debug)]
pub struct Pool {
    pub asset_mint: Pubkey,
    pub reserve: Pubkey,
    pub receipt_mint: Pubkey,
    pub borrow_in_progress: bool,
    pub outstanding_amount: u64,
    pub bump: u8,
    pub reserve_bump: u8,
    pub receipt_bump: u8,
}

impl Pool {
    pub const LEN: usize = 8 + // discriminator
        32 + // asset_mint
        32 + // reserve
        32 + // receipt_mint
        1 +  // borrow_in_progress
        8 +  // outstanding_amount
        1 +  // bump
        1 +  // reserve_bump
        1;   // receipt_bump

    pub fn address(asset_mint: &Pubkey) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[POOL_SEED, asset_mint.as_ref()], &crate::ID)
    }

    pub fn reserve_address(asset_mint: &Pubkey) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[RESERVE_SEED, asset_mint.as_ref()], &crate::ID)
    }

    pub fn receipt_mint_address(asset_mint: &Pubkey) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[RECEIPT_SEED, asset_mint.as_ref()], &crate::ID)
    }

    pub fn is_initialized(&self) -> bool {
        self.asset_mint != Pubkey::default()
    }

    pub fn ensure_active(&self) -> Result<()> {
        require!(self.is_initialized(), VaultError::PoolNotFound);
        Ok(())
    }

    /// Idle means no loan is open: the only state a pool may be in between
    /// transactions.
    pub fn is_idle(&self) -> bool {
        !self.borrow_in_progress && self.outstanding_amount == 0
    }

    /// IDLE -> BORROWED
    pub fn open_loan(&mut self, amount: u64) -> Result<()> {
        require!(!self.borrow_in_progress, VaultError::ReentrantBorrow);
        self.borrow_in_progress = true;
        self.outstanding_amount = amount;
        Ok(())
    }

    /// Checks that `amount` would close the open loan, without changing state.
    pub fn check_settlement(&self, amount: u64) -> Result<()> {
        require!(self.borrow_in_progress, VaultError::NoMatchingBorrow);
        require!(
            amount == self.outstanding_amount,
            VaultError::AmountMismatch
        );
        Ok(())
    }

    /// BORROWED -> IDLE
    pub fn settle_loan(&mut self, amount: u64) -> Result<()> {
        self.check_settlement(amount)?;
        self.borrow_in_progress = false;
        self.outstanding_amount = 0;
        Ok(())
    }
}

#[error_code]
pub enum VaultError {
    #[msg("Registry already initialized")]
    AlreadyInitialized,
    #[msg("Unauthorized")]
    Unauthorized,
    #[msg("Pool already exists for this mint")]
    PoolAlreadyExists,
    #[msg("Pool not found")]
    PoolNotFound,
    #[msg("Invalid amount - must be greater than zero")]
    InvalidAmount,
    #[msg("Insufficient token balance")]
    InsufficientBalance,
    #[msg("Insufficient reserve in pool")]
    InsufficientReserve,
    #[msg("Insufficient receipt balance")]
    InsufficientReceipts,
    #[msg("Missing or insufficient delegation to the registry")]
    InsufficientDelegation,
    #[msg("Pool already has a borrow in progress")]
    ReentrantBorrow,
    #[msg("Borrow must be a top-level instruction")]
    NestedBorrowForbidden,
    #[msg("Repay must be a top-level instruction")]
    NestedRepayForbidden,
    #[msg("No borrow in progress on this pool")]
    NoMatchingBorrow,
    #[msg("No later repay for this pool in the transaction")]
    NoMatchingRepay,
    #[msg("Repay amount does not match the borrowed amount")]
    AmountMismatch,
    #[msg("Token account mint does not match the pool asset")]
    AssetMismatch,
    #[msg("Account does not belong to this pool")]
    PoolMismatch,
    #[msg("Pool has an unsettled loan at a transaction boundary")]
    UnsettledLoan,
}
