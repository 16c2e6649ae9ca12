use anchor_lang::prelude::*;

pub mod constants;
pub mod flash;
pub mod guard;
pub mod ledger;
pub mod registry;
pub mod state;
pub mod vault;

use flash::*;
use registry::*;
use vault::*;

pub use constants::*;
pub use state::*;

declare_id!("Fg6PaFpoGXkYsidMpWTK6W2BeZ7FEfcYkg476zPFsLnS");

#[program]
pub mod flash_vault {
    use super::*;

    /// Create the registry and record the signer as authority
    pub fn initialize(ctx: Context<Initialize>) -> Result<()> {
        registry::initialize(ctx)
    }

    /// For a given token mint, set up a reserve and a receipt mint
    pub fn add_pool(ctx: Context<AddPool>) -> Result<()> {
        registry::add_pool(ctx)
    }

    /// Receive tokens and mint receipts
    pub fn deposit(ctx: Context<Deposit>, amount: u64) -> Result<()> {
        vault::deposit(ctx, amount)
    }

    /// Burn receipts and disburse tokens
    pub fn withdraw(ctx: Context<Withdraw>, amount: u64) -> Result<()> {
        vault::withdraw(ctx, amount)
    }

    /// Confirm a matching repay later in the transaction, then lend tokens.
    /// Must be followed by `repay` for the same pool and amount.
    pub fn borrow(ctx: Context<Borrow>, amount: u64) -> Result<()> {
        flash::borrow(ctx, amount)
    }

    /// Return a flash loan in full
    pub fn repay(ctx: Context<Repay>, amount: u64) -> Result<()> {
        flash::repay(ctx, amount)
    }
}
