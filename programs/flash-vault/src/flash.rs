use anchor_lang::prelude::*;
use anchor_lang::solana_program::sysvar::instructions as sysvar_instructions;
use anchor_spl::token::{Token, TokenAccount};

use crate::constants::{POOL_SEED, STATE_SEED};
use crate::guard::{self, BatchEntry, CallContext};
use crate::ledger::{AssetLedger, SplLedger};
use crate::state::{Pool, State, VaultError};

/// Lend `amount` out of the reserve with nothing but the transaction shape as
/// security: top-level only, settled later by a top-level repay of the same
/// amount on the same pool, one open loan per pool.
#[allow(clippy::too_many_arguments)]
pub fn process_borrow<L: AssetLedger>(
    ledger: &mut L,
    registry: &Pubkey,
    pool_key: &Pubkey,
    pool: &mut Pool,
    call: &CallContext,
    batch: &[BatchEntry],
    borrower_token: &Pubkey,
    amount: u64,
) -> Result<()> {
    pool.ensure_active()?;
    require!(amount > 0, VaultError::InvalidAmount);

    guard::check_borrow(call, pool_key, pool, amount, batch)?;

    let destination = ledger.holding(borrower_token)?;
    require_keys_eq!(destination.mint, pool.asset_mint, VaultError::AssetMismatch);

    let reserve = ledger.holding(&pool.reserve)?;
    require!(reserve.amount >= amount, VaultError::InsufficientReserve);

    ledger.transfer(&pool.reserve, borrower_token, registry, amount)?;
    pool.open_loan(amount)
}

/// Return the open loan. The borrower signs the transfer back.
pub fn process_repay<L: AssetLedger>(
    ledger: &mut L,
    pool: &mut Pool,
    call: &CallContext,
    borrower: &Pubkey,
    borrower_token: &Pubkey,
    amount: u64,
) -> Result<()> {
    pool.ensure_active()?;
    guard::check_repay(call)?;
    pool.check_settlement(amount)?;

    let source = ledger.holding(borrower_token)?;
    require_keys_eq!(source.mint, pool.asset_mint, VaultError::AssetMismatch);
    require!(source.amount >= amount, VaultError::InsufficientBalance);

    ledger.transfer(borrower_token, &pool.reserve, borrower, amount)?;
    pool.settle_loan(amount)
}

/// Flash borrow from a pool reserve
pub fn borrow(ctx: Context<Borrow>, amount: u64) -> Result<()> {
    let instructions = ctx.accounts.instructions.to_account_info();
    let call = guard::current_call_context(&instructions)?;
    let batch = guard::load_batch(&instructions)?;

    let seeds: &[&[u8]] = &[STATE_SEED, &[ctx.accounts.state.bump]];
    let mut ledger = SplLedger::new(
        ctx.accounts.token_program.to_account_info(),
        ctx.accounts.state.to_account_info(),
        seeds,
        vec![
            ctx.accounts.reserve.to_account_info(),
            ctx.accounts.borrower_token.to_account_info(),
        ],
    );

    let registry = ctx.accounts.state.key();
    let pool_key = ctx.accounts.pool.key();
    let borrower_token = ctx.accounts.borrower_token.key();
    process_borrow(
        &mut ledger,
        &registry,
        &pool_key,
        &mut ctx.accounts.pool,
        &call,
        &batch,
        &borrower_token,
        amount,
    )?;

    emit!(LoanOpened {
        pool: pool_key,
        borrower_token,
        amount,
        position: call.position as u16,
    });

    msg!("Flash loan of {} opened at instruction {}", amount, call.position);
    Ok(())
}

/// Repay an open flash loan
pub fn repay(ctx: Context<Repay>, amount: u64) -> Result<()> {
    let instructions = ctx.accounts.instructions.to_account_info();
    let call = guard::current_call_context(&instructions)?;

    let seeds: &[&[u8]] = &[STATE_SEED, &[ctx.accounts.state.bump]];
    let mut ledger = SplLedger::new(
        ctx.accounts.token_program.to_account_info(),
        ctx.accounts.state.to_account_info(),
        seeds,
        vec![
            ctx.accounts.reserve.to_account_info(),
            ctx.accounts.borrower.to_account_info(),
            ctx.accounts.borrower_token.to_account_info(),
        ],
    );

    let pool_key = ctx.accounts.pool.key();
    let borrower = ctx.accounts.borrower.key();
    let borrower_token = ctx.accounts.borrower_token.key();
    process_repay(
        &mut ledger,
        &mut ctx.accounts.pool,
        &call,
        &borrower,
        &borrower_token,
        amount,
    )?;

    emit!(LoanSettled {
        pool: pool_key,
        borrower,
        amount,
        position: call.position as u16,
    });

    msg!("Flash loan of {} settled at instruction {}", amount, call.position);
    Ok(())
}

// `pool` must stay at LOAN_POOL_ACCOUNT_INDEX in both structs below.

#[derive(Accounts)]
pub struct Borrow<'info> {
    #[account(
        seeds = [STATE_SEED],
        bump = state.bump,
    )]
    pub state: Box<Account<'info, State>>,

    #[account(
        mut,
        seeds = [POOL_SEED, pool.asset_mint.as_ref()],
        bump = pool.bump,
    )]
    pub pool: Box<Account<'info, Pool>>,

    #[account(
        mut,
        address = pool.reserve @ VaultError::PoolMismatch,
    )]
    pub reserve: Box<Account<'info, TokenAccount>>,

    #[account(mut)]
    pub borrower_token: Box<Account<'info, TokenAccount>>,

    /// CHECK: Instructions sysvar, address-checked
    #[account(address = sysvar_instructions::ID)]
    pub instructions: UncheckedAccount<'info>,

    pub token_program: Program<'info, Token>,
}

#[derive(Accounts)]
pub struct Repay<'info> {
    #[account(
        seeds = [STATE_SEED],
        bump = state.bump,
    )]
    pub state: Box<Account<'info, State>>,

    #[account(
        mut,
        seeds = [POOL_SEED, pool.asset_mint.as_ref()],
        bump = pool.bump,
    )]
    pub pool: Box<Account<'info, Pool>>,

    #[account(
        mut,
        address = pool.reserve @ VaultError::PoolMismatch,
    )]
    pub reserve: Box<Account<'info, TokenAccount>>,

    pub borrower: Signer<'info>,

    #[account(mut)]
    pub borrower_token: Box<Account<'info, TokenAccount>>,

    /// CHECK: Instructions sysvar, address-checked
    #[account(address = sysvar_instructions::ID)]
    pub instructions: UncheckedAccount<'info>,

    pub token_program: Program<'info, Token>,
}

#[event]
pub struct LoanOpened {
    pub pool: Pubkey,
    pub borrower_token: Pubkey,
    pub amount: u64,
    pub position: u16,
}

#[event]
pub struct LoanSettled {
    pub pool: Pubkey,
    pub borrower: Pubkey,
    pub amount: u64,
    pub position: u16,
}
