use anchor_lang::prelude::*;
use anchor_spl::associated_token::AssociatedToken;
use anchor_spl::token::{Mint, Token, TokenAccount};

use crate::constants::{POOL_SEED, STATE_SEED};
use crate::ledger::{AssetLedger, SplLedger};
use crate::state::{Pool, State, VaultError};

/// Move `amount` of the underlying into the reserve and mint the same number
/// of receipts. Funds are pulled with the registry's delegation, so the
/// depositor does not sign.
pub fn process_deposit<L: AssetLedger>(
    ledger: &mut L,
    registry: &Pubkey,
    pool: &Pool,
    depositor: &Pubkey,
    depositor_token: &Pubkey,
    depositor_receipt: &Pubkey,
    amount: u64,
) -> Result<()> {
    pool.ensure_active()?;
    require!(amount > 0, VaultError::InvalidAmount);

    let source = ledger.holding(depositor_token)?;
    require_keys_eq!(source.mint, pool.asset_mint, VaultError::AssetMismatch);
    // The delegation names the registry, not a recipient. Only the owner's own
    // receipts may be credited or anyone could spend a standing approval.
    require_keys_eq!(source.owner, *depositor, VaultError::Unauthorized);
    require!(source.amount >= amount, VaultError::InsufficientBalance);
    require!(
        source.allowance_for(registry) >= amount,
        VaultError::InsufficientDelegation
    );

    let receipt = ledger.holding(depositor_receipt)?;
    require_keys_eq!(receipt.mint, pool.receipt_mint, VaultError::PoolMismatch);
    require_keys_eq!(receipt.owner, *depositor, VaultError::Unauthorized);

    ledger.transfer(depositor_token, &pool.reserve, registry, amount)?;
    ledger.mint_to(&pool.receipt_mint, depositor_receipt, amount)?;
    Ok(())
}

/// Burn `amount` receipts and pay the same amount of underlying out of the
/// reserve.
pub fn process_withdraw<L: AssetLedger>(
    ledger: &mut L,
    registry: &Pubkey,
    pool: &Pool,
    depositor: &Pubkey,
    depositor_token: &Pubkey,
    depositor_receipt: &Pubkey,
    amount: u64,
) -> Result<()> {
    pool.ensure_active()?;
    require!(amount > 0, VaultError::InvalidAmount);

    let receipt = ledger.holding(depositor_receipt)?;
    require_keys_eq!(receipt.mint, pool.receipt_mint, VaultError::PoolMismatch);
    require_keys_eq!(receipt.owner, *depositor, VaultError::Unauthorized);
    require!(receipt.amount >= amount, VaultError::InsufficientReceipts);
    require!(
        receipt.allowance_for(registry) >= amount,
        VaultError::InsufficientDelegation
    );

    let destination = ledger.holding(depositor_token)?;
    require_keys_eq!(destination.mint, pool.asset_mint, VaultError::AssetMismatch);
    require_keys_eq!(destination.owner, *depositor, VaultError::Unauthorized);

    // Receipts are always backed while no loan is open; an open loan in the
    // same transaction can still leave the reserve short.
    let reserve = ledger.holding(&pool.reserve)?;
    require!(reserve.amount >= amount, VaultError::InsufficientReserve);

    ledger.burn(&pool.receipt_mint, depositor_receipt, registry, amount)?;
    ledger.transfer(&pool.reserve, depositor_token, registry, amount)?;
    Ok(())
}

/// Deposit underlying tokens and receive receipts
pub fn deposit(ctx: Context<Deposit>, amount: u64) -> Result<()> {
    let seeds: &[&[u8]] = &[STATE_SEED, &[ctx.accounts.state.bump]];
    let mut ledger = SplLedger::new(
        ctx.accounts.token_program.to_account_info(),
        ctx.accounts.state.to_account_info(),
        seeds,
        vec![
            ctx.accounts.reserve.to_account_info(),
            ctx.accounts.receipt_mint.to_account_info(),
            ctx.accounts.depositor_token.to_account_info(),
            ctx.accounts.depositor_receipt.to_account_info(),
        ],
    );

    process_deposit(
        &mut ledger,
        &ctx.accounts.state.key(),
        &ctx.accounts.pool,
        &ctx.accounts.depositor.key(),
        &ctx.accounts.depositor_token.key(),
        &ctx.accounts.depositor_receipt.key(),
        amount,
    )?;

    emit!(Deposited {
        pool: ctx.accounts.pool.key(),
        depositor: ctx.accounts.depositor.key(),
        amount,
    });

    Ok(())
}

/// Burn receipts and withdraw underlying tokens
pub fn withdraw(ctx: Context<Withdraw>, amount: u64) -> Result<()> {
    let seeds: &[&[u8]] = &[STATE_SEED, &[ctx.accounts.state.bump]];
    let mut ledger = SplLedger::new(
        ctx.accounts.token_program.to_account_info(),
        ctx.accounts.state.to_account_info(),
        seeds,
        vec![
            ctx.accounts.reserve.to_account_info(),
            ctx.accounts.receipt_mint.to_account_info(),
            ctx.accounts.depositor_token.to_account_info(),
            ctx.accounts.depositor_receipt.to_account_info(),
        ],
    );

    process_withdraw(
        &mut ledger,
        &ctx.accounts.state.key(),
        &ctx.accounts.pool,
        &ctx.accounts.depositor.key(),
        &ctx.accounts.depositor_token.key(),
        &ctx.accounts.depositor_receipt.key(),
        amount,
    )?;

    emit!(Withdrawn {
        pool: ctx.accounts.pool.key(),
        depositor: ctx.accounts.depositor.key(),
        amount,
    });

    Ok(())
}

#[derive(Accounts)]
pub struct Deposit<'info> {
    /// Funds the receipt account if it does not exist yet
    #[account(mut)]
    pub payer: Signer<'info>,

    /// CHECK: Receipt holder. Authorizes through a token delegation to the
    /// registry instead of signing; ownership is checked against token accounts.
    pub depositor: UncheckedAccount<'info>,

    #[account(
        seeds = [STATE_SEED],
        bump = state.bump,
    )]
    pub state: Box<Account<'info, State>>,

    #[account(
        seeds = [POOL_SEED, pool.asset_mint.as_ref()],
        bump = pool.bump,
    )]
    pub pool: Box<Account<'info, Pool>>,

    #[account(
        mut,
        address = pool.reserve @ VaultError::PoolMismatch,
    )]
    pub reserve: Box<Account<'info, TokenAccount>>,

    #[account(
        mut,
        address = pool.receipt_mint @ VaultError::PoolMismatch,
    )]
    pub receipt_mint: Box<Account<'info, Mint>>,

    #[account(mut)]
    pub depositor_token: Box<Account<'info, TokenAccount>>,

    #[account(
        init_if_needed,
        payer = payer,
        associated_token::mint = receipt_mint,
        associated_token::authority = depositor,
    )]
    pub depositor_receipt: Box<Account<'info, TokenAccount>>,

    pub token_program: Program<'info, Token>,
    pub associated_token_program: Program<'info, AssociatedToken>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct Withdraw<'info> {
    /// CHECK: Receipt holder. Authorizes through a token delegation to the
    /// registry instead of signing; ownership is checked against token accounts.
    pub depositor: UncheckedAccount<'info>,

    #[account(
        seeds = [STATE_SEED],
        bump = state.bump,
    )]
    pub state: Box<Account<'info, State>>,

    #[account(
        seeds = [POOL_SEED, pool.asset_mint.as_ref()],
        bump = pool.bump,
    )]
    pub pool: Box<Account<'info, Pool>>,

    #[account(
        mut,
        address = pool.reserve @ VaultError::PoolMismatch,
    )]
    pub reserve: Box<Account<'info, TokenAccount>>,

    #[account(
        mut,
        address = pool.receipt_mint @ VaultError::PoolMismatch,
    )]
    pub receipt_mint: Box<Account<'info, Mint>>,

    #[account(mut)]
    pub depositor_token: Box<Account<'info, TokenAccount>>,

    #[account(mut)]
    pub depositor_receipt: Box<Account<'info, TokenAccount>>,

    pub token_program: Program<'info, Token>,
}

#[event]
pub struct Deposited {
    pub pool: Pubkey,
    pub depositor: Pubkey,
    pub amount: u64,
}

#[event]
pub struct Withdrawn {
    pub pool: Pubkey,
    pub depositor: Pubkey,
    pub amount: u64,
}
