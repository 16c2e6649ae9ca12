use anchor_lang::prelude::*;
use anchor_spl::token::{Mint, Token, TokenAccount};

use crate::constants::{POOL_SEED, RECEIPT_SEED, RESERVE_SEED, STATE_SEED};
use crate::state::{Pool, State, VaultError};

/// Accounts a new pool is bound to at creation.
#[derive(Clone, Copy, Debug)]
pub struct PoolAccounts {
    pub asset_mint: Pubkey,
    pub reserve: Pubkey,
    pub receipt_mint: Pubkey,
    pub bump: u8,
    pub reserve_bump: u8,
    pub receipt_bump: u8,
}

impl PoolAccounts {
    /// Canonical PDAs for `asset_mint`.
    pub fn derive(asset_mint: &Pubkey) -> Self {
        let (_, bump) = Pool::address(asset_mint);
        let (reserve, reserve_bump) = Pool::reserve_address(asset_mint);
        let (receipt_mint, receipt_bump) = Pool::receipt_mint_address(asset_mint);
        Self {
            asset_mint: *asset_mint,
            reserve,
            receipt_mint,
            bump,
            reserve_bump,
            receipt_bump,
        }
    }
}

pub fn register_authority(state: &mut State, authority: Pubkey, bump: u8) -> Result<()> {
    require!(!state.is_initialized(), VaultError::AlreadyInitialized);
    require!(authority != Pubkey::default(), VaultError::Unauthorized);

    state.authority = authority;
    state.bump = bump;
    Ok(())
}

pub fn register_pool(
    state: &State,
    caller: &Pubkey,
    pool: &mut Pool,
    accounts: PoolAccounts,
) -> Result<()> {
    require!(state.is_initialized(), VaultError::Unauthorized);
    require_keys_eq!(state.authority, *caller, VaultError::Unauthorized);
    require!(!pool.is_initialized(), VaultError::PoolAlreadyExists);

    pool.asset_mint = accounts.asset_mint;
    pool.reserve = accounts.reserve;
    pool.receipt_mint = accounts.receipt_mint;
    pool.borrow_in_progress = false;
    pool.outstanding_amount = 0;
    pool.bump = accounts.bump;
    pool.reserve_bump = accounts.reserve_bump;
    pool.receipt_bump = accounts.receipt_bump;
    Ok(())
}

/// Register the program authority
pub fn initialize(ctx: Context<Initialize>) -> Result<()> {
    let state = &mut ctx.accounts.state;
    register_authority(state, ctx.accounts.authority.key(), ctx.bumps.state)?;

    emit!(RegistryInitialized {
        state: state.key(),
        authority: state.authority,
    });

    msg!("Flash vault registry initialized, authority: {}", state.authority);
    Ok(())
}

/// Create the pool, reserve and receipt mint for an asset
pub fn add_pool(ctx: Context<AddPool>) -> Result<()> {
    let accounts = PoolAccounts {
        asset_mint: ctx.accounts.asset_mint.key(),
        reserve: ctx.accounts.reserve.key(),
        receipt_mint: ctx.accounts.receipt_mint.key(),
        bump: ctx.bumps.pool,
        reserve_bump: ctx.bumps.reserve,
        receipt_bump: ctx.bumps.receipt_mint,
    };

    let pool = &mut ctx.accounts.pool;
    register_pool(&ctx.accounts.state, &ctx.accounts.authority.key(), pool, accounts)?;

    emit!(PoolAdded {
        pool: pool.key(),
        asset_mint: pool.asset_mint,
        reserve: pool.reserve,
        receipt_mint: pool.receipt_mint,
    });

    msg!("Pool added for mint: {}", pool.asset_mint);
    Ok(())
}

#[derive(Accounts)]
pub struct Initialize<'info> {
    #[account(mut)]
    pub authority: Signer<'info>,

    // A second call reaches the handler and fails with AlreadyInitialized
    #[account(
        init_if_needed,
        payer = authority,
        space = State::LEN,
        seeds = [STATE_SEED],
        bump,
    )]
    pub state: Account<'info, State>,

    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct AddPool<'info> {
    #[account(mut)]
    pub authority: Signer<'info>,

    #[account(
        seeds = [STATE_SEED],
        bump = state.bump,
    )]
    pub state: Box<Account<'info, State>>,

    pub asset_mint: Box<Account<'info, Mint>>,

    #[account(
        init_if_needed,
        payer = authority,
        space = Pool::LEN,
        seeds = [POOL_SEED, asset_mint.key().as_ref()],
        bump,
    )]
    pub pool: Box<Account<'info, Pool>>,

    #[account(
        init_if_needed,
        payer = authority,
        seeds = [RESERVE_SEED, asset_mint.key().as_ref()],
        bump,
        token::mint = asset_mint,
        token::authority = state,
    )]
    pub reserve: Box<Account<'info, TokenAccount>>,

    #[account(
        init_if_needed,
        payer = authority,
        seeds = [RECEIPT_SEED, asset_mint.key().as_ref()],
        bump,
        mint::decimals = asset_mint.decimals,
        mint::authority = state,
    )]
    pub receipt_mint: Box<Account<'info, Mint>>,

    pub token_program: Program<'info, Token>,
    pub system_program: Program<'info, System>,
    pub rent: Sysvar<'info, Rent>,
}

#[event]
pub struct RegistryInitialized {
    pub state: Pubkey,
    pub authority: Pubkey,
}

#[event]
pub struct PoolAdded {
    pub pool: Pubkey,
    pub asset_mint: Pubkey,
    pub reserve: Pubkey,
    pub receipt_mint: Pubkey,
}
